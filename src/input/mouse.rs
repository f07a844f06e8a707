//! Mouse state machine
//!
//! The mouse is optional and may come and go at any time. While a
//! device is attached, motion, button and wheel events accumulate into a
//! `MouseReportState`; flushing encodes (clamping each axis) and resets
//! the accumulators. Any failure on this path just returns to `Absent`.

use log::{debug, info, trace, warn};
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::device::{EventSource, InputEvent};
use super::keycodes::{BTN_LEFT, BTN_MIDDLE, BTN_RIGHT};
use crate::constants::WHEEL_V120_PER_DETENT;
use crate::error::BridgeError;
use crate::gadget::ReportSink;
use crate::hid::{encode_mouse_report, MouseButtons, MouseReport, MouseReportState};

/// When accumulated mouse state is written out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    /// Write after every event
    PerEvent,
    /// Coalesce relative motion for up to the given interval.
    /// Button transitions are still written immediately.
    Coalesce(Duration),
}

impl FlushPolicy {
    /// `0` means per-event flushing
    pub fn from_interval_ms(ms: u64) -> Self {
        if ms == 0 {
            FlushPolicy::PerEvent
        } else {
            FlushPolicy::Coalesce(Duration::from_millis(ms))
        }
    }
}

/// Per-attachment state, discarded on detach
struct ActiveMouse<S> {
    source: S,
    state: MouseReportState,
    /// Buttons in the last report the gadget accepted
    last_buttons: MouseButtons,
    /// Sub-unit remainders of unaccelerated motion and wheel
    residual_x: f64,
    residual_y: f64,
    residual_wheel: f64,
    /// Coalesced flush deadline
    flush_due: Option<Instant>,
    /// Last flush was rejected; waiting for the sink's retry deadline
    deferred: bool,
}

impl<S> ActiveMouse<S> {
    fn new(source: S) -> Self {
        Self {
            source,
            state: MouseReportState::new(),
            last_buttons: MouseButtons::empty(),
            residual_x: 0.0,
            residual_y: 0.0,
            residual_wheel: 0.0,
            flush_due: None,
            deferred: false,
        }
    }

    /// Fold one event; returns true if the button mask changed
    fn accumulate(&mut self, event: InputEvent) -> bool {
        match event {
            InputEvent::Motion { dx, dy } => {
                let x = take_whole(&mut self.residual_x, dx);
                let y = take_whole(&mut self.residual_y, dy);
                self.state.add_motion(x, y);
                false
            }
            InputEvent::Wheel { v120 } => {
                // libinput counts towards the user as positive, HID the opposite
                let detents = take_whole(&mut self.residual_wheel, -v120 / WHEEL_V120_PER_DETENT);
                self.state.add_wheel(detents);
                false
            }
            InputEvent::Button { code, pressed } => match button_bit(code) {
                Some(bit) => {
                    let before = self.state.buttons;
                    self.state.set_button(bit, pressed);
                    before != self.state.buttons
                }
                None => false,
            },
            InputEvent::Key { .. } | InputEvent::Removed => false,
        }
    }

    fn is_dirty(&self) -> bool {
        self.state.has_motion() || self.state.buttons != self.last_buttons
    }
}

/// Add `delta` to `residual` and return the whole units, keeping the fraction
fn take_whole(residual: &mut f64, delta: f64) -> i32 {
    *residual += delta;
    let whole = residual.trunc();
    *residual -= whole;
    whole as i32
}

fn button_bit(code: u32) -> Option<MouseButtons> {
    match code {
        BTN_LEFT => Some(MouseButtons::LEFT),
        BTN_RIGHT => Some(MouseButtons::RIGHT),
        BTN_MIDDLE => Some(MouseButtons::MIDDLE),
        _ => None,
    }
}

/// Mouse path: `Absent` or `Active` with its own device and report state
pub struct MouseStateMachine<S> {
    active: Option<ActiveMouse<S>>,
    policy: FlushPolicy,
    /// Reused event buffer
    events: Vec<InputEvent>,
}

impl<S: EventSource> MouseStateMachine<S> {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            active: None,
            policy,
            events: Vec::with_capacity(64),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn source(&self) -> Option<&S> {
        self.active.as_ref().map(|m| &m.source)
    }

    /// True while accumulated state waits for the sink to accept writes again
    pub fn is_deferred(&self) -> bool {
        self.active.as_ref().map_or(false, |m| m.deferred)
    }

    /// Absent → Active. Starts from zero deltas and no buttons.
    pub fn attach(&mut self, source: S) {
        if let Some(old) = self.active.take() {
            warn!(
                "Mouse {} replaced by {}",
                old.source.path().display(),
                source.path().display()
            );
        }
        info!(
            "Mouse attached: {} ({})",
            source.path().display(),
            source.name()
        );
        self.active = Some(ActiveMouse::new(source));
    }

    /// Active → Absent. Pending deltas are discarded and an idle report
    /// is written so no button stays latched on the host.
    ///
    /// Returns the path of the detached device.
    pub fn detach<W: ReportSink<MouseReport>>(&mut self, sink: &mut W) -> Option<PathBuf> {
        let mouse = self.active.take()?;
        let path = mouse.source.path().to_path_buf();
        if mouse.state.has_motion() {
            debug!("mouse: discarding unflushed motion {:?}", mouse.state);
        }
        drop(mouse);

        if let Err(e) = sink.send(&MouseReport::IDLE) {
            debug!("mouse: idle report after detach not delivered: {}", e);
        }
        info!("Mouse detached: {}", path.display());
        Some(path)
    }

    /// Drain pending device events, flushing per the policy.
    ///
    /// An error means the mouse has already gone back to `Absent`.
    pub fn service<W: ReportSink<MouseReport>>(
        &mut self,
        sink: &mut W,
        now: Instant,
    ) -> Result<(), BridgeError> {
        let Some(mouse) = self.active.as_mut() else {
            return Ok(());
        };

        let mut events = std::mem::take(&mut self.events);
        events.clear();
        let read = mouse.source.read_events(&mut events);
        let device = mouse.source.name().to_string();

        let mut result = match read {
            Ok(()) => Ok(()),
            Err(e) => Err(BridgeError::MouseReadError { device, source: e }),
        };

        if result.is_ok() {
            for event in events.drain(..) {
                result = self.handle_event(event, sink, now);
                if result.is_err() || !self.is_active() {
                    break;
                }
            }
        }
        self.events = events;

        if let Err(e) = &result {
            if self.is_active() {
                debug!("mouse: {}", e);
                self.detach(sink);
            }
        }
        result
    }

    /// Apply one event; `Removed` ends the attachment
    pub fn handle_event<W: ReportSink<MouseReport>>(
        &mut self,
        event: InputEvent,
        sink: &mut W,
        now: Instant,
    ) -> Result<(), BridgeError> {
        let Some(mouse) = self.active.as_mut() else {
            return Ok(());
        };

        if event == InputEvent::Removed {
            return Err(BridgeError::MouseReadError {
                device: mouse.source.name().to_string(),
                source: io::Error::from_raw_os_error(libc::ENODEV),
            });
        }

        trace!("mouse: {:?}", event);
        let buttons_changed = mouse.accumulate(event);

        match self.policy {
            // Motion waits for the retry deadline; button edges are offered at once
            FlushPolicy::PerEvent if mouse.deferred && !buttons_changed => Ok(()),
            FlushPolicy::PerEvent => self.flush(sink),
            FlushPolicy::Coalesce(_) if buttons_changed => self.flush(sink),
            FlushPolicy::Coalesce(interval) => {
                if mouse.is_dirty() && mouse.flush_due.is_none() {
                    mouse.flush_due = Some(now + interval);
                }
                Ok(())
            }
        }
    }

    /// Next coalesced flush, if one is pending
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.active.as_ref().and_then(|m| m.flush_due)
    }

    /// Flush if the coalescing deadline or the sink's retry deadline has passed
    pub fn on_tick<W: ReportSink<MouseReport>>(
        &mut self,
        sink: &mut W,
        now: Instant,
    ) -> Result<(), BridgeError> {
        let coalesce_due = self.flush_deadline().map_or(false, |due| due <= now);
        let retry_due = self.is_deferred() && sink.retry_at().map_or(true, |due| due <= now);
        if coalesce_due || retry_due {
            self.flush(sink)
        } else {
            Ok(())
        }
    }

    /// Encode and write accumulated state if anything changed
    pub fn flush<W: ReportSink<MouseReport>>(&mut self, sink: &mut W) -> Result<(), BridgeError> {
        let Some(mouse) = self.active.as_mut() else {
            return Ok(());
        };
        mouse.flush_due = None;
        if !mouse.is_dirty() {
            mouse.deferred = false;
            return Ok(());
        }

        let report = encode_mouse_report(&mouse.state);
        trace!("mouse: {:?}", report);
        match sink.send(&report) {
            Ok(()) => {
                mouse.state.clear_motion();
                mouse.last_buttons = mouse.state.buttons;
                mouse.deferred = false;
                Ok(())
            }
            Err(e) if e.is_terminal() => {
                self.detach(sink);
                Err(BridgeError::MouseGadget(e))
            }
            Err(e) => {
                // Keep accumulating; the retry carries the deltas
                debug!("mouse: {}", e);
                mouse.deferred = true;
                Ok(())
            }
        }
    }

    /// Shutdown: idle report and release the device
    pub fn shutdown<W: ReportSink<MouseReport>>(&mut self, sink: &mut W) {
        self.detach(sink);
    }
}
