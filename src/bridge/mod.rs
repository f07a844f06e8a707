//! Bridge supervisor
//!
//! Startup gating, the poll(2) loop multiplexing keyboard, mouse, udev
//! and signal sources, and orderly shutdown.

pub mod signal;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use std::os::unix::io::{BorrowedFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{Config, GadgetConfig};
use crate::constants::READY_LOG_EVERY;
use crate::discovery::{self, HotplugEvent, MouseDiscovery, MouseFinder};
use crate::error::BridgeError;
use crate::gadget::{GadgetEndpoint, ReadinessProbe, ReportSink};
use crate::hid::{KeyboardReport, MouseReport};
use crate::input::{EventSource, FlushPolicy, InputSource, KeyboardStateMachine, MouseStateMachine};
use crate::layout::{KeyMap, LayoutVariant};
pub use signal::ShutdownSignal;
use signal::timeout_ms;

/// Readiness probe for the configured gadget
pub fn readiness_probe(gadget: &GadgetConfig, mouse_enabled: bool) -> ReadinessProbe {
    let mut nodes = vec![PathBuf::from(&gadget.keyboard_node)];
    if mouse_enabled {
        nodes.push(PathBuf::from(&gadget.mouse_node));
    }
    ReadinessProbe::new(gadget.gadget_name(), nodes).require_binding(gadget.check_binding)
}

fn notify(state: sd_notify::NotifyState) {
    if let Err(e) = sd_notify::notify(false, &[state]) {
        debug!("sd_notify failed: {}", e);
    }
}

/// Block until the gadget is usable; false if shutdown was requested
fn wait_for_gadget(probe: &ReadinessProbe, cfg: &GadgetConfig, signal: &mut ShutdownSignal) -> bool {
    let mut probes: u32 = 0;
    loop {
        let readiness = probe.probe();
        if readiness.is_ready() {
            info!(
                "USB gadget ready (udc={}, gadget={})",
                readiness.udc.as_deref().unwrap_or("?"),
                readiness.bound_gadget.as_ref().map_or("-", |(name, _)| name.as_str())
            );
            return true;
        }

        if probes % READY_LOG_EVERY == 0 {
            let status = format!("Waiting for USB gadget: {}", readiness.describe());
            info!("{}", status);
            notify(sd_notify::NotifyState::Status(&status));
        }
        probes = probes.wrapping_add(1);

        if !signal.sleep(cfg.ready_poll()) {
            info!("Shutdown requested while waiting for the gadget");
            return false;
        }
    }
}

/// Run the bridge until a shutdown signal or a fatal error
pub fn run(cfg: &Config) -> Result<()> {
    let mut signal = ShutdownSignal::new()?;

    let variant = LayoutVariant::resolve(&cfg.keyboard.layout);
    let overrides = cfg.keyboard.overrides_path();
    let keymap = KeyMap::load(variant, overrides.as_deref())?;

    let probe = readiness_probe(&cfg.gadget, cfg.mouse.enabled);
    if !wait_for_gadget(&probe, &cfg.gadget, &mut signal) {
        notify(sd_notify::NotifyState::Stopping);
        return Ok(());
    }

    let policy = cfg.gadget.write_policy();
    let mut keyboard_sink: GadgetEndpoint<KeyboardReport> =
        GadgetEndpoint::new(&cfg.gadget.keyboard_node, policy);
    keyboard_sink
        .ensure_open()
        .with_context(|| format!("Failed to open {}", cfg.gadget.keyboard_node))?;

    let mut mouse_sink: GadgetEndpoint<MouseReport> = GadgetEndpoint::new(&cfg.gadget.mouse_node, policy);
    if cfg.mouse.enabled {
        if let Err(e) = mouse_sink.ensure_open() {
            warn!("{}: {} (retried on first report)", cfg.gadget.mouse_node, e);
        }
    }

    let Some(source) = discovery::open_keyboard(&cfg.keyboard, |delay| signal.sleep(delay))? else {
        notify(sd_notify::NotifyState::Stopping);
        return Ok(());
    };

    let mut bridge: Bridge<InputSource, _, _, MouseDiscovery> = Bridge {
        keyboard: KeyboardStateMachine::new(keymap),
        keyboard_sink,
        mouse: MouseStateMachine::new(FlushPolicy::from_interval_ms(cfg.mouse.flush_interval_ms)),
        mouse_sink,
        discovery: None,
    };

    let keyboard_node = source.path().to_path_buf();
    bridge.keyboard.attach(source, &mut bridge.keyboard_sink)?;

    if cfg.mouse.enabled {
        let now = Instant::now();
        let mut discovery = MouseDiscovery::new(cfg.mouse.clone(), keyboard_node, now);
        match discovery.scan(now, None) {
            Some(source) => bridge.mouse.attach(source),
            None => info!("No mouse attached; waiting for hotplug"),
        }
        bridge.discovery = Some(discovery);
    } else {
        info!("Mouse forwarding disabled");
    }

    notify(sd_notify::NotifyState::Ready);
    notify(sd_notify::NotifyState::Status("Forwarding input"));
    info!("Bridge running");

    let result = bridge.run_loop(&mut signal);

    bridge.keyboard.shutdown(&mut bridge.keyboard_sink);
    bridge.mouse.shutdown(&mut bridge.mouse_sink);
    drop(bridge);
    notify(sd_notify::NotifyState::Stopping);

    if let Some(sig) = signal.received() {
        info!("Stopped by {}", sig);
    }
    result
}

/// What a polled descriptor belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Signal,
    Keyboard,
    Mouse,
    Hotplug,
}

/// Keyboard and mouse paths with their sinks, multiplexed by one loop
struct Bridge<S, K, M, D: MouseFinder> {
    keyboard: KeyboardStateMachine<S>,
    keyboard_sink: K,
    mouse: MouseStateMachine<D::Source>,
    mouse_sink: M,
    /// `None` when mouse forwarding is disabled
    discovery: Option<D>,
}

impl<S, K, M, D> Bridge<S, K, M, D>
where
    S: EventSource,
    K: ReportSink<KeyboardReport>,
    M: ReportSink<MouseReport>,
    D: MouseFinder,
{
    fn run_loop(&mut self, signal: &mut ShutdownSignal) -> Result<()> {
        loop {
            let slots = self.poll_slots(signal.raw_fd());
            let timeout = self
                .next_deadline()
                .map_or(-1, |due| timeout_ms(due.saturating_duration_since(Instant::now())));

            let ready = match wait_readable(&slots, timeout) {
                Ok(ready) => ready,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e).context("poll failed"),
            };
            let now = Instant::now();

            if ready.contains(&Slot::Signal) && signal.check() {
                return Ok(());
            }
            if ready.contains(&Slot::Keyboard) {
                self.service_keyboard()?;
            }
            if ready.contains(&Slot::Mouse) {
                self.service_mouse(now);
            }
            if ready.contains(&Slot::Hotplug) {
                self.service_hotplug(now);
            }
            self.on_tick(now)?;
        }
    }

    fn poll_slots(&self, signal_fd: RawFd) -> Vec<(Slot, RawFd)> {
        let mut slots = vec![(Slot::Signal, signal_fd)];
        if let Some(source) = self.keyboard.source() {
            slots.push((Slot::Keyboard, source.raw_fd()));
        }
        if let Some(source) = self.mouse.source() {
            slots.push((Slot::Mouse, source.raw_fd()));
        }
        if let Some(fd) = self.discovery.as_ref().and_then(|d| d.monitor_fd()) {
            slots.push((Slot::Hotplug, fd));
        }
        slots
    }

    /// Earliest of: coalesced flush, gadget write retries, and discovery
    /// retry while no mouse is attached
    fn next_deadline(&self) -> Option<Instant> {
        let keyboard_retry = if self.keyboard.has_unsent() {
            self.keyboard_sink.retry_at()
        } else {
            None
        };
        let mouse_retry = if self.mouse.is_deferred() {
            self.mouse_sink.retry_at()
        } else {
            None
        };
        let discovery = match &self.discovery {
            Some(d) if !self.mouse.is_active() => d.next_deadline(),
            _ => None,
        };
        [self.mouse.flush_deadline(), keyboard_retry, mouse_retry, discovery]
            .into_iter()
            .flatten()
            .min()
    }

    fn service_keyboard(&mut self) -> Result<()> {
        match self.keyboard.service(&mut self.keyboard_sink) {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                warn!("{}", e);
                Ok(())
            }
        }
    }

    fn service_mouse(&mut self, now: Instant) {
        let path = self.mouse.source().map(|s| s.path().to_path_buf());
        if let Err(e) = self.mouse.service(&mut self.mouse_sink, now) {
            self.on_mouse_error(e, path, now);
        }
    }

    fn service_hotplug(&mut self, now: Instant) {
        let events = match self.discovery.as_mut() {
            Some(discovery) => discovery.poll_hotplug(),
            None => return,
        };

        for event in events {
            match event {
                HotplugEvent::Added(info) => {
                    if self.mouse.is_active() {
                        debug!("{} added while a mouse is attached", info.devnode.display());
                        continue;
                    }
                    if let Some(source) = self.discovery.as_mut().and_then(|d| d.on_added(&info, now)) {
                        self.mouse.attach(source);
                    }
                }
                HotplugEvent::Removed(path) => {
                    if let Some(discovery) = self.discovery.as_mut() {
                        discovery.on_removed(&path);
                    }
                    let current = self.mouse.source().map_or(false, |s| s.path() == path);
                    if current {
                        info!("Mouse {} unplugged", path.display());
                        self.mouse.detach(&mut self.mouse_sink);
                        self.rescan_mouse(&path, now);
                    }
                }
            }
        }
    }

    fn on_tick(&mut self, now: Instant) -> Result<()> {
        let keyboard_due = self.keyboard_sink.retry_at().map_or(false, |due| due <= now);
        if keyboard_due && self.keyboard.has_unsent() {
            self.keyboard.retry(&mut self.keyboard_sink)?;
        }

        let path = self.mouse.source().map(|s| s.path().to_path_buf());
        if let Err(e) = self.mouse.on_tick(&mut self.mouse_sink, now) {
            self.on_mouse_error(e, path, now);
        }

        if self.mouse.is_active() {
            return Ok(());
        }
        if let Some(source) = self.discovery.as_mut().and_then(|d| d.on_tick(now)) {
            self.mouse.attach(source);
        }
        Ok(())
    }

    /// Mouse failures only ever cost the mouse
    fn on_mouse_error(&mut self, err: BridgeError, path: Option<PathBuf>, now: Instant) {
        debug_assert!(!err.is_fatal());
        warn!("{}", err);
        if self.mouse.is_active() {
            return;
        }
        match (&err, path) {
            // The gadget function is gone; another mouse would fail the same way
            (BridgeError::MouseGadget(_), _) => {}
            (_, Some(path)) => self.rescan_mouse(&path, now),
            (_, None) => {}
        }
    }

    /// After a detach, attach any other mouse that is already present
    fn rescan_mouse(&mut self, lost: &Path, now: Instant) {
        let Some(discovery) = self.discovery.as_mut() else {
            return;
        };
        if let Some(source) = discovery.scan(now, Some(lost)) {
            discovery.clear_pending();
            self.mouse.attach(source);
        }
    }
}

/// poll(2) the slots for input; returns the readable ones in slot order
fn wait_readable(slots: &[(Slot, RawFd)], timeout: libc::c_int) -> Result<Vec<Slot>, Errno> {
    // Safety: every fd is owned by a live handle for the duration of the poll
    let borrowed: Vec<BorrowedFd<'_>> = slots
        .iter()
        .map(|&(_, fd)| unsafe { BorrowedFd::borrow_raw(fd) })
        .collect();
    let mut fds: Vec<PollFd<'_>> = borrowed
        .iter()
        .map(|fd| PollFd::new(fd, PollFlags::POLLIN))
        .collect();

    poll(&mut fds, timeout)?;

    let wake = PollFlags::POLLIN | PollFlags::POLLERR | PollFlags::POLLHUP;
    Ok(fds
        .iter()
        .zip(slots)
        .filter(|(fd, _)| fd.revents().map_or(false, |r| r.intersects(wake)))
        .map(|(_, &(slot, _))| slot)
        .collect())
}
