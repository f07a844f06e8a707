//! Keyboard state machine
//!
//! Folds key events from the built-in keyboard into boot reports and
//! writes a report only when it differs from the last one the host
//! accepted. Losing the keyboard is fatal for the bridge.

use log::{debug, info, trace, warn};
use std::io;

use super::device::{EventSource, InputEvent};
use crate::error::BridgeError;
use crate::gadget::ReportSink;
use crate::hid::{encode_keyboard_report, KeyboardReport, KeyboardReportState};
use crate::layout::KeyMap;

enum KeyboardPhase<S> {
    Uninitialized,
    Active(S),
}

/// Keyboard path: device handle, key state and last emitted report
pub struct KeyboardStateMachine<S> {
    keymap: KeyMap,
    phase: KeyboardPhase<S>,
    state: KeyboardReportState,
    /// Last report the gadget accepted
    last_emitted: Option<KeyboardReport>,
    /// Physical keys currently down, by Linux code
    held: Vec<u32>,
    /// Reused event buffer
    events: Vec<InputEvent>,
}

impl<S: EventSource> KeyboardStateMachine<S> {
    pub fn new(keymap: KeyMap) -> Self {
        Self {
            keymap,
            phase: KeyboardPhase::Uninitialized,
            state: KeyboardReportState::new(),
            last_emitted: None,
            held: Vec::with_capacity(8),
            events: Vec::with_capacity(32),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.phase, KeyboardPhase::Active(_))
    }

    pub fn source(&self) -> Option<&S> {
        match &self.phase {
            KeyboardPhase::Active(source) => Some(source),
            KeyboardPhase::Uninitialized => None,
        }
    }

    pub fn last_emitted(&self) -> Option<KeyboardReport> {
        self.last_emitted
    }

    /// Take ownership of the keyboard and start from an all-released report
    pub fn attach<W: ReportSink<KeyboardReport>>(
        &mut self,
        source: S,
        sink: &mut W,
    ) -> Result<(), BridgeError> {
        info!(
            "Keyboard active: {} ({}), layout={}",
            source.path().display(),
            source.name(),
            self.keymap.variant()
        );
        self.phase = KeyboardPhase::Active(source);
        self.state = KeyboardReportState::new();
        self.last_emitted = None;
        self.held.clear();
        self.emit(sink)
    }

    /// True while the host has not accepted the current key state
    pub fn has_unsent(&self) -> bool {
        self.is_active() && self.last_emitted != Some(encode_keyboard_report(&self.state))
    }

    /// Offer the current state again after a rejected write
    pub fn retry<W: ReportSink<KeyboardReport>>(
        &mut self,
        sink: &mut W,
    ) -> Result<(), BridgeError> {
        if !self.is_active() {
            return Ok(());
        }
        self.emit(sink)
    }

    /// Drain pending device events and forward the resulting reports
    pub fn service<W: ReportSink<KeyboardReport>>(
        &mut self,
        sink: &mut W,
    ) -> Result<(), BridgeError> {
        let source = match &mut self.phase {
            KeyboardPhase::Active(source) => source,
            KeyboardPhase::Uninitialized => return Ok(()),
        };

        let mut events = std::mem::take(&mut self.events);
        events.clear();
        if let Err(e) = source.read_events(&mut events) {
            return Err(BridgeError::KeyboardReadError {
                device: source.path().display().to_string(),
                source: e,
            });
        }

        let mut result = Ok(());
        for event in events.drain(..) {
            result = self.handle_event(event, sink);
            if result.is_err() {
                break;
            }
        }
        self.events = events;
        result
    }

    /// Apply one event; unmapped keys and pointer events are ignored
    pub fn handle_event<W: ReportSink<KeyboardReport>>(
        &mut self,
        event: InputEvent,
        sink: &mut W,
    ) -> Result<(), BridgeError> {
        match event {
            InputEvent::Key { code, pressed } => {
                let Some(entry) = self.keymap.lookup(code) else {
                    trace!("keyboard: unmapped key {} ignored", code);
                    return Ok(());
                };
                trace!("keyboard: key {} {} -> {:?}", code, if pressed { "down" } else { "up" }, entry);

                if pressed {
                    if !self.held.contains(&code) {
                        self.held.push(code);
                    }
                    if self.state.is_full() {
                        debug!("keyboard: rollover, key {} dropped", code);
                    }
                    self.state = self.state.apply_key_down(entry);
                } else {
                    self.held.retain(|&c| c != code);
                    // Two physical keys can share a usage (Compose and Menu)
                    let shared = self.held.iter().any(|&c| self.keymap.lookup(c) == Some(entry));
                    if shared {
                        trace!("keyboard: usage of key {} still held by another key", code);
                        return Ok(());
                    }
                    self.state = self.state.apply_key_up(entry);
                }
                self.emit(sink)
            }
            InputEvent::Removed => Err(BridgeError::KeyboardReadError {
                device: self.device_label(),
                source: io::Error::from_raw_os_error(libc::ENODEV),
            }),
            _ => Ok(()),
        }
    }

    /// Write the current state if it changed since the last accepted report
    fn emit<W: ReportSink<KeyboardReport>>(&mut self, sink: &mut W) -> Result<(), BridgeError> {
        let report = encode_keyboard_report(&self.state);
        if self.last_emitted == Some(report) {
            return Ok(());
        }

        trace!("keyboard: {:?}", report);
        match sink.send(&report) {
            Ok(()) => {
                self.last_emitted = Some(report);
                Ok(())
            }
            Err(e) if e.is_terminal() => Err(BridgeError::KeyboardGadget(e)),
            Err(e) => {
                // Retried at the sink's deadline or on the next key event
                debug!("keyboard: {}", e);
                Ok(())
            }
        }
    }

    /// Release every key on the host and drop the device handle
    pub fn shutdown<W: ReportSink<KeyboardReport>>(&mut self, sink: &mut W) {
        if !self.is_active() {
            return;
        }
        self.state = KeyboardReportState::new();
        self.held.clear();
        if self.last_emitted != Some(KeyboardReport::RELEASED) {
            if let Err(e) = sink.send(&KeyboardReport::RELEASED) {
                warn!("keyboard: release-all on shutdown failed: {}", e);
            }
        }
        let label = self.device_label();
        self.phase = KeyboardPhase::Uninitialized;
        info!("Keyboard released: {}", label);
    }

    fn device_label(&self) -> String {
        match &self.phase {
            KeyboardPhase::Active(source) => {
                format!("{} ({})", source.path().display(), source.name())
            }
            KeyboardPhase::Uninitialized => "<none>".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gadget::testing::RecordingSink;
    use crate::input::device::testing::ScriptedSource;
    use crate::input::keycodes::*;
    use crate::layout::LayoutVariant;

    fn key(code: u32, pressed: bool) -> InputEvent {
        InputEvent::Key { code, pressed }
    }

    fn active(
        variant: LayoutVariant,
        source: ScriptedSource,
    ) -> (KeyboardStateMachine<ScriptedSource>, RecordingSink<KeyboardReport>) {
        let mut kb = KeyboardStateMachine::new(KeyMap::builtin(variant));
        let mut sink = RecordingSink::new();
        kb.attach(source, &mut sink).unwrap();
        (kb, sink)
    }

    #[test]
    fn test_attach_sends_released_report() {
        let (kb, sink) = active(LayoutVariant::Us, ScriptedSource::new("/dev/input/event0"));
        assert!(kb.is_active());
        assert_eq!(sink.sent, vec![KeyboardReport::RELEASED]);
    }

    #[test]
    fn test_us_a_b_release_a_sequence() {
        let mut source = ScriptedSource::new("/dev/input/event0");
        source.push(vec![key(KEY_A, true), key(KEY_B, true), key(KEY_A, false)]);
        let (mut kb, mut sink) = active(LayoutVariant::Us, source);

        kb.service(&mut sink).unwrap();
        let sent: Vec<[u8; 8]> = sink.sent.iter().skip(1).map(|r| r.0).collect();
        assert_eq!(
            sent,
            vec![
                [0, 0, 0x04, 0, 0, 0, 0, 0],
                [0, 0, 0x04, 0x05, 0, 0, 0, 0],
                [0, 0, 0x05, 0, 0, 0, 0, 0],
            ]
        );
    }

    #[test]
    fn test_unchanged_state_is_not_rewritten() {
        let mut source = ScriptedSource::new("/dev/input/event0");
        // Second press of A and release of an unmapped key change nothing
        source.push(vec![key(KEY_A, true), key(KEY_A, true), key(0x2fe, false)]);
        let (mut kb, mut sink) = active(LayoutVariant::Us, source);

        kb.service(&mut sink).unwrap();
        assert_eq!(sink.sent.len(), 2);
    }

    #[test]
    fn test_seventh_key_does_not_emit() {
        let mut source = ScriptedSource::new("/dev/input/event0");
        let codes = [KEY_A, KEY_S, KEY_D, KEY_F, KEY_G, KEY_H, KEY_J];
        source.push(codes.iter().map(|&c| key(c, true)).collect());
        let (mut kb, mut sink) = active(LayoutVariant::Us, source);

        kb.service(&mut sink).unwrap();
        // released + six growing reports, nothing for the seventh key
        assert_eq!(sink.sent.len(), 7);
        assert_eq!(
            kb.last_emitted().unwrap().slots(),
            &[0x04, 0x16, 0x07, 0x09, 0x0A, 0x0B]
        );
    }

    #[test]
    fn test_modifier_only_changes_byte_zero() {
        let mut source = ScriptedSource::new("/dev/input/event0");
        source.push(vec![key(KEY_LEFTSHIFT, true), key(KEY_A, true), key(KEY_LEFTSHIFT, false)]);
        let (mut kb, mut sink) = active(LayoutVariant::Us, source);

        kb.service(&mut sink).unwrap();
        let sent: Vec<[u8; 8]> = sink.sent.iter().skip(1).map(|r| r.0).collect();
        assert_eq!(
            sent,
            vec![
                [0x02, 0, 0, 0, 0, 0, 0, 0],
                [0x02, 0, 0x04, 0, 0, 0, 0, 0],
                [0x00, 0, 0x04, 0, 0, 0, 0, 0],
            ]
        );
    }

    #[test]
    fn test_jis_yen_key() {
        let mut source = ScriptedSource::new("/dev/input/event0");
        source.push(vec![key(KEY_YEN, true), key(KEY_RO, true)]);
        let (mut kb, mut sink) = active(LayoutVariant::Jis, source);

        kb.service(&mut sink).unwrap();
        assert_eq!(kb.last_emitted().unwrap().slots(), &[0x89, 0x87, 0, 0, 0, 0]);
    }

    #[test]
    fn test_transient_write_error_is_retried_on_next_event() {
        let mut source = ScriptedSource::new("/dev/input/event0");
        source.push(vec![key(KEY_A, true)]);
        source.push(vec![key(KEY_B, true)]);
        let (mut kb, mut sink) = active(LayoutVariant::Us, source);

        sink.fail_transient("/dev/hidg0");
        kb.service(&mut sink).unwrap();
        assert_eq!(sink.sent.len(), 1);
        assert_eq!(kb.last_emitted(), Some(KeyboardReport::RELEASED));

        kb.service(&mut sink).unwrap();
        assert_eq!(sink.sent.last().unwrap().0, [0, 0, 0x04, 0x05, 0, 0, 0, 0]);
    }

    #[test]
    fn test_rejected_final_release_is_retried_without_new_events() {
        let mut source = ScriptedSource::new("/dev/input/event0");
        source.push(vec![key(KEY_A, true)]);
        source.push(vec![key(KEY_A, false)]);
        let (mut kb, mut sink) = active(LayoutVariant::Us, source);
        kb.service(&mut sink).unwrap();
        assert!(!kb.has_unsent());

        // Host rejects the key-up; nothing else will be typed
        sink.fail_transient("/dev/hidg0");
        kb.service(&mut sink).unwrap();
        assert_eq!(kb.last_emitted().unwrap().slots()[0], 0x04);
        assert!(kb.has_unsent());
        assert!(sink.retry_at().is_some());

        kb.retry(&mut sink).unwrap();
        assert!(!kb.has_unsent());
        assert_eq!(sink.sent.last(), Some(&KeyboardReport::RELEASED));
        assert_eq!(sink.retry_at(), None);
    }

    #[test]
    fn test_shared_usage_stays_held_until_last_key_up() {
        let mut source = ScriptedSource::new("/dev/input/event0");
        source.push(vec![key(KEY_COMPOSE, true), key(KEY_MENU, true), key(KEY_COMPOSE, false)]);
        source.push(vec![key(KEY_MENU, false)]);
        let (mut kb, mut sink) = active(LayoutVariant::Us, source);

        kb.service(&mut sink).unwrap();
        assert_eq!(kb.last_emitted().unwrap().slots()[0], 0x65);
        assert_eq!(sink.sent.len(), 2);

        kb.service(&mut sink).unwrap();
        assert_eq!(kb.last_emitted(), Some(KeyboardReport::RELEASED));
    }

    #[test]
    fn test_terminal_write_error_is_fatal() {
        let mut source = ScriptedSource::new("/dev/input/event0");
        source.push(vec![key(KEY_A, true)]);
        let (mut kb, mut sink) = active(LayoutVariant::Us, source);

        sink.fail_terminal("/dev/hidg0");
        let err = kb.service(&mut sink).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_read_failure_is_fatal() {
        let mut source = ScriptedSource::new("/dev/input/event0");
        source.fail(libc::ENODEV);
        let (mut kb, mut sink) = active(LayoutVariant::Us, source);

        let err = kb.service(&mut sink).unwrap_err();
        assert!(matches!(err, BridgeError::KeyboardReadError { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_device_removal_is_fatal() {
        let mut source = ScriptedSource::new("/dev/input/event0");
        source.push(vec![key(KEY_A, true), InputEvent::Removed, key(KEY_B, true)]);
        let (mut kb, mut sink) = active(LayoutVariant::Us, source);

        assert!(kb.service(&mut sink).unwrap_err().is_fatal());
        // B was never processed
        assert_eq!(kb.last_emitted().unwrap().slots()[1], 0);
    }

    #[test]
    fn test_shutdown_releases_held_keys() {
        let mut source = ScriptedSource::new("/dev/input/event0");
        source.push(vec![key(KEY_A, true)]);
        let (mut kb, mut sink) = active(LayoutVariant::Us, source);
        kb.service(&mut sink).unwrap();

        kb.shutdown(&mut sink);
        assert!(!kb.is_active());
        assert_eq!(sink.sent.last(), Some(&KeyboardReport::RELEASED));
    }

    #[test]
    fn test_uninitialized_ignores_service() {
        let mut kb: KeyboardStateMachine<ScriptedSource> =
            KeyboardStateMachine::new(KeyMap::builtin(LayoutVariant::Us));
        let mut sink = RecordingSink::new();
        kb.service(&mut sink).unwrap();
        kb.shutdown(&mut sink);
        assert!(sink.sent.is_empty());
    }
}
