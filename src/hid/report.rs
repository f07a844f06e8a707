//! Boot-protocol report state and encoding
//!
//! Keyboard report (8 bytes):
//! ```text
//! Byte 0: Modifier bitmask (LCtrl, LShift, LAlt, LMeta, RCtrl, RShift, RAlt, RMeta)
//! Byte 1: Reserved (0x00)
//! Byte 2-7: Up to 6 pressed key usages, oldest first, zero padded
//! ```
//!
//! Mouse report (4 bytes):
//! ```text
//! Byte 0: Buttons (bit 0 = left, bit 1 = right, bit 2 = middle)
//! Byte 1: X displacement  (i8)
//! Byte 2: Y displacement  (i8)
//! Byte 3: Wheel           (i8, positive = away from user)
//! ```
//!
//! Everything here is pure. State changes return a new value and encoding
//! never fails.

use bitflags::bitflags;
use std::fmt;

use crate::constants::{
    KEYBOARD_REPORT_LEN, KEYBOARD_ROLLOVER, MOUSE_AXIS_MAX, MOUSE_AXIS_MIN, MOUSE_REPORT_LEN,
};
use crate::layout::KeyMapEntry;

bitflags! {
    /// Keyboard report modifier byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        const LEFT_CTRL = 0x01;
        const LEFT_SHIFT = 0x02;
        const LEFT_ALT = 0x04;
        const LEFT_META = 0x08;
        const RIGHT_CTRL = 0x10;
        const RIGHT_SHIFT = 0x20;
        const RIGHT_ALT = 0x40;
        const RIGHT_META = 0x80;
    }
}

bitflags! {
    /// Mouse report button byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MouseButtons: u8 {
        const LEFT = 0x01;
        const RIGHT = 0x02;
        const MIDDLE = 0x04;
    }
}

/// A fixed-size report accepted by one gadget function
pub trait HidReport: Copy + PartialEq + fmt::Debug {
    /// Exact byte length the gadget function declares
    const LEN: usize;
    /// Function name for log lines
    const FUNCTION: &'static str;

    fn as_bytes(&self) -> &[u8];
}

/// Encoded keyboard report
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyboardReport(pub [u8; KEYBOARD_REPORT_LEN]);

impl KeyboardReport {
    /// All keys released
    pub const RELEASED: Self = Self([0; KEYBOARD_REPORT_LEN]);

    pub fn modifiers(&self) -> Modifiers {
        Modifiers::from_bits_retain(self.0[0])
    }

    /// Usage slots, including trailing zeros
    pub fn slots(&self) -> &[u8] {
        &self.0[2..]
    }
}

impl HidReport for KeyboardReport {
    const LEN: usize = KEYBOARD_REPORT_LEN;
    const FUNCTION: &'static str = "keyboard";

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for KeyboardReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyboardReport({:02x?})", self.0)
    }
}

/// Encoded mouse report
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct MouseReport(pub [u8; MOUSE_REPORT_LEN]);

impl MouseReport {
    /// No buttons, no motion
    pub const IDLE: Self = Self([0; MOUSE_REPORT_LEN]);

    pub fn buttons(&self) -> MouseButtons {
        MouseButtons::from_bits_retain(self.0[0])
    }

    pub fn dx(&self) -> i8 {
        self.0[1] as i8
    }

    pub fn dy(&self) -> i8 {
        self.0[2] as i8
    }

    pub fn wheel(&self) -> i8 {
        self.0[3] as i8
    }
}

impl HidReport for MouseReport {
    const LEN: usize = MOUSE_REPORT_LEN;
    const FUNCTION: &'static str = "mouse";

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for MouseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MouseReport(buttons={:#04x}, dx={}, dy={}, wheel={})",
            self.0[0],
            self.dx(),
            self.dy(),
            self.wheel()
        )
    }
}

// ============================================================================
// Keyboard State
// ============================================================================

/// Logical keyboard state: modifier byte plus up to 6 held usages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyboardReportState {
    modifiers: Modifiers,
    keys: [u8; KEYBOARD_ROLLOVER],
    len: usize,
}

impl KeyboardReportState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn modifiers(&self) -> Modifiers {
        self.modifiers
    }

    /// Held usages in press order
    pub fn pressed(&self) -> &[u8] {
        &self.keys[..self.len]
    }

    /// All six usage slots are taken
    pub fn is_full(&self) -> bool {
        self.len >= KEYBOARD_ROLLOVER
    }

    /// Fold a key press into the state.
    ///
    /// A seventh distinct usage is dropped; held keys are never evicted.
    #[must_use]
    pub fn apply_key_down(mut self, entry: KeyMapEntry) -> Self {
        match entry {
            KeyMapEntry::Modifier(bit) => self.modifiers.insert(bit),
            KeyMapEntry::Usage(0) => {}
            KeyMapEntry::Usage(usage) => {
                if !self.pressed().contains(&usage) && !self.is_full() {
                    self.keys[self.len] = usage;
                    self.len += 1;
                }
            }
        }
        self
    }

    /// Fold a key release into the state, left-packing the remaining usages
    #[must_use]
    pub fn apply_key_up(mut self, entry: KeyMapEntry) -> Self {
        match entry {
            KeyMapEntry::Modifier(bit) => self.modifiers.remove(bit),
            KeyMapEntry::Usage(0) => {}
            KeyMapEntry::Usage(usage) => {
                if let Some(pos) = self.pressed().iter().position(|&k| k == usage) {
                    self.keys.copy_within(pos + 1..self.len, pos);
                    self.len -= 1;
                    self.keys[self.len] = 0;
                }
            }
        }
        self
    }
}

/// Encode keyboard state into the 8-byte boot report
pub fn encode_keyboard_report(state: &KeyboardReportState) -> KeyboardReport {
    debug_assert!(state.len <= KEYBOARD_ROLLOVER, "more than 6 usages held");
    let mut buf = [0u8; KEYBOARD_REPORT_LEN];
    buf[0] = state.modifiers.bits();
    buf[2..2 + state.len].copy_from_slice(state.pressed());
    KeyboardReport(buf)
}

// ============================================================================
// Mouse State
// ============================================================================

/// Logical mouse state: buttons plus deltas accumulated since the last flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MouseReportState {
    pub buttons: MouseButtons,
    pub dx: i32,
    pub dy: i32,
    pub wheel: i32,
}

impl MouseReportState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add relative motion; deltas accumulate, they never overwrite
    pub fn add_motion(&mut self, dx: i32, dy: i32) {
        self.dx = self.dx.saturating_add(dx);
        self.dy = self.dy.saturating_add(dy);
    }

    pub fn add_wheel(&mut self, detents: i32) {
        self.wheel = self.wheel.saturating_add(detents);
    }

    pub fn set_button(&mut self, button: MouseButtons, pressed: bool) {
        self.buttons.set(button, pressed);
    }

    /// Any relative data waiting to be flushed
    pub fn has_motion(&self) -> bool {
        self.dx != 0 || self.dy != 0 || self.wheel != 0
    }

    /// Reset accumulators after a report went out
    pub fn clear_motion(&mut self) {
        self.dx = 0;
        self.dy = 0;
        self.wheel = 0;
    }
}

#[inline]
fn clamp_axis(v: i32) -> u8 {
    v.clamp(MOUSE_AXIS_MIN, MOUSE_AXIS_MAX) as i8 as u8
}

/// Encode mouse state into the 4-byte boot report, clamping each axis
pub fn encode_mouse_report(state: &MouseReportState) -> MouseReport {
    MouseReport([
        state.buttons.bits(),
        clamp_axis(state.dx),
        clamp_axis(state.dy),
        clamp_axis(state.wheel),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "more than 6 usages held")]
    fn test_encode_rejects_overfull_state() {
        let state = KeyboardReportState {
            modifiers: Modifiers::empty(),
            keys: [0x04, 0x05, 0x06, 0x07, 0x08, 0x09],
            len: KEYBOARD_ROLLOVER + 1,
        };
        encode_keyboard_report(&state);
    }
}
