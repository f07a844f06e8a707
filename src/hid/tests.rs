//! Unit tests for the boot-protocol report codec.
//!
//! Pure logic only: no gadget nodes or input devices involved.

use super::descriptor::{KEYBOARD_REPORT_DESCRIPTOR, MOUSE_REPORT_DESCRIPTOR};
use super::report::*;
use crate::layout::KeyMapEntry;

fn down(state: KeyboardReportState, usage: u8) -> KeyboardReportState {
    state.apply_key_down(KeyMapEntry::Usage(usage))
}

fn up(state: KeyboardReportState, usage: u8) -> KeyboardReportState {
    state.apply_key_up(KeyMapEntry::Usage(usage))
}

// ═══════════════════════════════════════════════════════════════════════════
// Keyboard Report Tests
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn keyboard_press_a_b_release_a_left_packs() {
    let s = KeyboardReportState::new();
    let s = down(s, 0x04);
    assert_eq!(encode_keyboard_report(&s).0, [0, 0, 0x04, 0, 0, 0, 0, 0]);
    let s = down(s, 0x05);
    assert_eq!(encode_keyboard_report(&s).0, [0, 0, 0x04, 0x05, 0, 0, 0, 0]);
    let s = up(s, 0x04);
    assert_eq!(encode_keyboard_report(&s).0, [0, 0, 0x05, 0, 0, 0, 0, 0]);
}

#[test]
fn keyboard_seventh_key_is_dropped() {
    let mut s = KeyboardReportState::new();
    for usage in 0x04..=0x09 {
        s = down(s, usage);
    }
    let before = encode_keyboard_report(&s);
    assert!(s.is_full());

    let s = down(s, 0x0A);
    assert_eq!(encode_keyboard_report(&s), before);
    assert_eq!(before.slots(), &[0x04, 0x05, 0x06, 0x07, 0x08, 0x09]);
}

#[test]
fn keyboard_release_middle_slot_preserves_order() {
    let mut s = KeyboardReportState::new();
    for usage in [0x10, 0x11, 0x12, 0x13, 0x14] {
        s = down(s, usage);
    }
    let s = up(s, 0x12);
    assert_eq!(s.pressed(), &[0x10, 0x11, 0x13, 0x14]);
    assert_eq!(
        encode_keyboard_report(&s).0,
        [0, 0, 0x10, 0x11, 0x13, 0x14, 0, 0]
    );
}

#[test]
fn keyboard_slot_frees_after_rollover() {
    let mut s = KeyboardReportState::new();
    for usage in 0x04..=0x09 {
        s = down(s, usage);
    }
    let s = up(s, 0x04);
    let s = down(s, 0x0A);
    assert_eq!(s.pressed(), &[0x05, 0x06, 0x07, 0x08, 0x09, 0x0A]);
}

#[test]
fn keyboard_duplicate_press_is_idempotent() {
    let s = down(KeyboardReportState::new(), 0x04);
    let again = down(s, 0x04);
    assert_eq!(s, again);
    assert_eq!(again.pressed(), &[0x04]);
}

#[test]
fn keyboard_release_of_unheld_key_is_noop() {
    let s = down(KeyboardReportState::new(), 0x04);
    assert_eq!(up(s, 0x05), s);
}

#[test]
fn keyboard_modifiers_touch_only_byte_zero() {
    let s = KeyboardReportState::new()
        .apply_key_down(KeyMapEntry::Modifier(Modifiers::LEFT_SHIFT))
        .apply_key_down(KeyMapEntry::Usage(0x04))
        .apply_key_down(KeyMapEntry::Modifier(Modifiers::RIGHT_ALT));
    let report = encode_keyboard_report(&s);
    assert_eq!(report.0, [0x42, 0, 0x04, 0, 0, 0, 0, 0]);
    assert_eq!(s.pressed().len(), 1);

    let s = s.apply_key_up(KeyMapEntry::Modifier(Modifiers::LEFT_SHIFT));
    let report = encode_keyboard_report(&s);
    assert_eq!(report.modifiers(), Modifiers::RIGHT_ALT);
    assert_eq!(report.slots(), &[0x04, 0, 0, 0, 0, 0]);
}

#[test]
fn keyboard_encoding_is_deterministic() {
    let s = down(down(KeyboardReportState::new(), 0x1E), 0x1F);
    assert_eq!(encode_keyboard_report(&s), encode_keyboard_report(&s));
}

#[test]
fn keyboard_random_sequences_hold_slot_invariants() {
    // Small LCG so the sequence is reproducible without extra crates
    let mut seed: u32 = 0x2545_F491;
    let mut next = move || {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        seed >> 16
    };

    let mut s = KeyboardReportState::new();
    for _ in 0..5000 {
        let usage = 0x04 + (next() % 12) as u8;
        s = if next() % 3 == 0 { up(s, usage) } else { down(s, usage) };

        let report = encode_keyboard_report(&s);
        let held: Vec<u8> = report.slots().iter().copied().filter(|&u| u != 0).collect();
        assert!(held.len() <= 6);
        let mut dedup = held.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), held.len(), "duplicate usage in {:?}", report);
        // Non-zero usages are contiguous from slot 0
        assert!(report.slots()[held.len()..].iter().all(|&u| u == 0));
        assert_eq!(report.0[1], 0);
    }
}

#[test]
fn keyboard_released_constant_is_all_zero() {
    assert_eq!(
        encode_keyboard_report(&KeyboardReportState::new()),
        KeyboardReport::RELEASED
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// Mouse Report Tests
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn mouse_deltas_accumulate() {
    let mut s = MouseReportState::new();
    s.add_motion(3, -2);
    s.add_motion(4, -1);
    s.add_wheel(1);
    let report = encode_mouse_report(&s);
    assert_eq!(report.dx(), 7);
    assert_eq!(report.dy(), -3);
    assert_eq!(report.wheel(), 1);
}

#[test]
fn mouse_clamps_only_at_encode() {
    let mut s = MouseReportState::new();
    for _ in 0..10 {
        s.add_motion(50, -50);
    }
    assert_eq!(s.dx, 500);
    assert_eq!(s.dy, -500);

    let report = encode_mouse_report(&s);
    assert_eq!(report.dx(), 127);
    assert_eq!(report.dy(), -127);
    assert_eq!(report.0[1], 0x7F);
    assert_eq!(report.0[2], 0x81);
}

#[test]
fn mouse_accumulator_saturates() {
    let mut s = MouseReportState::new();
    s.add_motion(i32::MAX, i32::MIN);
    s.add_motion(10, -10);
    assert_eq!(s.dx, i32::MAX);
    assert_eq!(s.dy, i32::MIN);
}

#[test]
fn mouse_buttons_map_to_low_bits() {
    let mut s = MouseReportState::new();
    s.set_button(MouseButtons::LEFT, true);
    s.set_button(MouseButtons::MIDDLE, true);
    assert_eq!(encode_mouse_report(&s).0, [0x05, 0, 0, 0]);
    s.set_button(MouseButtons::LEFT, false);
    assert_eq!(encode_mouse_report(&s).buttons(), MouseButtons::MIDDLE);
}

#[test]
fn mouse_clear_motion_keeps_buttons() {
    let mut s = MouseReportState::new();
    s.set_button(MouseButtons::RIGHT, true);
    s.add_motion(5, 5);
    s.clear_motion();
    assert!(!s.has_motion());
    assert_eq!(encode_mouse_report(&s).0, [0x02, 0, 0, 0]);
}

// ═══════════════════════════════════════════════════════════════════════════
// Descriptor Tests
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn descriptors_are_closed_collections() {
    assert_eq!(KEYBOARD_REPORT_DESCRIPTOR.last(), Some(&0xC0));
    assert_eq!(&MOUSE_REPORT_DESCRIPTOR[MOUSE_REPORT_DESCRIPTOR.len() - 2..], &[0xC0, 0xC0]);
}

#[test]
fn descriptor_escaping() {
    assert_eq!(
        super::descriptor::escaped(&[0x05, 0x01, 0xA1]),
        "\\x05\\x01\\xa1"
    );
}

#[test]
fn report_lengths_match_functions() {
    assert_eq!(<KeyboardReport as HidReport>::LEN, 8);
    assert_eq!(<MouseReport as HidReport>::LEN, 4);
    assert_eq!(KeyboardReport::RELEASED.as_bytes().len(), 8);
    assert_eq!(MouseReport::IDLE.as_bytes().len(), 4);
}
