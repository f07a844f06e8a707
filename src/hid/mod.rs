//! USB HID boot-protocol reports
//!
//! - `report`: keyboard/mouse state and the pure report codec
//! - `descriptor`: the matching report descriptors

pub mod descriptor;
pub mod report;

#[cfg(test)]
mod tests;

pub use report::{
    encode_keyboard_report, encode_mouse_report, HidReport, KeyboardReport, KeyboardReportState,
    Modifiers, MouseButtons, MouseReport, MouseReportState,
};
