//! USB HID gadget side
//!
//! - `endpoint`: typed writer for one `/dev/hidgN` function node
//! - `readiness`: UDC / configfs / device node probe gating startup

pub mod endpoint;
pub mod readiness;

pub use endpoint::{GadgetEndpoint, WritePolicy};
pub use readiness::{Readiness, ReadinessProbe};

use std::time::Instant;

use crate::error::GadgetWriteError;
use crate::hid::HidReport;

/// Destination for encoded reports of one kind
pub trait ReportSink<R: HidReport> {
    /// Write one report without blocking
    fn send(&mut self, report: &R) -> Result<(), GadgetWriteError>;

    /// When a report rejected by `send` should be offered again.
    /// `None` while the sink has no failed write outstanding.
    fn retry_at(&self) -> Option<Instant> {
        None
    }
}
