//! Error taxonomy for the bridge
//!
//! Only keyboard-path failures are fatal. Everything on the mouse path
//! degrades to "no mouse" and discovery carries on.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration values that were rejected and replaced by defaults
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Layout name is neither `us` nor `jis`
    #[error("unrecognized keyboard layout {0:?} (expected \"us\" or \"jis\")")]
    InvalidLayout(String),
}

/// Failure writing a report to a gadget endpoint
#[derive(Debug, Error)]
pub enum GadgetWriteError {
    /// Host not enumerated or busy; retry budget exhausted
    #[error("{}: write not accepted after {attempts} attempts: {source}", .node.display())]
    Transient {
        node: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// Endpoint node vanished (gadget torn down)
    #[error("{}: gadget endpoint is gone: {source}", .node.display())]
    Terminal {
        node: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl GadgetWriteError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GadgetWriteError::Terminal { .. })
    }
}

/// Top-level bridge error
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Keymap data for the selected layout could not be loaded
    #[error("keymap for layout '{layout}' unavailable: {reason}")]
    LayoutTableMissing { layout: String, reason: String },

    /// No usable keyboard after the whole retry budget
    #[error("no usable keyboard after {attempts} attempts: {reason}")]
    KeyboardDeviceOpenFailed { attempts: u32, reason: String },

    /// Keyboard disappeared or could not be read
    #[error("keyboard {device} lost: {source}")]
    KeyboardReadError {
        device: String,
        #[source]
        source: io::Error,
    },

    /// Mouse candidate could not be opened
    #[error("mouse {} could not be opened: {reason}", .device.display())]
    MouseDeviceOpenFailed { device: PathBuf, reason: String },

    /// Mouse disappeared or could not be read
    #[error("mouse {device} lost: {source}")]
    MouseReadError {
        device: String,
        #[source]
        source: io::Error,
    },

    /// Keyboard gadget write failed
    #[error("keyboard report not delivered: {0}")]
    KeyboardGadget(#[source] GadgetWriteError),

    /// Mouse gadget write failed
    #[error("mouse report not delivered: {0}")]
    MouseGadget(#[source] GadgetWriteError),
}

impl BridgeError {
    /// Whether the process must stop
    pub fn is_fatal(&self) -> bool {
        match self {
            BridgeError::LayoutTableMissing { .. }
            | BridgeError::KeyboardDeviceOpenFailed { .. }
            | BridgeError::KeyboardReadError { .. } => true,
            BridgeError::KeyboardGadget(e) => e.is_terminal(),
            BridgeError::MouseDeviceOpenFailed { .. }
            | BridgeError::MouseReadError { .. }
            | BridgeError::MouseGadget(_) => false,
        }
    }
}
