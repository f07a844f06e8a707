//! Global constants for hidg-bridge
//!
//! Consolidates timing, path, and report-size constants
//! to eliminate magic numbers throughout the codebase.

use std::time::Duration;

// ============================================================================
// Report Sizes
// ============================================================================

/// Boot-protocol keyboard report length in bytes
pub const KEYBOARD_REPORT_LEN: usize = 8;

/// Boot-protocol mouse report length in bytes
pub const MOUSE_REPORT_LEN: usize = 4;

/// Number of simultaneous non-modifier keys a boot keyboard report carries
pub const KEYBOARD_ROLLOVER: usize = 6;

/// Smallest relative value a boot mouse field can carry
pub const MOUSE_AXIS_MIN: i32 = -127;

/// Largest relative value a boot mouse field can carry
pub const MOUSE_AXIS_MAX: i32 = 127;

/// libinput v120 units per physical wheel detent
pub const WHEEL_V120_PER_DETENT: f64 = 120.0;

// ============================================================================
// Default Paths
// ============================================================================

/// Keyboard gadget function node
pub const DEFAULT_KEYBOARD_NODE: &str = "/dev/hidg0";

/// Mouse gadget function node
pub const DEFAULT_MOUSE_NODE: &str = "/dev/hidg1";

/// sysfs class directory listing USB device controllers
pub const UDC_CLASS_DIR: &str = "/sys/class/udc";

/// configfs root for USB gadgets
pub const CONFIGFS_GADGET_DIR: &str = "/sys/kernel/config/usb_gadget";

/// Prefix of evdev nodes handled by libinput
pub const INPUT_EVENT_PREFIX: &str = "/dev/input/event";

// ============================================================================
// Timing Constants
// ============================================================================

/// Upper bound for exponential open backoff
pub const MAX_OPEN_BACKOFF: Duration = Duration::from_secs(5);

/// Upper bound for the delay before a gadget write is retried
pub const MAX_WRITE_BACKOFF: Duration = Duration::from_millis(500);

/// Readiness probes between progress log lines
pub const READY_LOG_EVERY: u32 = 10;
