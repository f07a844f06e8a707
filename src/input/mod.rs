//! Input handling
//!
//! Reads the built-in keyboard and an optional mouse through libinput.
//! - `device`: one libinput path context per evdev node
//! - `keyboard` / `mouse`: state machines turning events into HID reports
//! - `keycodes`: Linux input event codes

pub mod device;
pub mod keyboard;
pub mod keycodes;
pub mod mouse;

pub use device::{EventSource, InputEvent, InputSource};
pub use keyboard::KeyboardStateMachine;
pub use mouse::{FlushPolicy, MouseStateMachine};
