//! libinput-backed input devices
//!
//! Each physical device gets its own libinput path context, so the
//! keyboard and the mouse have independent file descriptors and can be
//! attached, polled and dropped separately.

use input::event::device::DeviceEvent;
use input::event::keyboard::{KeyState, KeyboardEventTrait};
use input::event::pointer::{Axis, ButtonState, PointerScrollEvent};
use input::event::{Event, KeyboardEvent, PointerEvent};
use input::{DeviceCapability, Libinput, LibinputInterface};
use log::{debug, warn};
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use super::keycodes::{BTN_LEFT, KEYBOARD_PROBE_KEYS};

// EVIOCGRAB: _IOW('E', 0x90, int)
nix::ioctl_write_int!(eviocgrab, b'E', 0x90);

/// Input event as seen by the state machines
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// Key press/release (libinput never reports autorepeat)
    Key { code: u32, pressed: bool },
    /// Unaccelerated relative motion in device units
    Motion { dx: f64, dy: f64 },
    /// Pointer button press/release
    Button { code: u32, pressed: bool },
    /// Vertical wheel in v120 units, positive = towards the user
    Wheel { v120: f64 },
    /// libinput dropped the device (node removed)
    Removed,
}

/// A pollable source of input events
pub trait EventSource {
    /// evdev node path
    fn path(&self) -> &Path;

    /// Human-readable device name
    fn name(&self) -> &str;

    /// File descriptor that becomes readable when events are pending
    fn raw_fd(&self) -> RawFd;

    /// Drain every pending event into `out`, preserving device order
    fn read_events(&mut self, out: &mut Vec<InputEvent>) -> io::Result<()>;
}

/// LibinputInterface implementation for libinput
struct InputInterface {
    /// Take the device exclusively (EVIOCGRAB) after opening
    grab: bool,
}

impl LibinputInterface for InputInterface {
    fn open_restricted(&mut self, path: &Path, flags: i32) -> std::result::Result<OwnedFd, i32> {
        let f = OpenOptions::new()
            .read(true)
            .write((flags & libc::O_WRONLY != 0) || (flags & libc::O_RDWR != 0))
            .custom_flags(flags & !libc::O_WRONLY & !libc::O_RDWR & !libc::O_RDONLY)
            .open(path)
            .map_err(|e| {
                warn!("Cannot open device: {:?}: {}", path, e);
                -e.raw_os_error().unwrap_or(libc::ENOENT)
            })?;

        if self.grab {
            // Safety: fd is open and owned by `f` for the duration of the call
            match unsafe { eviocgrab(f.as_raw_fd(), 1) } {
                Ok(_) => debug!("Grabbed {:?}", path),
                Err(e) => warn!("EVIOCGRAB failed for {:?}: {}", path, e),
            }
        }

        Ok(OwnedFd::from(f))
    }

    fn close_restricted(&mut self, fd: OwnedFd) {
        // Closing the fd also releases any grab
        drop(fd);
    }
}

/// One opened evdev device
pub struct InputSource {
    /// Dedicated libinput context holding only this device
    libinput: Libinput,
    device: input::Device,
    path: PathBuf,
    name: String,
}

impl InputSource {
    /// Open `path` through libinput
    pub fn open(path: &Path, grab: bool) -> io::Result<Self> {
        let path_str = path.to_str().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "device path is not UTF-8")
        })?;

        let mut libinput = Libinput::new_from_path(InputInterface { grab });
        let device = libinput.path_add_device(path_str).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("libinput could not add {}", path_str),
            )
        })?;

        // Set fd to non-blocking
        let fd = libinput.as_raw_fd();
        let flags = nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_GETFL)?;
        let mut flags = nix::fcntl::OFlag::from_bits_truncate(flags);
        flags.insert(nix::fcntl::OFlag::O_NONBLOCK);
        nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_SETFL(flags))?;

        let name = device.name().to_string();
        debug!("Input device opened: {} ({})", path_str, name);

        Ok(Self {
            libinput,
            device,
            path: path.to_path_buf(),
            name,
        })
    }

    /// Reports keyboard capability and the keys every full keyboard has
    pub fn looks_like_keyboard(&self) -> bool {
        self.device.has_capability(DeviceCapability::Keyboard)
            && KEYBOARD_PROBE_KEYS
                .iter()
                .all(|&key| self.device.keyboard_has_key(key) == Ok(true))
    }

    /// Reports pointer capability and a left button
    pub fn looks_like_mouse(&self) -> bool {
        self.device.has_capability(DeviceCapability::Pointer)
            && self.device.pointer_has_button(BTN_LEFT) == Ok(true)
    }
}

impl EventSource for InputSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn raw_fd(&self) -> RawFd {
        self.libinput.as_raw_fd()
    }

    fn read_events(&mut self, out: &mut Vec<InputEvent>) -> io::Result<()> {
        self.libinput.dispatch()?;

        while let Some(event) = self.libinput.next() {
            match event {
                Event::Keyboard(KeyboardEvent::Key(key_event)) => out.push(InputEvent::Key {
                    code: key_event.key(),
                    pressed: key_event.key_state() == KeyState::Pressed,
                }),
                Event::Pointer(PointerEvent::Motion(motion)) => out.push(InputEvent::Motion {
                    dx: motion.dx_unaccelerated(),
                    dy: motion.dy_unaccelerated(),
                }),
                Event::Pointer(PointerEvent::Button(button)) => out.push(InputEvent::Button {
                    code: button.button(),
                    pressed: button.button_state() == ButtonState::Pressed,
                }),
                Event::Pointer(PointerEvent::ScrollWheel(scroll)) => {
                    if scroll.has_axis(Axis::Vertical) {
                        out.push(InputEvent::Wheel {
                            v120: scroll.scroll_value_v120(Axis::Vertical),
                        });
                    }
                }
                Event::Device(DeviceEvent::Removed(_)) => out.push(InputEvent::Removed),
                _ => {}
            }
        }

        Ok(())
    }
}

impl Drop for InputSource {
    fn drop(&mut self) {
        self.libinput.path_remove_device(self.device.clone());
        debug!("Input device released: {}", self.path.display());
    }
}

/// Scripted event source for state machine tests
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;

    pub struct ScriptedSource {
        path: PathBuf,
        name: String,
        batches: VecDeque<io::Result<Vec<InputEvent>>>,
    }

    impl ScriptedSource {
        pub fn new(path: &str) -> Self {
            Self {
                path: PathBuf::from(path),
                name: format!("scripted {}", path),
                batches: VecDeque::new(),
            }
        }

        /// Queue one batch returned by the next `read_events`
        pub fn push(&mut self, events: Vec<InputEvent>) -> &mut Self {
            self.batches.push_back(Ok(events));
            self
        }

        /// Queue a read failure
        pub fn fail(&mut self, errno: i32) -> &mut Self {
            self.batches.push_back(Err(io::Error::from_raw_os_error(errno)));
            self
        }
    }

    impl EventSource for ScriptedSource {
        fn path(&self) -> &Path {
            &self.path
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn raw_fd(&self) -> RawFd {
            -1
        }

        fn read_events(&mut self, out: &mut Vec<InputEvent>) -> io::Result<()> {
            match self.batches.pop_front() {
                Some(Ok(events)) => {
                    out.extend(events);
                    Ok(())
                }
                Some(Err(e)) => Err(e),
                None => Ok(()),
            }
        }
    }
}
