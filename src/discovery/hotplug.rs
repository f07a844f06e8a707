//! Input hotplug detection
//!
//! Monitors udev events for input device add/remove.
//! Integrates with the bridge event loop for mouse attach/detach.

use anyhow::{Context, Result};
use log::{debug, info};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;

use super::InputNodeInfo;

/// Hotplug event types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    /// An evdev node appeared
    Added(InputNodeInfo),
    /// An evdev node went away
    Removed(PathBuf),
}

/// udev-based hotplug monitor for input devices
pub struct HotplugMonitor {
    socket: udev::MonitorSocket,
}

impl HotplugMonitor {
    /// Create a new hotplug monitor for the input subsystem
    pub fn new() -> Result<Self> {
        let socket = udev::MonitorBuilder::new()
            .context("Failed to create udev monitor builder")?
            .match_subsystem("input")
            .context("Failed to match input subsystem")?
            .listen()
            .context("Failed to start udev monitor")?;

        info!("Input hotplug monitor initialized");
        Ok(Self { socket })
    }

    /// Get the raw file descriptor for polling
    pub fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Drain pending hotplug events (non-blocking)
    pub fn poll(&mut self) -> Vec<HotplugEvent> {
        let mut events = Vec::new();
        for event in self.socket.iter() {
            match event.event_type() {
                udev::EventType::Add => {
                    // Parent inputN devices have no devnode and are skipped here
                    if let Some(info) = InputNodeInfo::from_udev(&event) {
                        debug!("Input added: {} ({})", info.devnode.display(), info.name);
                        events.push(HotplugEvent::Added(info));
                    }
                }
                udev::EventType::Remove => {
                    if let Some(node) = event.devnode().filter(|n| InputNodeInfo::is_event_node(n)) {
                        debug!("Input removed: {}", node.display());
                        events.push(HotplugEvent::Removed(node.to_path_buf()));
                    }
                }
                _ => {}
            }
        }
        events
    }
}
