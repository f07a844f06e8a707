//! Input device discovery
//!
//! Enumerates evdev nodes through udev, picks the keyboard and mouse
//! candidates, and opens them. The keyboard open is retried with
//! exponential backoff at startup; mouse opens are retried on the event
//! loop's clock so they never stall keyboard forwarding.

pub mod hotplug;

use log::{debug, info, warn};
use std::io;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::{KeyboardConfig, MouseConfig};
use crate::constants::{INPUT_EVENT_PREFIX, MAX_OPEN_BACKOFF};
use crate::error::BridgeError;
use crate::input::{EventSource, InputSource};
pub use hotplug::{HotplugEvent, HotplugMonitor};

/// What udev knows about one evdev node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputNodeInfo {
    pub devnode: PathBuf,
    /// Device name from the parent input device
    pub name: String,
    /// Physical path (e.g. "usb-0000:01:00.0-1.3/input0")
    pub phys: String,
    /// udev ID_INPUT_KEYBOARD
    pub is_keyboard: bool,
    /// udev ID_INPUT_MOUSE
    pub is_mouse: bool,
}

impl InputNodeInfo {
    /// Summarize a udev device; `None` unless it is an evdev node
    pub fn from_udev(device: &udev::Device) -> Option<Self> {
        let devnode = device.devnode()?;
        if !Self::is_event_node(devnode) {
            return None;
        }

        let parent = device.parent();
        let attr = |key: &str| {
            parent
                .as_ref()
                .and_then(|p| p.attribute_value(key))
                .map(|v| v.to_string_lossy().trim().to_string())
                .unwrap_or_default()
        };
        let flag = |key: &str| device.property_value(key).map_or(false, |v| v == "1");

        Some(Self {
            devnode: devnode.to_path_buf(),
            name: attr("name"),
            phys: attr("phys"),
            is_keyboard: flag("ID_INPUT_KEYBOARD"),
            is_mouse: flag("ID_INPUT_MOUSE"),
        })
    }

    pub fn is_event_node(path: &Path) -> bool {
        path.to_string_lossy().starts_with(INPUT_EVENT_PREFIX)
    }

    fn name_contains(&self, needle: &str) -> bool {
        let needle = needle.to_ascii_lowercase();
        self.name.to_ascii_lowercase().contains(&needle)
            || self.phys.to_ascii_lowercase().contains(&needle)
    }
}

/// Numeric suffix of /dev/input/eventN, for natural ordering
fn event_index(path: &Path) -> u32 {
    path.to_string_lossy()
        .strip_prefix(INPUT_EVENT_PREFIX)
        .and_then(|n| n.parse().ok())
        .unwrap_or(u32::MAX)
}

/// List evdev nodes in the input subsystem
pub fn enumerate_input_nodes() -> io::Result<Vec<InputNodeInfo>> {
    let mut enumerator = udev::Enumerator::new()?;
    enumerator.match_subsystem("input")?;
    let mut nodes: Vec<InputNodeInfo> = enumerator
        .scan_devices()?
        .filter_map(|d| InputNodeInfo::from_udev(&d))
        .collect();
    nodes.sort_by_key(|n| event_index(&n.devnode));
    Ok(nodes)
}

// ============================================================================
// Candidate Selection
// ============================================================================

/// Keyboard candidates in preference order.
///
/// An explicit device wins outright. Otherwise udev keyboards, filtered
/// by `name_match` when set, with "keyboard" in the name first.
pub fn keyboard_candidates(
    nodes: &[InputNodeInfo],
    explicit: Option<&Path>,
    name_match: &str,
) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.to_path_buf()];
    }

    let name_match = name_match.trim();
    let mut picked: Vec<&InputNodeInfo> = nodes
        .iter()
        .filter(|n| n.is_keyboard)
        .filter(|n| name_match.is_empty() || n.name_contains(name_match))
        .collect();
    picked.sort_by_key(|n| (!n.name_contains("keyboard"), event_index(&n.devnode)));
    picked.into_iter().map(|n| n.devnode.clone()).collect()
}

/// Mouse candidates in preference order, never including `exclude`
pub fn mouse_candidates(
    nodes: &[InputNodeInfo],
    explicit: Option<&Path>,
    exclude: &[&Path],
) -> Vec<PathBuf> {
    let allowed = |p: &Path| !exclude.iter().any(|e| *e == p);

    if let Some(path) = explicit {
        let present = nodes.iter().any(|n| n.devnode == path) || path.exists();
        return if present && allowed(path) {
            vec![path.to_path_buf()]
        } else {
            Vec::new()
        };
    }

    let mut picked: Vec<&InputNodeInfo> = nodes
        .iter()
        .filter(|n| n.is_mouse && allowed(&n.devnode))
        .collect();
    picked.sort_by_key(|n| (!n.name_contains("mouse"), event_index(&n.devnode)));
    picked.into_iter().map(|n| n.devnode.clone()).collect()
}

/// Does a freshly added node qualify as the mouse?
pub fn is_mouse_candidate(info: &InputNodeInfo, explicit: Option<&Path>, keyboard: &Path) -> bool {
    if info.devnode == keyboard {
        return false;
    }
    match explicit {
        Some(path) => info.devnode == path,
        None => info.is_mouse,
    }
}

/// Exponential backoff: `initial`, doubled per step, capped
pub fn backoff_schedule(initial: Duration, steps: u32) -> impl Iterator<Item = Duration> {
    let mut delay = initial;
    (0..steps).map(move |_| {
        let current = delay.min(MAX_OPEN_BACKOFF);
        delay = delay.saturating_mul(2);
        current
    })
}

// ============================================================================
// Keyboard
// ============================================================================

/// Open the built-in keyboard, retrying with bounded backoff.
///
/// `wait` sleeps for the given delay and returns false if shutdown was
/// requested meanwhile, in which case `Ok(None)` is returned.
pub fn open_keyboard(
    cfg: &KeyboardConfig,
    mut wait: impl FnMut(Duration) -> bool,
) -> Result<Option<InputSource>, BridgeError> {
    let attempts = cfg.open_retries + 1;
    let mut delays = backoff_schedule(cfg.open_backoff(), cfg.open_retries);
    let mut last_reason = String::new();

    for attempt in 1..=attempts {
        match try_open_keyboard(cfg) {
            Ok(source) => return Ok(Some(source)),
            Err(reason) => {
                warn!("Keyboard not ready (attempt {}/{}): {}", attempt, attempts, reason);
                last_reason = reason;
            }
        }
        if let Some(delay) = delays.next() {
            if !wait(delay) {
                return Ok(None);
            }
        }
    }

    Err(BridgeError::KeyboardDeviceOpenFailed {
        attempts,
        reason: last_reason,
    })
}

fn try_open_keyboard(cfg: &KeyboardConfig) -> Result<InputSource, String> {
    let explicit = cfg.device_path();
    let nodes = match explicit {
        Some(_) => Vec::new(),
        None => enumerate_input_nodes().map_err(|e| format!("udev enumeration failed: {}", e))?,
    };

    let candidates = keyboard_candidates(&nodes, explicit.as_deref(), &cfg.name_match);
    if candidates.is_empty() {
        return Err("no keyboard found".into());
    }

    let mut reasons = Vec::new();
    for path in candidates {
        match InputSource::open(&path, cfg.grab) {
            Ok(source) if source.looks_like_keyboard() => return Ok(source),
            Ok(source) => {
                debug!("{} ({}) lacks A/Enter/Space, skipped", path.display(), source.name());
                reasons.push(format!("{}: not a full keyboard", path.display()));
            }
            Err(e) => reasons.push(format!("{}: {}", path.display(), e)),
        }
    }
    Err(reasons.join("; "))
}

// ============================================================================
// Mouse
// ============================================================================

/// Where the bridge gets mice from. `MouseDiscovery` is the udev-backed one.
pub trait MouseFinder {
    type Source: EventSource;

    /// Descriptor to poll for hotplug notifications
    fn monitor_fd(&self) -> Option<RawFd>;

    /// Earliest retry or rescan time
    fn next_deadline(&self) -> Option<Instant>;

    /// Drain hotplug notifications
    fn poll_hotplug(&mut self) -> Vec<HotplugEvent>;

    /// Look for a mouse that is already plugged in, skipping `exclude`
    fn scan(&mut self, now: Instant, exclude: Option<&Path>) -> Option<Self::Source>;

    /// A node appeared
    fn on_added(&mut self, info: &InputNodeInfo, now: Instant) -> Option<Self::Source>;

    /// A node went away
    fn on_removed(&mut self, path: &Path);

    /// Run due retries and rescans while no mouse is attached
    fn on_tick(&mut self, now: Instant) -> Option<Self::Source>;

    /// Abandon scheduled retries
    fn clear_pending(&mut self);
}

/// A mouse node whose open failed and is retried later
#[derive(Debug)]
struct PendingOpen {
    path: PathBuf,
    attempts_left: u32,
    due: Instant,
}

/// Finds mice: initial scan, udev notifications, retries, and a periodic
/// rescan fallback when udev notifications are unavailable
pub struct MouseDiscovery {
    cfg: MouseConfig,
    keyboard_node: PathBuf,
    monitor: Option<HotplugMonitor>,
    pending: Option<PendingOpen>,
    next_rescan: Option<Instant>,
}

impl MouseDiscovery {
    pub fn new(cfg: MouseConfig, keyboard_node: PathBuf, now: Instant) -> Self {
        let monitor = match HotplugMonitor::new() {
            Ok(monitor) => Some(monitor),
            Err(e) => {
                warn!(
                    "udev monitor unavailable ({:#}); rescanning for a mouse every {:?}",
                    e,
                    cfg.rescan_interval()
                );
                None
            }
        };
        let next_rescan = monitor.is_none().then_some(now);
        Self {
            cfg,
            keyboard_node,
            monitor,
            pending: None,
            next_rescan,
        }
    }

    fn try_or_schedule(
        &mut self,
        path: PathBuf,
        attempts_left: u32,
        now: Instant,
    ) -> Option<InputSource> {
        match self.open_once(&path) {
            Ok(source) => {
                self.pending = None;
                Some(source)
            }
            Err(e) if attempts_left > 0 => {
                debug!("{}; retrying ({} left)", e, attempts_left);
                self.pending = Some(PendingOpen {
                    path,
                    attempts_left: attempts_left - 1,
                    due: now + self.cfg.open_backoff(),
                });
                None
            }
            Err(e) => {
                warn!("{}", e);
                self.pending = None;
                None
            }
        }
    }

    fn open_once(&self, path: &Path) -> Result<InputSource, BridgeError> {
        let source = InputSource::open(path, self.cfg.grab).map_err(|e| {
            BridgeError::MouseDeviceOpenFailed {
                device: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        if !source.looks_like_mouse() {
            return Err(BridgeError::MouseDeviceOpenFailed {
                device: path.to_path_buf(),
                reason: "no pointer with a left button".into(),
            });
        }
        Ok(source)
    }
}

impl MouseFinder for MouseDiscovery {
    type Source = InputSource;

    /// udev monitor fd, if notifications are available
    fn monitor_fd(&self) -> Option<RawFd> {
        self.monitor.as_ref().map(|m| m.as_raw_fd())
    }

    /// Earliest retry or rescan time
    fn next_deadline(&self) -> Option<Instant> {
        let pending = self.pending.as_ref().map(|p| p.due);
        match (pending, self.next_rescan) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Drain udev notifications
    fn poll_hotplug(&mut self) -> Vec<HotplugEvent> {
        match self.monitor.as_mut() {
            Some(monitor) => monitor.poll(),
            None => Vec::new(),
        }
    }

    /// Look for a mouse that is already plugged in
    fn scan(&mut self, now: Instant, exclude: Option<&Path>) -> Option<InputSource> {
        if self.monitor.is_none() {
            self.next_rescan = Some(now + self.cfg.rescan_interval());
        }

        let nodes = match enumerate_input_nodes() {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!("Mouse scan failed: {}", e);
                return None;
            }
        };

        let mut excluded = vec![self.keyboard_node.as_path()];
        excluded.extend(exclude);
        let explicit = self.cfg.device_path();
        let candidates = mouse_candidates(&nodes, explicit.as_deref(), &excluded);

        for path in candidates {
            match self.open_once(&path) {
                Ok(source) => return Some(source),
                Err(e) => debug!("{}", e),
            }
        }
        None
    }

    /// React to a udev add; opens immediately or schedules a retry
    fn on_added(&mut self, info: &InputNodeInfo, now: Instant) -> Option<InputSource> {
        let explicit = self.cfg.device_path();
        if !is_mouse_candidate(info, explicit.as_deref(), &self.keyboard_node) {
            return None;
        }
        info!("Mouse candidate appeared: {} ({})", info.devnode.display(), info.name);
        self.try_or_schedule(info.devnode.clone(), self.cfg.open_retries, now)
    }

    /// Forget a pending retry for a node that went away
    fn on_removed(&mut self, path: &Path) {
        if self.pending.as_ref().map_or(false, |p| p.path == path) {
            debug!("Dropping pending open of removed {}", path.display());
            self.pending = None;
        }
    }

    /// Run due retries and rescans. Call only while no mouse is attached.
    fn on_tick(&mut self, now: Instant) -> Option<InputSource> {
        if let Some(pending) = self.pending.take() {
            if pending.due <= now {
                let found = self.try_or_schedule(pending.path, pending.attempts_left, now);
                if found.is_some() {
                    return found;
                }
            } else {
                self.pending = Some(pending);
            }
        }

        match self.next_rescan {
            Some(due) if due <= now => self.scan(now, None),
            _ => None,
        }
    }

    /// Abandon retries (a mouse got attached another way)
    fn clear_pending(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u32, name: &str, keyboard: bool, mouse: bool) -> InputNodeInfo {
        InputNodeInfo {
            devnode: PathBuf::from(format!("/dev/input/event{}", n)),
            name: name.into(),
            phys: format!("usb-0000:01:00.0-1.{}/input0", n),
            is_keyboard: keyboard,
            is_mouse: mouse,
        }
    }

    fn nodes() -> Vec<InputNodeInfo> {
        vec![
            node(0, "pwr_button", true, false),
            node(2, "Raspberry Pi Internal Keyboard", true, false),
            node(3, "Logitech USB Receiver", false, true),
            node(10, "Generic USB Mouse", false, true),
            node(11, "Barcode Scanner", true, false),
        ]
    }

    fn paths(v: &[PathBuf]) -> Vec<String> {
        v.iter().map(|p| p.display().to_string()).collect()
    }

    #[test]
    fn test_event_index_is_numeric() {
        assert_eq!(event_index(Path::new("/dev/input/event10")), 10);
        assert_eq!(event_index(Path::new("/dev/input/event2")), 2);
        assert_eq!(event_index(Path::new("/dev/input/mouse0")), u32::MAX);
    }

    #[test]
    fn test_keyboard_prefers_named_keyboard() {
        let picked = keyboard_candidates(&nodes(), None, "");
        assert_eq!(
            paths(&picked),
            vec!["/dev/input/event2", "/dev/input/event0", "/dev/input/event11"]
        );
    }

    #[test]
    fn test_keyboard_name_match_filters() {
        let picked = keyboard_candidates(&nodes(), None, "scanner");
        assert_eq!(paths(&picked), vec!["/dev/input/event11"]);

        // phys matches too
        let picked = keyboard_candidates(&nodes(), None, "1.2/input0");
        assert_eq!(paths(&picked), vec!["/dev/input/event2"]);
    }

    #[test]
    fn test_keyboard_explicit_device_wins() {
        let picked = keyboard_candidates(&nodes(), Some(Path::new("/dev/input/event7")), "x");
        assert_eq!(paths(&picked), vec!["/dev/input/event7"]);
    }

    #[test]
    fn test_mouse_prefers_named_mouse_then_index() {
        let picked = mouse_candidates(&nodes(), None, &[]);
        assert_eq!(paths(&picked), vec!["/dev/input/event10", "/dev/input/event3"]);
    }

    #[test]
    fn test_mouse_excludes_given_nodes() {
        let gone = PathBuf::from("/dev/input/event10");
        let picked = mouse_candidates(&nodes(), None, &[gone.as_path()]);
        assert_eq!(paths(&picked), vec!["/dev/input/event3"]);
    }

    #[test]
    fn test_mouse_explicit_device_must_exist() {
        let explicit = Path::new("/dev/input/event3");
        assert_eq!(paths(&mouse_candidates(&nodes(), Some(explicit), &[])), vec!["/dev/input/event3"]);
        assert!(mouse_candidates(&nodes(), Some(explicit), &[explicit]).is_empty());
        assert!(mouse_candidates(&nodes(), Some(Path::new("/dev/input/event99")), &[]).is_empty());
    }

    #[test]
    fn test_added_node_candidate_rules() {
        let keyboard = Path::new("/dev/input/event2");
        let mouse = node(12, "USB Optical Mouse", false, true);
        let kbd = node(13, "USB Keyboard", true, false);

        assert!(is_mouse_candidate(&mouse, None, keyboard));
        assert!(!is_mouse_candidate(&kbd, None, keyboard));
        // The keyboard node itself never becomes the mouse
        let combo = node(2, "Keyboard with trackpoint", true, true);
        assert!(!is_mouse_candidate(&combo, None, keyboard));
        // Pinned device only
        assert!(!is_mouse_candidate(&mouse, Some(Path::new("/dev/input/event5")), keyboard));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let delays: Vec<Duration> = backoff_schedule(Duration::from_millis(250), 7).collect();
        assert_eq!(delays.len(), 7);
        assert_eq!(delays[0], Duration::from_millis(250));
        assert_eq!(delays[1], Duration::from_millis(500));
        assert_eq!(delays[4], Duration::from_millis(4000));
        assert_eq!(delays[5], MAX_OPEN_BACKOFF);
        assert_eq!(delays[6], MAX_OPEN_BACKOFF);
    }

    #[test]
    fn test_backoff_zero_steps() {
        assert_eq!(backoff_schedule(Duration::from_millis(10), 0).count(), 0);
    }
}
