//! Configuration file management
//!
//! Loads TOML configuration files and provides bridge settings.
//! Default config path: ~/.config/hidg-bridge/config.toml

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{DEFAULT_KEYBOARD_NODE, DEFAULT_MOUSE_NODE};
use crate::gadget::WritePolicy;

/// Environment variable selecting the layout; overrides the config file
pub const LAYOUT_ENV: &str = "KEYBOARD_LAYOUT";

/// Environment variable pointing at a config file
pub const CONFIG_ENV: &str = "HIDG_BRIDGE_CONFIG";

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Built-in keyboard settings
    pub keyboard: KeyboardConfig,
    /// Optional mouse settings
    pub mouse: MouseConfig,
    /// HID gadget settings
    pub gadget: GadgetConfig,
}

/// Keyboard settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyboardConfig {
    /// Physical layout: "us" or "jis"
    pub layout: String,
    /// Fixed evdev node (auto-detect if empty)
    pub device: String,
    /// Only consider keyboards whose name or phys contains this (case-insensitive)
    pub name_match: String,
    /// Grab the keyboard exclusively so the local console ignores it
    pub grab: bool,
    /// TOML file with `[[key]]` entries layered over the built-in table
    pub keymap_overrides: String,
    /// Extra open attempts at startup
    pub open_retries: u32,
    /// Delay before the first retry (doubles each time)
    pub open_backoff_ms: u64,
}

/// Mouse settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MouseConfig {
    /// Forward a mouse when one is attached
    pub enabled: bool,
    /// Fixed evdev node (auto-detect if empty)
    pub device: String,
    /// Grab the mouse exclusively
    pub grab: bool,
    /// 0 = write a report per event; >0 = coalesce motion for this long
    pub flush_interval_ms: u64,
    /// Extra open attempts for a freshly added device
    pub open_retries: u32,
    /// Delay between those attempts
    pub open_backoff_ms: u64,
    /// Rescan period when udev notifications are unavailable
    pub rescan_interval_ms: u64,
}

/// HID gadget settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GadgetConfig {
    /// Keyboard function node (8-byte reports)
    pub keyboard_node: String,
    /// Mouse function node (4-byte reports)
    pub mouse_node: String,
    /// configfs gadget that must be bound (any gadget if empty)
    pub name: String,
    /// Require a configfs gadget bound to a UDC before starting
    pub check_binding: bool,
    /// Failed writes tolerated before a stalled endpoint is logged as a warning
    pub write_retries: u32,
    /// Delay before the first write retry (doubles each time, capped at 500 ms)
    pub retry_backoff_ms: u64,
    /// Interval between readiness probes at startup
    pub ready_poll_ms: u64,
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            layout: "us".to_string(),
            device: String::new(),
            name_match: String::new(),
            grab: false,
            keymap_overrides: String::new(),
            open_retries: 10,
            open_backoff_ms: 250,
        }
    }
}

impl Default for MouseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: String::new(),
            grab: false,
            flush_interval_ms: 0,
            open_retries: 5,
            open_backoff_ms: 200,
            rescan_interval_ms: 1000,
        }
    }
}

impl Default for GadgetConfig {
    fn default() -> Self {
        Self {
            keyboard_node: DEFAULT_KEYBOARD_NODE.to_string(),
            mouse_node: DEFAULT_MOUSE_NODE.to_string(),
            name: String::new(),
            check_binding: true,
            write_retries: 5,
            retry_backoff_ms: 10,
            ready_poll_ms: 500,
        }
    }
}

/// Empty string means "not set"
fn non_empty_path(value: &str) -> Option<PathBuf> {
    let value = value.trim();
    (!value.is_empty()).then(|| PathBuf::from(value))
}

impl KeyboardConfig {
    pub fn device_path(&self) -> Option<PathBuf> {
        non_empty_path(&self.device)
    }

    pub fn overrides_path(&self) -> Option<PathBuf> {
        non_empty_path(&self.keymap_overrides)
    }

    pub fn open_backoff(&self) -> Duration {
        Duration::from_millis(self.open_backoff_ms)
    }
}

impl MouseConfig {
    pub fn device_path(&self) -> Option<PathBuf> {
        non_empty_path(&self.device)
    }

    pub fn open_backoff(&self) -> Duration {
        Duration::from_millis(self.open_backoff_ms)
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms.max(100))
    }
}

impl GadgetConfig {
    pub fn write_policy(&self) -> WritePolicy {
        WritePolicy {
            retries: self.write_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms.max(10))
    }

    pub fn gadget_name(&self) -> Option<String> {
        let name = self.name.trim();
        (!name.is_empty()).then(|| name.to_string())
    }
}

impl Config {
    /// System-wide config path
    const SYSTEM_CONFIG_PATH: &'static str = "/etc/hidg-bridge/config.toml";

    /// Get the path that would be used for loading config
    /// Returns None if using built-in defaults
    pub fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
        // 0. --config on the command line
        if let Some(p) = explicit {
            return Some(p.to_path_buf());
        }

        // 1. HIDG_BRIDGE_CONFIG environment variable
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let p = Path::new(&path);
            if p.exists() {
                return Some(p.to_path_buf());
            }
        }

        // 2. User config: ~/.config/hidg-bridge/config.toml
        if let Some(config_path) = Self::user_config_path() {
            if config_path.exists() {
                return Some(config_path);
            }
        }

        // 3. System config: /etc/hidg-bridge/config.toml
        let system_config = Path::new(Self::SYSTEM_CONFIG_PATH);
        if system_config.exists() {
            return Some(system_config.to_path_buf());
        }

        None
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("hidg-bridge").join("config.toml"))
    }

    /// Load configuration with priority:
    /// 1. --config PATH
    /// 2. HIDG_BRIDGE_CONFIG environment variable
    /// 3. ~/.config/hidg-bridge/config.toml (user config)
    /// 4. /etc/hidg-bridge/config.toml (system config)
    /// 5. Built-in defaults
    ///
    /// `KEYBOARD_LAYOUT` is applied on top of whichever was loaded.
    pub fn load(explicit: Option<&Path>) -> Self {
        let mut config = match Self::config_path(explicit) {
            Some(path) => match Self::load_from_file(&path) {
                Ok(config) => {
                    info!("Loaded config: {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Failed to load config {}: {:#}", path.display(), e);
                    Self::default()
                }
            },
            None => {
                info!("Using built-in default config");
                Self::default()
            }
        };
        config.apply_layout_env(std::env::var(LAYOUT_ENV).ok());
        config
    }

    /// Load settings from specified path
    fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Apply a `KEYBOARD_LAYOUT` value; empty values are ignored
    pub fn apply_layout_env(&mut self, value: Option<String>) {
        if let Some(layout) = value.filter(|v| !v.trim().is_empty()) {
            info!("{} overrides layout: {}", LAYOUT_ENV, layout.trim());
            self.keyboard.layout = layout.trim().to_string();
        }
    }

    /// Write the commented template; system-wide when `system` is set
    pub fn write_template(system: bool) -> Result<PathBuf> {
        let config_path = Self::template_path(system)?;
        if let Some(dir) = config_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        std::fs::write(&config_path, CONFIG_TEMPLATE)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        Ok(config_path)
    }

    /// Get the template destination (without writing)
    pub fn template_path(system: bool) -> Result<PathBuf> {
        if system {
            Ok(PathBuf::from(Self::SYSTEM_CONFIG_PATH))
        } else {
            Self::user_config_path().ok_or_else(|| anyhow::anyhow!("Config directory not found"))
        }
    }
}

/// Template written by --init-config
const CONFIG_TEMPLATE: &str = r#"# hidg-bridge configuration
#
# Search order: --config, $HIDG_BRIDGE_CONFIG, ~/.config/hidg-bridge/config.toml,
# /etc/hidg-bridge/config.toml. $KEYBOARD_LAYOUT overrides keyboard.layout.

[keyboard]
# Physical layout: "us" (104-key) or "jis" (106/109-key)
layout = "us"
# Fixed evdev node, e.g. "/dev/input/by-path/platform-...-event-kbd" (auto-detect if empty)
device = ""
# Prefer keyboards whose name or phys contains this
name_match = ""
# Take the keyboard exclusively (local console stops seeing keys)
grab = false
# Extra key mappings, see README
keymap_overrides = ""
open_retries = 10
open_backoff_ms = 250

[mouse]
enabled = true
device = ""
grab = false
# 0 = one report per event, otherwise coalesce motion for N ms
flush_interval_ms = 0
open_retries = 5
open_backoff_ms = 200
# Used only when udev notifications are unavailable
rescan_interval_ms = 1000

[gadget]
keyboard_node = "/dev/hidg0"
mouse_node = "/dev/hidg1"
# configfs gadget name under /sys/kernel/config/usb_gadget (any if empty)
name = ""
check_binding = true
# A rejected report is retried from the event loop, never by sleeping.
# write_retries failures in a row are logged as a stalled host.
write_retries = 5
retry_backoff_ms = 10
ready_poll_ms = 500
"#;
