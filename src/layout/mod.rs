//! Keyboard layout tables
//!
//! Maps Linux key codes to HID usages (or modifier bits) for the
//! selected physical layout. Built once at startup, immutable after.
//!
//! An optional override file can extend or replace entries:
//!
//! ```toml
//! [[key]]
//! code = 124        # KEY_YEN
//! usage = 0x89
//!
//! [[key]]
//! code = 58         # KEY_CAPSLOCK
//! modifier = "left_ctrl"
//! ```

mod tables;

use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{BridgeError, ConfigError};
use crate::hid::Modifiers;

/// What a physical key produces in the report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMapEntry {
    /// Normal key occupying a usage slot
    Usage(u8),
    /// Modifier key setting one bit of byte 0
    Modifier(Modifiers),
}

/// Physical keyboard layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutVariant {
    /// 104-key US
    #[default]
    Us,
    /// 106/109-key Japanese
    Jis,
}

impl LayoutVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutVariant::Us => "us",
            LayoutVariant::Jis => "jis",
        }
    }

    /// Parse a configured layout, falling back to US with a warning
    pub fn resolve(value: &str) -> Self {
        match value.parse() {
            Ok(variant) => variant,
            Err(e) => {
                warn!("{}; using 'us'", e);
                LayoutVariant::Us
            }
        }
    }
}

impl FromStr for LayoutVariant {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "us" => Ok(LayoutVariant::Us),
            "jis" | "jp" => Ok(LayoutVariant::Jis),
            _ => Err(ConfigError::InvalidLayout(s.to_string())),
        }
    }
}

impl fmt::Display for LayoutVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable key code lookup for one layout
#[derive(Debug, Clone)]
pub struct KeyMap {
    variant: LayoutVariant,
    entries: HashMap<u32, KeyMapEntry>,
}

impl KeyMap {
    /// Built-in table for `variant`
    pub fn builtin(variant: LayoutVariant) -> Self {
        let extra = match variant {
            LayoutVariant::Us => tables::US,
            LayoutVariant::Jis => tables::JIS,
        };

        let mut entries = HashMap::with_capacity(tables::COMMON.len() + extra.len() + 8);
        for &(code, usage) in tables::COMMON.iter().chain(extra) {
            entries.insert(code, KeyMapEntry::Usage(usage));
        }
        for &(code, bit) in tables::MODIFIERS {
            entries.insert(code, KeyMapEntry::Modifier(bit));
        }

        Self { variant, entries }
    }

    /// Build the table for `variant`, layering an override file if configured.
    ///
    /// A configured override that cannot be loaded is fatal: running with a
    /// partial mapping would silently drop keys.
    pub fn load(variant: LayoutVariant, overrides: Option<&Path>) -> Result<Self, BridgeError> {
        let mut map = Self::builtin(variant);

        if let Some(path) = overrides {
            let missing = |reason: String| BridgeError::LayoutTableMissing {
                layout: variant.to_string(),
                reason: format!("{}: {}", path.display(), reason),
            };
            let content = std::fs::read_to_string(path).map_err(|e| missing(e.to_string()))?;
            let applied = map.apply_overrides(&content).map_err(missing)?;
            info!("Applied {} keymap overrides from {}", applied, path.display());
        }

        if map.entries.is_empty() {
            return Err(BridgeError::LayoutTableMissing {
                layout: variant.to_string(),
                reason: "table is empty".into(),
            });
        }

        info!("Keymap ready (layout={}, {} keys)", variant, map.entries.len());
        Ok(map)
    }

    /// Layer `[[key]]` entries from TOML text; returns how many were applied
    fn apply_overrides(&mut self, content: &str) -> Result<usize, String> {
        let file: OverrideFile = toml::from_str(content).map_err(|e| e.to_string())?;
        let count = file.key.len();

        for entry in file.key {
            let mapped = match (entry.usage, entry.modifier.as_deref()) {
                (Some(usage), None) => KeyMapEntry::Usage(usage),
                (None, Some(name)) => KeyMapEntry::Modifier(parse_modifier(name).ok_or_else(
                    || format!("code {}: unknown modifier '{}'", entry.code, name),
                )?),
                _ => {
                    return Err(format!(
                        "code {}: exactly one of 'usage' or 'modifier' is required",
                        entry.code
                    ))
                }
            };
            debug!("keymap override: {} -> {:?}", entry.code, mapped);
            self.entries.insert(entry.code, mapped);
        }

        Ok(count)
    }

    /// Entry for a key code; `None` means the key is ignored
    pub fn lookup(&self, code: u32) -> Option<KeyMapEntry> {
        self.entries.get(&code).copied()
    }

    pub fn variant(&self) -> LayoutVariant {
        self.variant
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Deserialize)]
struct OverrideFile {
    #[serde(default)]
    key: Vec<OverrideEntry>,
}

#[derive(Debug, Deserialize)]
struct OverrideEntry {
    code: u32,
    usage: Option<u8>,
    modifier: Option<String>,
}

fn parse_modifier(name: &str) -> Option<Modifiers> {
    let bit = match name.to_ascii_lowercase().as_str() {
        "left_ctrl" => Modifiers::LEFT_CTRL,
        "left_shift" => Modifiers::LEFT_SHIFT,
        "left_alt" => Modifiers::LEFT_ALT,
        "left_meta" => Modifiers::LEFT_META,
        "right_ctrl" => Modifiers::RIGHT_CTRL,
        "right_shift" => Modifiers::RIGHT_SHIFT,
        "right_alt" => Modifiers::RIGHT_ALT,
        "right_meta" => Modifiers::RIGHT_META,
        _ => return None,
    };
    Some(bit)
}
