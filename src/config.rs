//! Configuration loading and defaults for vtswitchd.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration for vtswitchd.
///
/// Defaults target the Cinnamon desktop. A config file overrides defaults
/// field by field; fields not present in the file keep their default value.
/// All values are fixed once the daemon has started.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `DBus` service name of the screensaver (default: `org.cinnamon.ScreenSaver`).
    pub service: String,

    /// `DBus` object path of the screensaver (default: `/org/cinnamon/ScreenSaver`).
    pub path: String,

    /// `DBus` interface name carrying `ActiveChanged` and `GetActive`
    /// (default: `org.cinnamon.ScreenSaver`).
    pub interface: String,

    /// gsettings key queried for the session idle threshold, in seconds
    /// (default: `org.cinnamon.desktop.session idle-delay`).
    pub idle_setting_key: String,

    /// Seconds to let DPMS state settle after a lock event before probing
    /// monitor power (default: 3).
    pub settle_delay_seconds: u64,

    /// Recheck delay used when the computed delay is not positive, i.e. the
    /// session is already idle past its threshold (default: 5).
    pub recheck_cushion_seconds: u64,

    /// Seconds to wait before forcing the monitor off after a terminal
    /// switch (default: 0).
    pub screen_off_delay_seconds: u64,

    /// Virtual terminal the graphical session runs on (default: 7).
    pub primary_tty: u32,

    /// Virtual terminal switched through to force a repaint (default: 1).
    pub intermediate_tty: u32,

    /// Dry run mode: log terminal-switch and power-off commands instead of
    /// executing them.
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: "org.cinnamon.ScreenSaver".to_string(),
            path: "/org/cinnamon/ScreenSaver".to_string(),
            interface: "org.cinnamon.ScreenSaver".to_string(),
            idle_setting_key: "org.cinnamon.desktop.session idle-delay".to_string(),
            settle_delay_seconds: 3,
            recheck_cushion_seconds: 5,
            screen_off_delay_seconds: 0,
            primary_tty: 7,
            intermediate_tty: 1,
            dry_run: false,
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the default path, or return defaults if not found.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        // Try default config path
        if let Some(config_dir) = dirs::config_dir() {
            let default_path = config_dir.join("vtswitchd").join("config.toml");
            if default_path.exists() {
                return Self::load(&default_path);
            }
        }

        Ok(Self::default())
    }
}
