//! Configuration
//!
//! Defaults < TOML file < CLI flags. All knobs are optional; the daemon runs
//! usefully with no configuration at all.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Upper bound on simultaneously attached outputs.
pub const MAX_DRAWABLE_LAYERS: usize = 128;
/// Default obfuscation delay ceiling in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 100;
/// Default crosshair arm length in pixels.
pub const DEFAULT_CURSOR_RADIUS: i32 = 15;
/// Default poll timeout when no release is scheduled, in milliseconds.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 30;
/// Default directory scanned for evdev device nodes.
pub const DEFAULT_DEVICE_DIR: &str = "/dev/input";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Obfuscation timing.
    pub obfuscation: ObfuscationConfig,
    /// Crosshair overlay.
    pub overlay: OverlayConfig,
    /// Physical input handling.
    pub input: InputConfig,
    /// Main-loop tuning.
    pub engine: EngineConfig,
}

/// Obfuscation timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObfuscationConfig {
    /// Hard ceiling on per-event delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ObfuscationConfig {
    fn default() -> Self {
        Self {
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

/// Crosshair overlay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Crosshair arm length in pixels; the drawn square has side
    /// `2 * cursor_radius + 1`.
    pub cursor_radius: i32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            cursor_radius: DEFAULT_CURSOR_RADIUS,
        }
    }
}

/// Physical input configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Directory scanned for `event*` character devices.
    pub device_dir: PathBuf,
    /// Enable tap-to-click on touchpads as they appear.
    pub tap_to_click: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            device_dir: PathBuf::from(DEFAULT_DEVICE_DIR),
            tap_to_click: true,
        }
    }
}

/// Main-loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Poll timeout when the delay queue is empty, in milliseconds.
    pub poll_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).context("failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Check knob ranges.
    pub fn validate(&self) -> Result<()> {
        if self.obfuscation.max_delay_ms == 0 {
            anyhow::bail!("obfuscation.max_delay_ms must be at least 1");
        }
        if self.overlay.cursor_radius < 1 {
            anyhow::bail!("overlay.cursor_radius must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.obfuscation.max_delay_ms, 100);
        assert_eq!(config.overlay.cursor_radius, 15);
        assert_eq!(config.input.device_dir, PathBuf::from("/dev/input"));
        assert!(config.input.tap_to_click);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[obfuscation]\nmax_delay_ms = 250").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.obfuscation.max_delay_ms, 250);
        assert_eq!(config.overlay.cursor_radius, DEFAULT_CURSOR_RADIUS);
    }

    #[test]
    fn zero_delay_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[obfuscation]\nmax_delay_ms = 0").unwrap();
        assert!(Config::load(file.path()).is_err());
    }
}
