//! User configuration of the DOS mouse driver, stored as JSON.

use std::fs;
use std::path::Path;

use emu_core::logging::{log, LogCategory, LogLevel};
use serde::{Deserialize, Serialize};

use crate::events::DEFAULT_DELAY_MS;
use crate::MouseError;

/// Driver settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MouseDosConfig {
    /// Apply host motion when it is reported instead of at interrupt time
    pub immediate: bool,
    /// Minimum delay between two mouse interrupts
    pub delay_ms: u8,
    /// Lowest sampling rate to request from the host mouse, 0 for none
    pub min_rate_hz: u16,
    /// Host delivers relative motion without its own acceleration
    pub raw_input: bool,
}

impl Default for MouseDosConfig {
    fn default() -> Self {
        Self {
            immediate: false,
            delay_ms: DEFAULT_DELAY_MS,
            min_rate_hz: 0,
            raw_input: true,
        }
    }
}

impl MouseDosConfig {
    pub fn load(path: &Path) -> Result<Self, MouseError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Load settings, falling back to defaults on error
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(MouseError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                log(LogCategory::Driver, LogLevel::Warn, || {
                    format!("Failed to load {}: {}. Using defaults.", path.display(), err)
                });
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), MouseError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MouseDosConfig::default();
        assert!(!config.immediate);
        assert_eq!(config.delay_ms, 5);
        assert_eq!(config.min_rate_hz, 0);
        assert!(config.raw_input);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: MouseDosConfig = serde_json::from_str(r#"{ "min_rate_hz": 100 }"#).unwrap();
        assert_eq!(config.min_rate_hz, 100);
        assert_eq!(config.delay_ms, 5);
        assert!(config.raw_input);
    }

    #[test]
    fn test_save_load() {
        let path = std::env::temp_dir().join("emu_dos_mouse_test_config.json");
        let config = MouseDosConfig {
            immediate: true,
            delay_ms: 10,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = MouseDosConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_errors() {
        let missing = std::env::temp_dir().join("emu_dos_mouse_no_such_config.json");
        assert!(matches!(MouseDosConfig::load(&missing), Err(MouseError::Io(_))));
        assert_eq!(MouseDosConfig::load_or_default(&missing), MouseDosConfig::default());

        let broken = std::env::temp_dir().join("emu_dos_mouse_broken_config.json");
        fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(MouseDosConfig::load(&broken), Err(MouseError::Json(_))));
        assert_eq!(MouseDosConfig::load_or_default(&broken), MouseDosConfig::default());
        let _ = fs::remove_file(&broken);
    }
}
