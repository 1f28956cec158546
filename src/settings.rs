// SPDX-License-Identifier: GPL-3.0-only
use crate::error::CoreError;
use crate::hotkeys::HotkeyCombo;
use crate::models::WhisperModelId;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Voice recording trigger modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingMode {
    #[serde(rename = "push-to-talk")]
    PushToTalk,
    #[serde(rename = "toggle")]
    Toggle,
    #[serde(rename = "auto")]
    Auto,
}

impl Default for RecordingMode {
    fn default() -> Self {
        Self::PushToTalk
    }
}

impl std::fmt::Display for RecordingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PushToTalk => write!(f, "push-to-talk"),
            Self::Toggle => write!(f, "toggle"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HotkeySettings {
    pub push_to_talk: String,
    pub toggle: String,
}

impl Default for HotkeySettings {
    fn default() -> Self {
        Self {
            push_to_talk: "ctrl+shift+space".to_string(),
            toggle: "ctrl+shift+r".to_string(),
        }
    }
}

/// Read-only settings view consumed by the pipeline core.
///
/// The GUI owns editing and persistence; the core only validates and reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub model: WhisperModelId,
    pub language: String,
    pub recording_mode: RecordingMode,
    pub hotkeys: HotkeySettings,
    pub auto_paste: bool,
    pub auto_copy: bool,
    pub energy_threshold: f32,
    pub silence_ms: u32,
    pub selected_device_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: WhisperModelId::default(),
            language: "en".to_string(),
            recording_mode: RecordingMode::default(),
            hotkeys: HotkeySettings::default(),
            auto_paste: true,
            auto_copy: true,
            energy_threshold: 0.01,
            silence_ms: 1200,
            selected_device_name: String::new(),
        }
    }
}

impl Settings {
    /// Check every boundary invariant, failing on the first violation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSetting` naming the offending field.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(0.0..=1.0).contains(&self.energy_threshold) || !self.energy_threshold.is_finite() {
            return Err(CoreError::InvalidSetting {
                field: "energy_threshold",
                reason: format!("{} is outside [0, 1]", self.energy_threshold),
            });
        }
        if !(100..=10_000).contains(&self.silence_ms) {
            return Err(CoreError::InvalidSetting {
                field: "silence_ms",
                reason: format!("{} is outside [100, 10000]", self.silence_ms),
            });
        }
        if self.language.trim().is_empty() {
            return Err(CoreError::InvalidSetting {
                field: "language",
                reason: "empty language code".to_string(),
            });
        }
        HotkeyCombo::parse(&self.hotkeys.push_to_talk).map_err(|e| CoreError::InvalidSetting {
            field: "hotkeys.push_to_talk",
            reason: e.to_string(),
        })?;
        HotkeyCombo::parse(&self.hotkeys.toggle).map_err(|e| CoreError::InvalidSetting {
            field: "hotkeys.toggle",
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Replace any invalid field with its default, warning per substitution.
    /// Used when loading from disk; explicit construction should use
    /// [`Settings::validate`] instead.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !(0.0..=1.0).contains(&self.energy_threshold) || !self.energy_threshold.is_finite() {
            warn!(
                "energy_threshold {} out of range, using default {}",
                self.energy_threshold, defaults.energy_threshold
            );
            self.energy_threshold = defaults.energy_threshold;
        }
        if !(100..=10_000).contains(&self.silence_ms) {
            warn!(
                "silence_ms {} out of range, using default {}",
                self.silence_ms, defaults.silence_ms
            );
            self.silence_ms = defaults.silence_ms;
        }
        if self.language.trim().is_empty() {
            warn!("empty language, using default '{}'", defaults.language);
            self.language = defaults.language.clone();
        }
        if HotkeyCombo::parse(&self.hotkeys.push_to_talk).is_err() {
            warn!(
                "invalid push-to-talk hotkey '{}', using default '{}'",
                self.hotkeys.push_to_talk, defaults.hotkeys.push_to_talk
            );
            self.hotkeys.push_to_talk = defaults.hotkeys.push_to_talk.clone();
        }
        if HotkeyCombo::parse(&self.hotkeys.toggle).is_err() {
            warn!(
                "invalid toggle hotkey '{}', using default '{}'",
                self.hotkeys.toggle, defaults.hotkeys.toggle
            );
            self.hotkeys.toggle = defaults.hotkeys.toggle;
        }
        self
    }

    fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".config")
            })
            .join("voxkey");

        config_dir.join("settings.toml")
    }

    /// Load settings from disk, substituting defaults for anything missing
    /// or invalid.
    #[must_use]
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    #[must_use]
    pub fn load_from(path: &std::path::Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<Settings>(&content) {
                Ok(settings) => {
                    debug!("Loaded settings from {}", path.display());
                    settings.sanitized()
                }
                Err(e) => {
                    warn!(
                        "Failed to parse settings file {}: {e}. Using defaults.",
                        path.display()
                    );
                    Self::default()
                }
            },
            Err(e) => {
                debug!(
                    "Settings file {} not found or unreadable: {e}. Using defaults.",
                    path.display()
                );
                Self::default()
            }
        }
    }

    /// Save settings to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be created,
    /// serialization fails, or the file cannot be written.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_energy_threshold() {
        let settings = Settings {
            energy_threshold: 1.5,
            ..Settings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("energy_threshold"));
    }

    #[test]
    fn rejects_out_of_range_silence_ms() {
        for silence_ms in [0, 99, 10_001] {
            let settings = Settings {
                silence_ms,
                ..Settings::default()
            };
            assert!(settings.validate().is_err(), "silence_ms={silence_ms}");
        }
    }

    #[test]
    fn rejects_bad_hotkey() {
        let settings = Settings {
            hotkeys: HotkeySettings {
                push_to_talk: "hyper+q".to_string(),
                ..HotkeySettings::default()
            },
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn sanitize_substitutes_defaults() {
        let settings = Settings {
            energy_threshold: -2.0,
            silence_ms: 50,
            hotkeys: HotkeySettings {
                push_to_talk: String::new(),
                toggle: "ctrl+".to_string(),
            },
            ..Settings::default()
        }
        .sanitized();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn load_from_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        assert_eq!(Settings::load_from(&path), Settings::default());
    }

    #[test]
    fn toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let settings = Settings {
            model: WhisperModelId::SmallEn,
            recording_mode: RecordingMode::Toggle,
            silence_ms: 900,
            selected_device_name: "USB Microphone".to_string(),
            ..Settings::default()
        };
        std::fs::write(&path, toml::to_string_pretty(&settings).unwrap()).unwrap();
        assert_eq!(Settings::load_from(&path), settings);
    }

    #[test]
    fn load_tolerates_out_of_range_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "energy_threshold = 9.0\nsilence_ms = 5\nlanguage = \"en\"\n",
        )
        .unwrap();
        let settings = Settings::load_from(&path);
        assert_eq!(settings.energy_threshold, Settings::default().energy_threshold);
        assert_eq!(settings.silence_ms, Settings::default().silence_ms);
    }
}
