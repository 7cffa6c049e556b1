//! TOML configuration with defaults.
//!
//! The file is read once at startup. A missing file is replaced by the
//! default template so the user has something to edit.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::LevelFilter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::*;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("failed to write default config {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },

    #[error("invalid TOML in {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error("invalid configuration:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    Sequential,
    #[default]
    Random,
}

impl SelectionMode {
    pub fn name(&self) -> &'static str {
        match self {
            SelectionMode::Sequential => "sequential",
            SelectionMode::Random => "random",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortraitBias {
    #[default]
    Top,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// External driver program talking to the panel.
    #[default]
    Command,
    /// Write every refresh to a PNG file instead of hardware.
    Preview,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub refresh_interval: u64,
    pub full_refresh_every: u64,
    pub saturation: f32,
    pub width: u32,
    pub height: u32,
    pub driver: DriverKind,
    pub driver_command: String,
    pub preview_path: String,
    pub retry_attempts: u32,
    pub retry_base_delay: f64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_interval: REFRESH_INTERVAL,
            full_refresh_every: FULL_REFRESH_EVERY,
            saturation: DISPLAY_SATURATION,
            width: DISPLAY_WIDTH,
            height: DISPLAY_HEIGHT,
            driver: DriverKind::Command,
            driver_command: "inky-show".to_string(),
            preview_path: "~/.cache/inky-photo-frame/preview.png".to_string(),
            retry_attempts: RETRY_ATTEMPTS,
            retry_base_delay: RETRY_BASE_DELAY,
        }
    }
}

impl DisplayConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_base_delay.clamp(0.0, MAX_RETRY_BASE_DELAY)).unwrap_or_default()
    }

    pub fn preview_path(&self) -> PathBuf {
        expand_tilde(&self.preview_path)
    }
}

/// Pre-processing multipliers, applied before the driver's own palette
/// saturation (`display.saturation`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub saturation: f32,
    pub contrast: f32,
    pub sharpness: f32,
    pub portrait_bias: PortraitBias,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            saturation: PROCESS_SATURATION,
            contrast: PROCESS_CONTRAST,
            sharpness: PROCESS_SHARPNESS,
            portrait_bias: PortraitBias::Top,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotoConfig {
    pub local_path: String,
    pub selection_mode: SelectionMode,
    pub watch: bool,
    pub recursive: bool,
}

impl Default for PhotoConfig {
    fn default() -> Self {
        Self {
            local_path: "~/Photos/Frame".to_string(),
            selection_mode: SelectionMode::Random,
            watch: true,
            recursive: true,
        }
    }
}

impl PhotoConfig {
    pub fn local_path(&self) -> PathBuf {
        expand_tilde(&self.local_path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcloudConfig {
    pub enabled: bool,
    pub apple_id: Option<String>,
    pub session_path: String,
    pub cache_path: String,
    pub helper: String,
}

impl Default for IcloudConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            apple_id: None,
            session_path: "~/.config/inky-photo-frame/icloud_session".to_string(),
            cache_path: "~/.cache/inky-photo-frame/icloud".to_string(),
            helper: "inky-icloud".to_string(),
        }
    }
}

impl IcloudConfig {
    /// The configured Apple ID, treating an empty string as unset.
    pub fn apple_id(&self) -> Option<&str> {
        self.apple_id.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn session_path(&self) -> PathBuf {
        expand_tilde(&self.session_path)
    }

    pub fn cache_path(&self) -> PathBuf {
        expand_tilde(&self.cache_path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: String::new(),
        }
    }
}

impl LoggingConfig {
    /// Maps the configured level name onto a `log` filter. Accepts the
    /// Python-style `WARNING` and `CRITICAL` spellings.
    pub fn level_filter(&self) -> Option<LevelFilter> {
        match self.level.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Some(LevelFilter::Trace),
            "DEBUG" => Some(LevelFilter::Debug),
            "INFO" => Some(LevelFilter::Info),
            "WARN" | "WARNING" => Some(LevelFilter::Warn),
            "ERROR" | "CRITICAL" => Some(LevelFilter::Error),
            "OFF" => Some(LevelFilter::Off),
            _ => None,
        }
    }

    pub fn file(&self) -> Option<PathBuf> {
        let file = self.file.trim();
        (!file.is_empty()).then(|| expand_tilde(file))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub display: DisplayConfig,
    pub photo: PhotoConfig,
    pub processing: ProcessingConfig,
    pub icloud: IcloudConfig,
    pub logging: LoggingConfig,

    /// Where this configuration was loaded from.
    #[serde(skip)]
    pub path: PathBuf,
}

impl Config {
    /// Loads the configuration, writing the default template first when the
    /// file does not exist yet.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = find_config_path(explicit);

        if !path.exists() {
            write_template(&path)?;
            return Ok(Config { path, ..Config::default() });
        }

        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read { path: path.clone(), source })?;
        let mut config = Config::from_toml(&text).map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
        config.path = path;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Checks every setting and reports all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        let display = &self.display;

        if display.refresh_interval == 0 || display.refresh_interval > MAX_REFRESH_INTERVAL {
            errors.push(format!("display.refresh_interval must be between 1 and {} seconds", MAX_REFRESH_INTERVAL));
        }
        if display.full_refresh_every == 0 {
            errors.push("display.full_refresh_every must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&display.saturation) {
            errors.push("display.saturation must be between 0.0 and 1.0".to_string());
        }
        if display.width == 0 || display.height == 0 {
            errors.push("display.width and display.height must be positive".to_string());
        }
        if display.retry_attempts == 0 {
            errors.push("display.retry_attempts must be at least 1".to_string());
        }
        if !(0.0..=MAX_RETRY_BASE_DELAY).contains(&display.retry_base_delay) {
            errors.push(format!("display.retry_base_delay must be between 0 and {} seconds", MAX_RETRY_BASE_DELAY));
        }
        match display.driver {
            DriverKind::Command if display.driver_command.trim().is_empty() => {
                errors.push("display.driver_command is required when display.driver is \"command\"".to_string());
            }
            DriverKind::Preview if display.preview_path.trim().is_empty() => {
                errors.push("display.preview_path is required when display.driver is \"preview\"".to_string());
            }
            _ => {}
        }

        let processing = &self.processing;
        for (name, value) in [
            ("saturation", processing.saturation),
            ("contrast", processing.contrast),
            ("sharpness", processing.sharpness),
        ] {
            if !value.is_finite() || value < 0.0 {
                errors.push(format!("processing.{} must be non-negative", name));
            }
        }

        if self.photo.local_path.trim().is_empty() {
            errors.push("photo.local_path must not be empty".to_string());
        }

        if self.icloud.enabled {
            if self.icloud.apple_id().is_none() {
                errors.push("icloud.apple_id is required when icloud.enabled is true".to_string());
            }
            if self.icloud.helper.trim().is_empty() {
                errors.push("icloud.helper is required when icloud.enabled is true".to_string());
            }
        }

        if self.logging.level_filter().is_none() {
            errors.push("logging.level must be one of DEBUG, INFO, WARNING, ERROR, CRITICAL".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(ConfigError::Invalid(errors)) }
    }
}

/// Picks the config file: the explicit path, then `./config.toml`, then the
/// per-user config directory.
pub fn find_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        return local;
    }

    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(CONFIG_FILE)
}

fn write_template(path: &Path) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write { path: path.to_path_buf(), source };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    fs::write(path, TEMPLATE).map_err(write_err)
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let home = dirs::home_dir();
    match (path.strip_prefix('~'), home) {
        (Some(""), Some(home)) => home,
        (Some(rest), Some(home)) if rest.starts_with('/') => home.join(&rest[1..]),
        _ => PathBuf::from(path),
    }
}

pub const TEMPLATE: &str = r#"# Inky Photo Frame configuration

[display]
# Seconds between photos
refresh_interval = 3600
# Perform a full (ghost-clearing) refresh every N photos
full_refresh_every = 10
# Driver palette saturation (0.0 muted .. 1.0 saturated)
saturation = 0.5
# Native panel resolution; the driver may report its own
width = 1600
height = 1200
# "command" drives the panel through driver_command, "preview" writes PNGs
driver = "command"
driver_command = "inky-show"
preview_path = "~/.cache/inky-photo-frame/preview.png"
# Hardware retries: attempts, and the first delay in seconds (doubles each time)
retry_attempts = 3
retry_base_delay = 1.0

[photo]
# Local photo folder
local_path = "~/Photos/Frame"
# "random" or "sequential"
selection_mode = "random"
# Pick up new files without waiting for the next refresh
watch = true
# Include subfolders
recursive = true

[processing]
# Boosts applied before the driver's palette mapping (1.0 = unchanged)
saturation = 1.3
contrast = 1.2
sharpness = 1.2
# Crop portraits from the "top" (faces) or the "center"
portrait_bias = "top"

[icloud]
enabled = false
apple_id = ""
session_path = "~/.config/inky-photo-frame/icloud_session"
cache_path = "~/.cache/inky-photo-frame/icloud"
# Helper program that talks to iCloud Photos
helper = "inky-icloud"

[logging]
# DEBUG, INFO, WARNING, ERROR
level = "INFO"
# Log file (empty for stderr only)
file = ""
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_matches_defaults() {
        let parsed = Config::from_toml(TEMPLATE).unwrap();
        // The template writes apple_id = "" which means "unset".
        assert_eq!(parsed.icloud.apple_id(), None);
        let parsed = Config { icloud: IcloudConfig { apple_id: None, ..parsed.icloud.clone() }, ..parsed };
        assert_eq!(parsed, Config::default());
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = Config::from_toml("[display]\nrefresh_interval = 60\n").unwrap();
        assert_eq!(config.display.refresh_interval, 60);
        assert_eq!(config.display.full_refresh_every, 10);
        assert_eq!(config.display.saturation, 0.5);
        assert_eq!(config.processing.saturation, 1.3);
        assert_eq!(config.processing.contrast, 1.2);
        assert_eq!(config.photo.selection_mode, SelectionMode::Random);
        assert!(!config.icloud.enabled);
    }

    #[test]
    fn test_selection_mode_parses() {
        let config = Config::from_toml("[photo]\nselection_mode = \"sequential\"\n").unwrap();
        assert_eq!(config.photo.selection_mode, SelectionMode::Sequential);
        assert!(Config::from_toml("[photo]\nselection_mode = \"shuffle\"\n").is_err());
    }

    #[test]
    fn test_validation_reports_every_problem() {
        let mut config = Config::default();
        config.display.refresh_interval = 0;
        config.display.saturation = 1.5;
        config.processing.contrast = -1.0;
        config.logging.level = "LOUD".to_string();

        let Err(ConfigError::Invalid(errors)) = config.validate() else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("refresh_interval")));
        assert!(errors.iter().any(|e| e.contains("display.saturation")));
        assert!(errors.iter().any(|e| e.contains("processing.contrast")));
        assert!(errors.iter().any(|e| e.contains("logging.level")));
    }

    #[test]
    fn test_huge_durations_rejected() {
        let mut config = Config::default();
        config.display.refresh_interval = i64::MAX as u64;
        config.display.retry_base_delay = 1e300;

        let Err(ConfigError::Invalid(errors)) = config.validate() else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 2);
        assert_eq!(config.display.retry_base_delay(), Duration::from_secs(3600));

        config.display.retry_base_delay = f64::NAN;
        assert!(config.validate().is_err());
        assert_eq!(config.display.retry_base_delay(), Duration::ZERO);
    }

    #[test]
    fn test_icloud_requires_apple_id() {
        let config = Config::from_toml("[icloud]\nenabled = true\napple_id = \"  \"\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("icloud.apple_id"));

        let config = Config::from_toml("[icloud]\nenabled = true\napple_id = \"me@example.com\"\n").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.icloud.apple_id(), Some("me@example.com"));
    }

    #[test]
    fn test_load_writes_template_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(config.path, path);
        assert_eq!(fs::read_to_string(&path).unwrap(), TEMPLATE);
        assert_eq!(config.display, DisplayConfig::default());
    }

    #[test]
    fn test_load_reports_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[display\nrefresh_interval = ").unwrap();

        assert!(matches!(Config::load(Some(&path)), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_log_level_aliases() {
        let mut logging = LoggingConfig::default();
        assert_eq!(logging.level_filter(), Some(LevelFilter::Info));
        logging.level = "warning".to_string();
        assert_eq!(logging.level_filter(), Some(LevelFilter::Warn));
        logging.level = "CRITICAL".to_string();
        assert_eq!(logging.level_filter(), Some(LevelFilter::Error));
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde("~/Photos/Frame"), home.join("Photos/Frame"));
        assert_eq!(expand_tilde("~"), home);
        assert_eq!(expand_tilde("/srv/photos"), PathBuf::from("/srv/photos"));
        assert_eq!(expand_tilde("~other/x"), PathBuf::from("~other/x"));
    }
}
