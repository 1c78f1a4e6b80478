use crate::utils::{AppError, Result};
use crate::{log_debug, log_info};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_DIR_NAME: &str = "menu-admin";
const SETTINGS_FILE_NAME: &str = "settings.json";

pub const DEFAULT_MAX_IMAGE_SIZE: u64 = 50 * 1024 * 1024;
pub const DEFAULT_LOGIN_MAX_ATTEMPTS: usize = 5;
pub const DEFAULT_LOGIN_WINDOW_SECS: u64 = 15 * 60;
pub const DEFAULT_ERROR_DISPLAY_LIMIT: usize = 10;

/// Runtime settings of the back office.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Holds `menu.json` and `audit_log.json`.
    pub data_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub upload_url_prefix: String,
    pub max_image_size: u64,
    pub login_max_attempts: usize,
    pub login_window_secs: u64,
    /// How many import errors an operator gets to see.
    pub error_display_limit: usize,
    pub avif_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            upload_dir: PathBuf::from("static/uploads/dishes"),
            upload_url_prefix: "/static/uploads/dishes".to_string(),
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            login_max_attempts: DEFAULT_LOGIN_MAX_ATTEMPTS,
            login_window_secs: DEFAULT_LOGIN_WINDOW_SECS,
            error_display_limit: DEFAULT_ERROR_DISPLAY_LIMIT,
            avif_enabled: true,
        }
    }
}

impl Settings {
    pub fn login_window(&self) -> Duration {
        Duration::from_secs(self.login_window_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

pub struct ConfigService {
    config_dir: PathBuf,
}

impl ConfigService {
    pub fn new() -> Result<Self> {
        Self::new_with_dir(Self::get_config_dir()?)
    }

    pub fn new_with_dir(config_dir: PathBuf) -> Result<Self> {
        if !config_dir.exists() {
            std::fs::create_dir_all(&config_dir).map_err(|e| {
                AppError::Configuration(format!("Failed to create config directory: {}", e))
            })?;
        }

        Ok(Self { config_dir })
    }

    /// Stored settings, or the defaults when none were saved yet.
    pub async fn load_settings(&self) -> Result<Settings> {
        let path = self.get_settings_file_path();
        if !path.exists() {
            log_debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Settings::default());
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| AppError::Configuration(format!("Failed to read settings: {}", e)))?;
        let settings: Settings = serde_json::from_str(&content)
            .map_err(|e| AppError::Configuration(format!("Failed to deserialize settings: {}", e)))?;

        let validation = self.validate_settings(&settings);
        if !validation.valid {
            return Err(AppError::Configuration(format!(
                "Invalid settings: {}",
                validation.errors.join(", ")
            )));
        }
        Ok(settings)
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<()> {
        let validation = self.validate_settings(settings);
        if !validation.valid {
            return Err(AppError::Configuration(format!(
                "Invalid settings: {}",
                validation.errors.join(", ")
            )));
        }

        let path = self.get_settings_file_path();
        let json = serde_json::to_string_pretty(settings)
            .map_err(|e| AppError::Configuration(format!("Failed to serialize settings: {}", e)))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| AppError::Configuration(format!("Failed to save settings: {}", e)))?;

        log_info!(path = %path.display(), "Settings saved");
        Ok(())
    }

    pub fn validate_settings(&self, settings: &Settings) -> SettingsValidation {
        let mut errors = Vec::new();

        if settings.upload_dir.as_os_str().is_empty() {
            errors.push("Upload directory is required".to_string());
        }

        if settings.data_dir.as_os_str().is_empty() {
            errors.push("Data directory is required".to_string());
        }

        if !settings.upload_url_prefix.starts_with('/') {
            errors.push("Upload URL prefix must start with /".to_string());
        }

        if settings.max_image_size == 0 {
            errors.push("Maximum image size must be positive".to_string());
        }

        if settings.login_max_attempts == 0 {
            errors.push("Login attempt limit must be at least 1".to_string());
        }

        if settings.login_window_secs == 0 {
            errors.push("Login window must be positive".to_string());
        }

        SettingsValidation {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub async fn reset_settings(&self) -> Result<()> {
        let path = self.get_settings_file_path();
        if path.exists() {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| AppError::Configuration(format!("Failed to delete settings: {}", e)))?;
        }
        Ok(())
    }

    fn get_config_dir() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .ok_or_else(|| AppError::Configuration("Failed to get config directory".to_string()))?
            .join(CONFIG_DIR_NAME))
    }

    pub fn get_settings_file_path(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE_NAME)
    }
}
