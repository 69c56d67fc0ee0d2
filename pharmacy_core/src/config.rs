//! Configuration file support for the pharmacy manager.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/pharmacy/config.toml`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub inventory: InventoryConfig,

    #[serde(default)]
    pub reminders: ReminderConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Where backup archives go; defaults to `<data_dir>/backups`
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backup_dir: None,
        }
    }
}

impl DataConfig {
    pub fn backup_dir_for(&self, data_dir: &Path) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("backups"))
    }
}

/// Inventory alert thresholds
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InventoryConfig {
    #[serde(default = "default_expiry_warning_days")]
    pub expiry_warning_days: i64,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            expiry_warning_days: default_expiry_warning_days(),
        }
    }
}

/// Refill reminder windows
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReminderConfig {
    /// Days before the due date a reminder counts as due
    #[serde(default = "default_due_window_days")]
    pub due_window_days: i64,

    /// Look-ahead for the "due refills" listing
    #[serde(default = "default_due_soon_days")]
    pub due_soon_days: i64,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            due_window_days: default_due_window_days(),
            due_soon_days: default_due_soon_days(),
        }
    }
}

/// Environment variable naming an alternate config file
pub const CONFIG_ENV: &str = "PHARMACY_CONFIG";

/// `dirs` lookup with a `$HOME`-relative fallback, then the working directory.
fn base_dir(found: Option<PathBuf>, home_relative: &str) -> PathBuf {
    found.unwrap_or_else(|| {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(home_relative))
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

fn default_data_dir() -> PathBuf {
    base_dir(dirs::data_local_dir(), ".local/share").join("pharmacy")
}

fn default_expiry_warning_days() -> i64 {
    30
}

fn default_due_window_days() -> i64 {
    crate::reminders::DEFAULT_DUE_WINDOW_DAYS
}

fn default_due_soon_days() -> i64 {
    7
}

impl Config {
    /// Load from `$PHARMACY_CONFIG` or the standard path.
    ///
    /// A missing file at the standard path yields defaults; a missing file
    /// named explicitly through the environment is an error.
    pub fn load() -> Result<Self> {
        if let Some(explicit) = std::env::var_os(CONFIG_ENV) {
            return Self::load_from(Path::new(&explicit));
        }
        let path = Self::default_config_path();
        if !path.exists() {
            tracing::debug!(?path, "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Config = toml::from_str(&std::fs::read_to_string(path)?)?;
        config.validate()?;
        tracing::debug!(?path, "config loaded");
        Ok(config)
    }

    pub fn default_config_path() -> PathBuf {
        base_dir(dirs::config_dir(), ".config")
            .join("pharmacy")
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.inventory.expiry_warning_days < 0 {
            return Err(Error::Config(
                "inventory.expiry_warning_days must not be negative".into(),
            ));
        }
        if self.reminders.due_window_days < 0 || self.reminders.due_soon_days < 0 {
            return Err(Error::Config(
                "reminder windows must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Write as pretty TOML, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("cannot serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.inventory.expiry_warning_days, 30);
        assert_eq!(config.reminders.due_window_days, 3);
        assert_eq!(config.reminders.due_soon_days, 7);
        assert!(config.data.data_dir.ends_with("pharmacy"));
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config::default();
        config.data.backup_dir = Some(temp_dir.path().join("archive"));
        config.save_to(&path).unwrap();

        let parsed = Config::load_from(&path).unwrap();
        assert_eq!(parsed.data.backup_dir, config.data.backup_dir);
        assert_eq!(
            parsed.reminders.due_soon_days,
            config.reminders.due_soon_days
        );
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[reminders]
due_window_days = 5
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.reminders.due_window_days, 5);
        assert_eq!(config.reminders.due_soon_days, 7); // default
        assert_eq!(config.inventory.expiry_warning_days, 30); // default
    }

    #[test]
    fn test_negative_window_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[inventory]\nexpiry_warning_days = -1\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_backup_dir_defaults_under_data_dir() {
        let config = DataConfig::default();
        let data_dir = PathBuf::from("/srv/pharmacy");
        assert_eq!(config.backup_dir_for(&data_dir), data_dir.join("backups"));
    }
}
