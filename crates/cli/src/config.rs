//! CLI configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use transport::TransportConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Vendor filter, disconnect signals and event bus tuning
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "LoggingSettings::default_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LoggingSettings {
    fn default_level() -> String {
        "info".to_string()
    }
}

/// libusb backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Timeout for each interrupt write/read of an exchange
    #[serde(default = "UsbSettings::default_exchange_timeout_ms")]
    pub exchange_timeout_ms: u64,
    /// HID interface number to claim; first HID-class interface if unset
    #[serde(default)]
    pub hid_interface: Option<u8>,
    /// Enumeration interval when libusb has no hot-plug support
    #[serde(default = "UsbSettings::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            exchange_timeout_ms: Self::default_exchange_timeout_ms(),
            hid_interface: None,
            poll_interval_ms: Self::default_poll_interval_ms(),
        }
    }
}

impl UsbSettings {
    fn default_exchange_timeout_ms() -> u64 {
        5_000
    }

    fn default_poll_interval_ms() -> u64 {
        1_000
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl CliConfig {
    /// Load configuration from the specified path
    ///
    /// Without a path, the default location is tried.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref()),
            None => Some(Self::default_path())
                .filter(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?,
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: CliConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("ledger-hid").join("config.toml")
        } else {
            PathBuf::from(".config/ledger-hid/config.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        self.transport
            .validate()
            .map_err(|e| anyhow!("Invalid [transport] section: {}", e))?;

        if self.usb.exchange_timeout_ms == 0 {
            return Err(anyhow!("usb.exchange_timeout_ms must be greater than zero"));
        }
        if self.usb.poll_interval_ms == 0 {
            return Err(anyhow!("usb.poll_interval_ms must be greater than zero"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CliConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.transport.vendor_id, 0x2c97);
        assert_eq!(config.usb.exchange_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = CliConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = CliConfig::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[transport]"));
        assert!(toml.contains("disconnect_signals"));

        let parsed = CliConfig::from_toml(&toml).unwrap();
        assert_eq!(parsed.transport, config.transport);
    }
}
