//! Courier configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourierConfig {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub wifi: WifiSettings,
    #[serde(default)]
    pub usb: UsbSettings,
    #[serde(default)]
    pub bundle: BundleSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    #[serde(default = "GeneralSettings::default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl GeneralSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// WiFi (UDP broadcast) channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WifiSettings {
    /// Port advertisements are broadcast to
    #[serde(default = "WifiSettings::default_advertise_port")]
    pub advertise_port: u16,
    /// Port book requests arrive on
    #[serde(default = "WifiSettings::default_listen_port")]
    pub listen_port: u16,
    /// Port the reader's HTTP receiver listens on
    #[serde(default = "WifiSettings::default_reader_http_port")]
    pub reader_http_port: u16,
    /// Fixed destination for advertisements, overriding the directed broadcast
    #[serde(default)]
    pub broadcast_addr: Option<String>,
    /// Replaces the netmask read from the local interface
    #[serde(default)]
    pub subnet_mask: Option<String>,
    #[serde(default = "WifiSettings::default_advertise_interval_ms")]
    pub advertise_interval_ms: u64,
}

impl Default for WifiSettings {
    fn default() -> Self {
        Self {
            advertise_port: Self::default_advertise_port(),
            listen_port: Self::default_listen_port(),
            reader_http_port: Self::default_reader_http_port(),
            broadcast_addr: None,
            subnet_mask: None,
            advertise_interval_ms: Self::default_advertise_interval_ms(),
        }
    }
}

impl WifiSettings {
    fn default_advertise_port() -> u16 {
        protocol::ADVERTISE_PORT
    }

    fn default_listen_port() -> u16 {
        protocol::ACK_PORT
    }

    fn default_reader_http_port() -> u16 {
        protocol::READER_HTTP_PORT
    }

    fn default_advertise_interval_ms() -> u64 {
        1000
    }

    pub fn advertise_interval(&self) -> Duration {
        Duration::from_millis(self.advertise_interval_ms)
    }

    pub fn broadcast_ip(&self) -> Result<Option<Ipv4Addr>> {
        self.broadcast_addr
            .as_deref()
            .map(|a| {
                a.parse()
                    .with_context(|| format!("Invalid broadcast address '{}'", a))
            })
            .transpose()
    }

    pub fn subnet_mask_ip(&self) -> Result<Option<Ipv4Addr>> {
        self.subnet_mask
            .as_deref()
            .map(|m| {
                m.parse()
                    .with_context(|| format!("Invalid subnet mask '{}'", m))
            })
            .transpose()
    }
}

/// USB (MTP) channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Directory under which MTP devices are mounted (one subdirectory per device)
    #[serde(default = "UsbSettings::default_mount_root")]
    pub mount_root: String,
    /// Name of the folder that marks a device as ready
    #[serde(default = "UsbSettings::default_marker_dir")]
    pub marker_dir: String,
    #[serde(default = "UsbSettings::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "UsbSettings::default_copy_buffer_kib")]
    pub copy_buffer_kib: usize,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            mount_root: Self::default_mount_root(),
            marker_dir: Self::default_marker_dir(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            copy_buffer_kib: Self::default_copy_buffer_kib(),
        }
    }
}

impl UsbSettings {
    fn default_mount_root() -> String {
        // gvfs mounts MTP devices under $XDG_RUNTIME_DIR/gvfs
        match dirs::runtime_dir() {
            Some(dir) => dir.join("gvfs").display().to_string(),
            None => "~/.gvfs".to_string(),
        }
    }

    fn default_marker_dir() -> String {
        common::MARKER_DIRECTORY.to_string()
    }

    fn default_poll_interval_ms() -> u64 {
        1000
    }

    fn default_copy_buffer_kib() -> usize {
        256
    }

    pub fn mount_root_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.mount_root).as_ref())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn copy_buffer_bytes(&self) -> usize {
        self.copy_buffer_kib * 1024
    }
}

/// Where bundles are staged before sending
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleSettings {
    /// Defaults to the system temp directory
    #[serde(default)]
    pub staging_dir: Option<String>,
}

impl BundleSettings {
    pub fn staging_path(&self) -> PathBuf {
        match &self.staging_dir {
            Some(dir) => PathBuf::from(shellexpand::tilde(dir).as_ref()),
            None => std::env::temp_dir().join("book-courier"),
        }
    }
}

impl CourierConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/book-courier/courier.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: CourierConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
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
            config_dir.join("book-courier").join("courier.toml")
        } else {
            PathBuf::from(".config/book-courier/courier.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            ));
        }

        let wifi = &self.wifi;
        let ports = [
            ("advertise_port", wifi.advertise_port),
            ("listen_port", wifi.listen_port),
            ("reader_http_port", wifi.reader_http_port),
        ];
        for (name, port) in ports {
            if port == 0 {
                return Err(anyhow!("wifi.{} must not be 0", name));
            }
        }
        if wifi.advertise_port == wifi.listen_port
            || wifi.advertise_port == wifi.reader_http_port
            || wifi.listen_port == wifi.reader_http_port
        {
            return Err(anyhow!(
                "wifi ports must be distinct (advertise {}, listen {}, reader http {})",
                wifi.advertise_port,
                wifi.listen_port,
                wifi.reader_http_port
            ));
        }
        wifi.broadcast_ip()?;
        wifi.subnet_mask_ip()?;
        if wifi.advertise_interval_ms == 0 {
            return Err(anyhow!("wifi.advertise_interval_ms must be greater than 0"));
        }

        let usb = &self.usb;
        if usb.poll_interval_ms == 0 {
            return Err(anyhow!("usb.poll_interval_ms must be greater than 0"));
        }
        if usb.copy_buffer_kib == 0 {
            return Err(anyhow!("usb.copy_buffer_kib must be greater than 0"));
        }
        if usb.marker_dir.is_empty()
            || usb.marker_dir.contains('/')
            || usb.marker_dir.contains('\\')
            || usb.marker_dir == "."
            || usb.marker_dir == ".."
        {
            return Err(anyhow!(
                "Invalid usb.marker_dir '{}', must be a single folder name",
                usb.marker_dir
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CourierConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.wifi.advertise_port, 5913);
        assert_eq!(config.wifi.listen_port, 5915);
        assert_eq!(config.usb.marker_dir, "Bloom");
        assert_eq!(config.usb.copy_buffer_bytes(), 256 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = CourierConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: CourierConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.general.log_level, parsed.general.log_level);
        assert_eq!(config.usb.mount_root, parsed.usb.mount_root);
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = CourierConfig::default();
        config.general.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.general.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_marker_dir() {
        let mut config = CourierConfig::default();
        config.usb.marker_dir = "Bloom/books".to_string();
        assert!(config.validate().is_err());

        config.usb.marker_dir = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tilde_in_staging_dir() {
        let settings = BundleSettings {
            staging_dir: Some("~/bundles".to_string()),
        };
        assert!(!settings.staging_path().to_string_lossy().starts_with('~'));
    }
}
