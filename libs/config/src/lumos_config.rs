//! Lumos Configuration Module
//!
//! Loads the link, acquisition and logging settings from an optional TOML
//! file with `LUMOS__SECTION__KEY` environment overrides.

use crate::defaults;
use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "LUMOS";

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct LumosConfig {
    pub link: LinkSettings,
    pub acquisition: AcquisitionSettings,
    pub logging: LoggingSettings,
}

/// Device link settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LinkSettings {
    /// tcp, udp, serial (alias com) or virtual
    pub medium: String,
    /// Host for sockets, device path for serial
    pub address: String,
    /// Port for sockets, baud rate for serial
    pub number: u32,
    pub read_gap_ms: u64,
    pub connect_timeout_ms: u64,
    pub close_timeout_ms: u64,
    /// 0 disables the watchdog
    pub watchdog_ms: u64,
}

/// Acquisition cycle settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct AcquisitionSettings {
    pub data_type: u16,
    pub start_address: u16,
    pub word_count: u16,
    pub channels: usize,
    pub send_timeout_ms: u64,
    pub inbox_attempts: u32,
    pub inbox_wait_ms: u64,
    pub recv_timeout_signaled_ms: u64,
    pub recv_timeout_fallback_ms: u64,
    pub interval_ms: u64,
    pub drain_stale: u32,
}

/// Logging settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            medium: defaults::link::MEDIUM.to_string(),
            address: defaults::link::ADDRESS.to_string(),
            number: defaults::link::PORT,
            read_gap_ms: defaults::link::READ_GAP_MS,
            connect_timeout_ms: defaults::link::CONNECT_TIMEOUT_MS,
            close_timeout_ms: defaults::link::CLOSE_TIMEOUT_MS,
            watchdog_ms: defaults::link::WATCHDOG_MS,
        }
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        use defaults::acquisition as d;
        Self {
            data_type: d::DATA_TYPE,
            start_address: d::START_ADDRESS,
            word_count: d::WORD_COUNT,
            channels: d::CHANNELS,
            send_timeout_ms: d::SEND_TIMEOUT_MS,
            inbox_attempts: d::INBOX_ATTEMPTS,
            inbox_wait_ms: d::INBOX_WAIT_MS,
            recv_timeout_signaled_ms: d::RECV_TIMEOUT_SIGNALED_MS,
            recv_timeout_fallback_ms: d::RECV_TIMEOUT_FALLBACK_MS,
            interval_ms: d::INTERVAL_MS,
            drain_stale: d::DRAIN_STALE,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: defaults::logging::LEVEL.to_string(),
            json: false,
        }
    }
}

impl LinkSettings {
    pub fn read_gap(&self) -> Duration {
        Duration::from_millis(self.read_gap_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// `None` when the watchdog is disabled
    pub fn watchdog(&self) -> Option<Duration> {
        (self.watchdog_ms > 0).then(|| Duration::from_millis(self.watchdog_ms))
    }
}

impl AcquisitionSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl LumosConfig {
    /// Load configuration from an optional file with `LUMOS__*` overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Load with a custom environment prefix
    pub fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading configuration: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .context("Failed to build configuration")?;

        let mut loaded: LumosConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        loaded.expand_env_vars()?;
        loaded.validate()?;
        debug!(?loaded, "Configuration loaded");
        Ok(loaded)
    }

    /// Parse a TOML document without environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()
            .context("Failed to build configuration")?;

        let mut loaded: LumosConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        loaded.expand_env_vars()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Render as TOML, e.g. to seed a config file
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Expand `${VAR}` references in the link address
    pub fn expand_env_vars(&mut self) -> Result<()> {
        let expanded =
            shellexpand::env(&self.link.address).context("Failed to expand link address")?;
        self.link.address = expanded.to_string();
        Ok(())
    }

    /// Reject settings no link or cycle could run with
    pub fn validate(&self) -> Result<()> {
        let medium = self.link.medium.to_ascii_lowercase();
        if !defaults::link::MEDIA.contains(&medium.as_str()) {
            bail!(
                "Unknown link medium '{}', expected one of {:?}",
                self.link.medium,
                defaults::link::MEDIA
            );
        }
        if medium != "virtual" && self.link.number == 0 {
            bail!("link.number must be a port or baud rate, got 0");
        }
        if self.acquisition.word_count == 0 {
            bail!("acquisition.word_count must be positive");
        }
        if self.acquisition.channels == 0 {
            bail!("acquisition.channels must be positive");
        }
        if self.acquisition.inbox_attempts == 0 {
            bail!("acquisition.inbox_attempts must be positive");
        }
        Ok(())
    }
}
