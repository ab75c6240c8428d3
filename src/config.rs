//! Agent configuration, loaded from a single TOML file.
//!
//! Every section has defaults, so a file only needs the values that differ:
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyAMA0"
//!
//! [[channels]]
//! name = "B01"
//! source = "serial"
//!
//! [[channels]]
//! name = "B02"
//! source = "decoder"
//! samples = "/dev/pack-b02"
//!
//! [influx]
//! url = "http://192.168.2.70:8086"
//! org = "home"
//! bucket = "batteries"
//! token = "..."
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broadcaster::DEFAULT_INTERVAL;
use crate::channel::MAX_CHANNELS;
use crate::error::{Error, Result};
use crate::transport::serial::DEFAULT_BAUD_RATE;

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "packwatch.toml";

/// Shared serial peripheral.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSection {
    /// Device path of the shared UART.
    pub port: String,
    /// Bus baud rate.
    pub baud_rate: u32,
    /// Pause after opening the port before it is used.
    pub settle_ms: u64,
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            port: "/dev/ttyAMA0".into(),
            baud_rate: DEFAULT_BAUD_RATE,
            settle_ms: 100,
        }
    }
}

impl SerialSection {
    #[must_use]
    pub const fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// How a channel is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// RX line of the shared serial peripheral.
    Serial,
    /// Own input pin, decoded in software.
    Decoder,
}

/// One pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Name used in log lines and the metrics `unit` tag.
    pub name: String,
    pub source: SourceType,
    /// Pin sample device, for `decoder` channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcasterConfig {
    /// Keep-alive cadence in milliseconds.
    pub interval_ms: u64,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL.as_millis() as u64,
        }
    }
}

impl BroadcasterConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Pause between poll cycles, in milliseconds.
    pub idle_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { idle_ms: 20 }
    }
}

impl PollConfig {
    #[must_use]
    pub const fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }
}

/// InfluxDB v2 write endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    /// Base URL, e.g. `http://localhost:8086`.
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".into(),
            org: String::new(),
            bucket: String::new(),
            token: String::new(),
        }
    }
}

/// UDP log receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyslogConfig {
    pub host: String,
    pub port: u16,
}

impl Default for SyslogConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 514,
        }
    }
}

/// Self-update settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub enabled: bool,
    /// Repository holding `main/version.json` and `main/<filename>`.
    pub repo_url: String,
    /// Payload file name inside the repository.
    pub filename: String,
    /// Local version record.
    pub version_file: PathBuf,
    /// Where the payload is written before it is published.
    pub staging_file: PathBuf,
    /// The running unit that gets replaced.
    pub target: PathBuf,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            repo_url: String::new(),
            filename: "packwatch".into(),
            version_file: PathBuf::from("version.json"),
            staging_file: PathBuf::from("latest_unit"),
            target: PathBuf::from("packwatch"),
        }
    }
}

/// Run-enable input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunEnableConfig {
    /// GPIO `value` file; operation is enabled while it reads `0`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<PathBuf>,
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub serial: SerialSection,
    pub channels: Vec<ChannelConfig>,
    pub broadcaster: BroadcasterConfig,
    pub poll: PollConfig,
    pub influx: InfluxConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syslog: Option<SyslogConfig>,
    pub update: UpdateConfig,
    pub run_enable: RunEnableConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            serial: SerialSection::default(),
            channels: vec![ChannelConfig {
                name: "B01".into(),
                source: SourceType::Serial,
                samples: None,
            }],
            broadcaster: BroadcasterConfig::default(),
            poll: PollConfig::default(),
            influx: InfluxConfig::default(),
            syslog: None,
            update: UpdateConfig::default(),
            run_enable: RunEnableConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read, parsed or fails
    /// validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        let config = Self::from_toml(&content)?;
        tracing::info!("configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Parses and validates a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on parse or validation failure.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config {
            message: e.to_string(),
        })
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] listing every problem found.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.channels.is_empty() || self.channels.len() > MAX_CHANNELS {
            errors.push(format!(
                "expected 1 to {MAX_CHANNELS} channels, got {}",
                self.channels.len()
            ));
        }

        let mut names = HashSet::new();
        for channel in &self.channels {
            if channel.name.trim().is_empty() {
                errors.push("channel name cannot be empty".into());
            } else if !names.insert(channel.name.as_str()) {
                errors.push(format!("duplicate channel name {}", channel.name));
            }
            if channel.source == SourceType::Decoder && channel.samples.is_none() {
                errors.push(format!("decoder channel {} has no samples device", channel.name));
            }
        }

        let serial_channels = self
            .channels
            .iter()
            .filter(|c| c.source == SourceType::Serial)
            .count();
        if serial_channels > 1 {
            errors.push(format!(
                "only one channel can use the serial peripheral, got {serial_channels}"
            ));
        }

        if self.broadcaster.interval_ms == 0 {
            errors.push("broadcaster interval cannot be 0".into());
        }
        if self.update.enabled && self.update.repo_url.is_empty() {
            errors.push("update is enabled but repo_url is empty".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Config {
                message: errors.join("; "),
            })
        }
    }
}
