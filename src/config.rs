//! Configuration handling
//!
//! One TOML file describes every device link. Serial devices are named
//! either by path or by USB serial number; the latter survives the kernel
//! shuffling `/dev/ttyACM*` between boots.

use crate::error::{Error, Result};
use crate::listener::{DEFAULT_CHANNEL_BURST_LEN, DEFAULT_SAMPLE_RATE};
use crate::pinnae::MAX_MOTOR_COUNT;
use crate::transport::resolve_port;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sonar: LinkConfig,
    #[serde(default)]
    pub emitter: LinkConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub pinnae: PinnaeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter: error, warn, info, debug, trace
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

/// How to reach one serial device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Device path, e.g. "/dev/ttyACM0"; takes precedence over
    /// `serial_num` when both are set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// USB serial number to search for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_num: Option<String>,
    pub baud_rate: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            port: None,
            serial_num: None,
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl LinkConfig {
    /// Resolve this link to a concrete device path
    pub fn resolve(&self) -> Result<String> {
        if let Some(port) = &self.port {
            return Ok(port.clone());
        }
        if let Some(serial_num) = &self.serial_num {
            return resolve_port(serial_num);
        }
        Err(Error::Config(
            "link needs either a port or a serial_num".to_string(),
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(flatten)]
    pub link: LinkConfig,
    /// Samples per device burst, both channels combined
    pub channel_burst_len: usize,
    /// Per-channel ADC sample rate, Hz
    pub sample_rate: f64,
    /// Whether the even interleaved sample is the left ear
    pub left_channel_first: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            link: LinkConfig::default(),
            channel_burst_len: DEFAULT_CHANNEL_BURST_LEN,
            sample_rate: DEFAULT_SAMPLE_RATE,
            left_channel_first: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinnaeConfig {
    #[serde(flatten)]
    pub link: LinkConfig,
    /// Motors on the controller board
    pub motor_count: usize,
}

impl Default for PinnaeConfig {
    fn default() -> Self {
        PinnaeConfig {
            link: LinkConfig::default(),
            motor_count: 6,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.pinnae.motor_count == 0 || self.pinnae.motor_count > MAX_MOTOR_COUNT {
            return Err(Error::Config(format!(
                "pinnae.motor_count {} outside 1..={}",
                self.pinnae.motor_count, MAX_MOTOR_COUNT
            )));
        }
        if self.listener.channel_burst_len == 0 {
            return Err(Error::Config(
                "listener.channel_burst_len must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}
