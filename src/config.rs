//! Configuration of a session, its serial link and the device profile driven over it.
//!
//! Everything here can be written in TOML:
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//!
//! [session]
//! timeout_ms = 2500
//! response_terminator = "\r\n"
//! ```

use std::path::{Path, PathBuf};

use fugit::MillisDurationU32;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{command::CommonQuery, device::DeviceProfile};

/// Configuration loading and validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read {
        path: PathBuf,
        error: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// Device profile. The built-in AX6003P profile is used when absent.
    #[serde(default)]
    pub device: Option<DeviceProfile>,
}

impl DriverConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.serial.validate()?;
        self.session.validate()?;
        if let Some(device) = &self.device {
            device.limits.validate()?;
        }
        Ok(())
    }

    /// The configured device profile, or the built-in one.
    pub fn device_profile(&self) -> DeviceProfile {
        self.device.clone().unwrap_or_else(DeviceProfile::ax6003p)
    }
}

/// Per-session protocol settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Appended to every command line.
    #[serde(default = "default_terminator")]
    pub command_terminator: String,
    /// Marks the end of every response line. Stripped from responses.
    #[serde(default = "default_terminator")]
    pub response_terminator: String,
    /// Default time allowed for a query to complete.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u32,
    /// Discard response lines identical to the command just sent.
    #[serde(default)]
    pub skip_echo: bool,
    /// Command sent by the status query. Its integer reply is mapped through the fixed status
    /// table, see [`StatusCode`](crate::status::StatusCode) for how that reads with `*ESR?`.
    #[serde(default = "default_status_command")]
    pub status_command: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_terminator: default_terminator(),
            response_terminator: default_terminator(),
            timeout_ms: default_timeout_ms(),
            skip_echo: false,
            status_command: default_status_command(),
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> MillisDurationU32 {
        MillisDurationU32::millis(self.timeout_ms)
    }

    pub fn with_timeout(mut self, timeout: MillisDurationU32) -> Self {
        self.timeout_ms = timeout.to_millis();
        self
    }

    pub fn with_terminators(mut self, command: &str, response: &str) -> Self {
        self.command_terminator = command.to_owned();
        self.response_terminator = response.to_owned();
        self
    }

    pub fn with_skip_echo(mut self, skip_echo: bool) -> Self {
        self.skip_echo = skip_echo;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, terminator) in [
            ("command_terminator", &self.command_terminator),
            ("response_terminator", &self.response_terminator),
        ] {
            if terminator.is_empty() || !terminator.is_ascii() {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be non-empty ASCII, got {terminator:?}"
                )));
            }
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be positive".into()));
        }
        if self.status_command.trim().is_empty() {
            return Err(ConfigError::Invalid("status_command must not be empty".into()));
        }
        Ok(())
    }
}

/// Serial link parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device name, e.g. `/dev/ttyUSB0` or `COM3`.
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default)]
    pub parity: ParityConfig,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// How long a single read on the port blocks before the session re-checks its deadline.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: ParityConfig::default(),
            stop_bits: default_stop_bits(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl SerialConfig {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud_rate must be positive".into()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ConfigError::Invalid(format!(
                "Invalid data bits: {}",
                self.data_bits
            )));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(ConfigError::Invalid(format!(
                "Invalid stop bits: {}",
                self.stop_bits
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Parity configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParityConfig {
    #[default]
    None,
    Odd,
    Even,
}

// Default value functions
fn default_terminator() -> String {
    "\n".to_string()
}

fn default_timeout_ms() -> u32 {
    2500
}

fn default_status_command() -> String {
    CommonQuery::EventStatus.as_str().to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_poll_interval_ms() -> u32 {
    50
}
