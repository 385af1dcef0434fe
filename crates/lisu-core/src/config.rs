//! TOML-driven framework configuration
//!
//! Declarative definitions for a device, its command contracts and its
//! operating modes. A configuration file carries one `[device]` table plus
//! any number of `[[command]]` and `[[mode]]` tables; every policy knob has
//! a serde default so minimal files stay minimal.
//!
//! ```toml
//! [device]
//! device_id = "drone-1"
//! device_type = "quadcopter"
//! name = "Test Drone"
//! host = "192.168.1.20"
//! port = 7700
//!
//! [[command]]
//! command_id = "set_throttle"
//! name = "Set Throttle"
//! parameters = [
//!     { name = "value", type = "float", required = true, min = 0.0, max = 1.0 },
//! ]
//!
//! [[mode]]
//! mode_id = "flight"
//! name = "Flight"
//! allowed_commands = ["set_throttle"]
//! transitions = [
//!     { from = "initial", to = "armed", conditions = { safety_off = true } },
//! ]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::command::Command;
use crate::device::Device;
use crate::mode::Mode;
use crate::transport::{DeviceAddress, Transport};
use crate::value::{ParamType, ParamValue};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn default_device_type() -> String {
    "generic".to_string()
}

fn default_max_connection_attempts() -> u32 {
    3
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_execution_timeout_ms() -> u64 {
    5000
}

/// `[device]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_id: String,
    #[serde(default = "default_device_type")]
    pub device_type: String,
    #[serde(default)]
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_max_connection_attempts")]
    pub max_connection_attempts: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default)]
    pub available_modes: Vec<String>,
}

/// One entry of a command's `parameters` array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub param_type: Option<ParamType>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,
}

/// `[[command]]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    pub command_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,
}

/// One entry of a mode's `transitions` array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub conditions: BTreeMap<String, ParamValue>,
}

/// `[[mode]]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeConfig {
    pub mode_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub required_commands: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<TransitionSpec>,
    #[serde(default)]
    pub state_variables: BTreeMap<String, ParamValue>,
}

/// Root of a configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameworkConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceConfig>,
    #[serde(default, rename = "command")]
    pub commands: Vec<CommandConfig>,
    #[serde(default, rename = "mode")]
    pub modes: Vec<ModeConfig>,
}

impl FrameworkConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading configuration");
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Structural checks beyond what serde enforces. Transition graphs are
    /// deliberately left open: a transition may reference states that no
    /// other rule declares.
    fn validate(&self) -> Result<(), ConfigError> {
        for command in &self.commands {
            if command.retry_count == 0 {
                return Err(ConfigError::Invalid(format!(
                    "command '{}': retry_count must be at least 1",
                    command.command_id
                )));
            }
            for param in &command.parameters {
                match (param.min, param.max) {
                    (Some(min), Some(max)) if min > max => {
                        return Err(ConfigError::Invalid(format!(
                            "command '{}': parameter '{}' has min {} > max {}",
                            command.command_id, param.name, min, max
                        )));
                    }
                    (Some(_), None) | (None, Some(_)) => {
                        return Err(ConfigError::Invalid(format!(
                            "command '{}': parameter '{}' declares only one range bound",
                            command.command_id, param.name
                        )));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

impl Device {
    /// Build a device from its `[device]` table, speaking through
    /// `transport`.
    pub fn from_config(config: &DeviceConfig, transport: Arc<dyn Transport>) -> Self {
        let name = if config.name.is_empty() {
            config.device_id.clone()
        } else {
            config.name.clone()
        };
        Device::new(
            config.device_id.clone(),
            config.device_type.clone(),
            name,
            DeviceAddress::new(config.host.clone(), config.port),
            transport,
        )
        .with_connection_policy(
            config.max_connection_attempts,
            Duration::from_millis(config.reconnect_delay_ms),
        )
        .with_heartbeat_interval(Duration::from_secs(config.heartbeat_interval_secs))
        .with_available_modes(config.available_modes.iter().cloned())
    }
}

impl Command {
    /// Build a command contract from its `[[command]]` table.
    pub fn from_config(config: &CommandConfig) -> Self {
        let name = if config.name.is_empty() {
            config.command_id.clone()
        } else {
            config.name.clone()
        };
        let mut command = Command::new(
            config.command_id.clone(),
            name,
            config.description.clone(),
        )
        .with_retry_policy(
            config.retry_count,
            Duration::from_millis(config.retry_delay_ms),
        )
        .with_execution_timeout(Duration::from_millis(config.execution_timeout_ms));

        for param in &config.parameters {
            if param.required {
                command = command.with_required_parameter(param.name.as_str());
            }
            if let Some(param_type) = param.param_type {
                command = command.with_parameter_type(param.name.as_str(), param_type);
            }
            if let (Some(min), Some(max)) = (param.min, param.max) {
                command = command.with_parameter_range(param.name.as_str(), min, max);
            }
            if let Some(default) = &param.default {
                command = command.with_default(param.name.as_str(), default.clone());
            }
        }

        command
    }
}

impl Mode {
    /// Build a mode from its `[[mode]]` table. State variables listed in
    /// the table are set silently, without observer notifications.
    pub fn from_config(config: &ModeConfig) -> Self {
        let name = if config.name.is_empty() {
            config.mode_id.clone()
        } else {
            config.name.clone()
        };
        let mode = Mode::new(
            config.mode_id.clone(),
            name,
            config.description.clone(),
        );

        for command_id in &config.allowed_commands {
            let required = config.required_commands.iter().any(|c| c == command_id);
            mode.add_command(command_id, required);
        }
        // Required commands missing from the allowed list are still legal.
        for command_id in &config.required_commands {
            mode.add_command(command_id, true);
        }

        for transition in &config.transitions {
            mode.add_transition(&transition.from, &transition.to, transition.conditions.clone());
        }
        for (name, value) in &config.state_variables {
            mode.seed_state_variable(name, value.clone());
        }

        mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use pretty_assertions::assert_eq;

    const FULL_DOC: &str = r#"
        [device]
        device_id = "drone-1"
        device_type = "quadcopter"
        name = "Test Drone"
        host = "192.168.1.20"
        port = 7700
        max_connection_attempts = 5
        available_modes = ["flight"]

        [[command]]
        command_id = "set_throttle"
        name = "Set Throttle"
        retry_count = 2
        retry_delay_ms = 10
        parameters = [
            { name = "value", type = "float", required = true, min = 0.0, max = 1.0 },
            { name = "ramp", type = "boolean", default = false },
        ]

        [[mode]]
        mode_id = "flight"
        name = "Flight"
        allowed_commands = ["set_throttle"]
        required_commands = ["set_throttle"]
        transitions = [
            { from = "initial", to = "armed", conditions = { safety_off = true } },
            { from = "armed", to = "airborne" },
        ]
        state_variables = { safety_off = false }
    "#;

    #[test]
    fn test_full_document_round_trip() {
        let config = FrameworkConfig::from_toml_str(FULL_DOC).unwrap();

        let device_config = config.device.as_ref().unwrap();
        let device = Device::from_config(device_config, Arc::new(MockTransport::new()));
        assert_eq!(device.device_id(), "drone-1");
        assert_eq!(device.max_connection_attempts(), 5);
        assert_eq!(device.available_modes(), vec!["flight".to_string()]);
        assert_eq!(device.address().to_string(), "192.168.1.20:7700");

        let command = Command::from_config(&config.commands[0]);
        assert_eq!(command.command_id(), "set_throttle");
        assert_eq!(command.retry_count(), 2);
        let info = command.parameter_info();
        assert_eq!(info.required, vec!["value".to_string()]);
        assert_eq!(info.types["value"], ParamType::Float);
        assert_eq!(info.defaults["ramp"], ParamValue::Bool(false));

        let mode = Mode::from_config(&config.modes[0]);
        assert!(mode.is_command_allowed("set_throttle"));
        assert_eq!(mode.required_commands(), vec!["set_throttle".to_string()]);
        assert_eq!(
            mode.get_state_variable("safety_off"),
            Some(ParamValue::Bool(false))
        );
        assert!(mode.can_transition_to("armed").is_err());
        mode.set_state_variable("safety_off", ParamValue::Bool(true));
        assert!(mode.transition_to("armed"));
        assert!(mode.transition_to("airborne"));
    }

    #[test]
    fn test_defaults_applied() {
        let config = FrameworkConfig::from_toml_str(
            r#"
            [[command]]
            command_id = "ping"
            "#,
        )
        .unwrap();

        let command = Command::from_config(&config.commands[0]);
        assert_eq!(command.name(), "ping");
        assert_eq!(command.retry_count(), 3);
        assert_eq!(command.retry_delay(), Duration::from_millis(1000));
        assert_eq!(command.execution_timeout(), Duration::from_millis(5000));
    }

    #[test]
    fn test_zero_retry_count_rejected() {
        let err = FrameworkConfig::from_toml_str(
            r#"
            [[command]]
            command_id = "ping"
            retry_count = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("retry_count"));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let err = FrameworkConfig::from_toml_str(
            r#"
            [[command]]
            command_id = "set_throttle"
            parameters = [{ name = "value", min = 1.0, max = 0.0 }]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_half_open_range_rejected() {
        let err = FrameworkConfig::from_toml_str(
            r#"
            [[command]]
            command_id = "set_throttle"
            parameters = [{ name = "value", min = 0.0 }]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("only one range bound"));
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        let err = FrameworkConfig::from_toml_str("[device").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let err = FrameworkConfig::load("/nonexistent/lisu.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
