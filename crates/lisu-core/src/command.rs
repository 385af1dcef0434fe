//! Command contract and retried execution
//!
//! A `Command` is a registered, stateless unit of action: a declared
//! parameter contract (required names, types, inclusive ranges, defaults)
//! plus an execution policy (timeout, bounded retries with a cancellable
//! delay between attempts). Results are returned and reported to observers,
//! never stored on the command itself.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::device::Device;
use crate::observer::{CommandObserver, ObserverSet};
use crate::transport::TransportError;
use crate::value::{ParamMap, ParamType, ParamValue};

/// Inclusive numeric bounds for a declared parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
}

/// Parameter contract violation. Detected before any side effect and never
/// retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Missing required parameter: {name}")]
    MissingParameter { name: String },

    #[error("Invalid type for parameter {name}: expected {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: ParamType,
        actual: ParamType,
    },

    #[error("Parameter {name} out of range: {min} <= {value} <= {max}")]
    OutOfRange {
        name: String,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("Parameter {name} has a declared range but is not numeric")]
    NotNumeric { name: String },
}

/// Terminal failure of an `execute` call
#[derive(Debug, Error)]
pub enum CommandError {
    /// Parameter validation failed; the transport was never touched.
    #[error(transparent)]
    Rejected(#[from] ValidationError),

    /// Every attempt of the retry budget failed.
    #[error("Command '{command_id}' failed after {attempts} attempts: {source}")]
    Exhausted {
        command_id: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// The cancellation token fired while waiting to retry.
    #[error("Command '{command_id}' cancelled while waiting to retry")]
    Cancelled { command_id: String },
}

/// Terminal status reported to command observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    ValidationError,
    Success,
    Error,
}

/// Successful execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub execution_id: Uuid,
    pub command_id: String,
    pub device_id: String,
    pub parameters: ParamMap,
    pub timestamp: DateTime<Utc>,
    /// 1-based attempt on which the command succeeded
    pub attempt: u32,
}

/// Terminal failure record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandFailure {
    pub error: String,
    pub command_id: String,
    pub device_id: String,
    pub parameters: ParamMap,
    pub timestamp: DateTime<Utc>,
    /// Total attempts performed before giving up
    pub attempts: u32,
}

/// Validation rejection record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub error: String,
}

/// Payload delivered alongside `CommandStatus` to observers. Serializes
/// untagged so consumers see the bare record.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CommandReport {
    Rejected(ValidationReport),
    Outcome(CommandOutcome),
    Failure(CommandFailure),
}

/// Read-only reflection of a command's parameter contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub required: Vec<String>,
    pub types: BTreeMap<String, ParamType>,
    pub ranges: BTreeMap<String, ParamRange>,
    pub defaults: ParamMap,
}

const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RETRY_COUNT: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// A named, validated, retryable unit of action directed at a device
pub struct Command {
    command_id: String,
    name: String,
    description: String,

    required_parameters: Vec<String>,
    parameter_types: BTreeMap<String, ParamType>,
    parameter_ranges: BTreeMap<String, ParamRange>,
    defaults: ParamMap,

    execution_timeout: Duration,
    retry_count: u32,
    retry_delay: Duration,

    observers: ObserverSet<dyn CommandObserver>,
}

impl Command {
    pub fn new(
        command_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            command_id: command_id.into(),
            name: name.into(),
            description: description.into(),
            required_parameters: Vec::new(),
            parameter_types: BTreeMap::new(),
            parameter_ranges: BTreeMap::new(),
            defaults: ParamMap::new(),
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
            observers: ObserverSet::new(),
        }
    }

    /// Mark a parameter as required. Declaration order decides which missing
    /// parameter is reported first.
    pub fn with_required_parameter(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.required_parameters.contains(&name) {
            self.required_parameters.push(name);
        }
        self
    }

    pub fn with_parameter_type(mut self, name: impl Into<String>, param_type: ParamType) -> Self {
        self.parameter_types.insert(name.into(), param_type);
        self
    }

    /// Declare inclusive bounds for a numeric parameter.
    pub fn with_parameter_range(mut self, name: impl Into<String>, min: f64, max: f64) -> Self {
        self.parameter_ranges
            .insert(name.into(), ParamRange { min, max });
        self
    }

    pub fn with_default(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.defaults.insert(name.into(), value);
        self
    }

    /// Retry budget and inter-attempt delay. The budget is clamped to at
    /// least one attempt.
    pub fn with_retry_policy(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        self.retry_count = retry_count.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn command_id(&self) -> &str {
        &self.command_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn execution_timeout(&self) -> Duration {
        self.execution_timeout
    }

    /// Read-only view of the declared contract, for UI or documentation
    /// consumers.
    pub fn parameter_info(&self) -> ParameterInfo {
        ParameterInfo {
            required: self.required_parameters.clone(),
            types: self.parameter_types.clone(),
            ranges: self.parameter_ranges.clone(),
            defaults: self.defaults.clone(),
        }
    }

    // =========================================================================
    // Observers
    // =========================================================================

    pub fn add_observer(&self, observer: &Arc<dyn CommandObserver>) {
        self.observers.subscribe(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn CommandObserver>) {
        self.observers.unsubscribe(observer);
    }

    fn notify_observers(&self, status: CommandStatus, report: &CommandReport) {
        self.observers
            .notify(|o| o.on_command_executed(self, status, report));
    }

    // =========================================================================
    // Validation and execution
    // =========================================================================

    /// Check `params` against the declared contract.
    ///
    /// Three ordered phases, first failure wins: required parameters
    /// present, declared types match, declared ranges satisfied.
    pub fn validate_parameters(&self, params: &ParamMap) -> Result<(), ValidationError> {
        for name in &self.required_parameters {
            if !params.contains_key(name) {
                return Err(ValidationError::MissingParameter { name: name.clone() });
            }
        }

        for (name, value) in params {
            if let Some(expected) = self.parameter_types.get(name) {
                if !value.matches(*expected) {
                    return Err(ValidationError::TypeMismatch {
                        name: name.clone(),
                        expected: *expected,
                        actual: value.type_of(),
                    });
                }
            }
        }

        for (name, value) in params {
            if let Some(range) = self.parameter_ranges.get(name) {
                match value.as_f64() {
                    Some(v) if v >= range.min && v <= range.max => {}
                    Some(v) => {
                        return Err(ValidationError::OutOfRange {
                            name: name.clone(),
                            min: range.min,
                            max: range.max,
                            value: v,
                        })
                    }
                    None => return Err(ValidationError::NotNumeric { name: name.clone() }),
                }
            }
        }

        Ok(())
    }

    /// Execute against `device` with a token that never fires.
    pub async fn execute(
        &self,
        device: &Device,
        params: &ParamMap,
    ) -> Result<CommandOutcome, CommandError> {
        self.execute_cancellable(device, params, &CancellationToken::new())
            .await
    }

    /// Validate, then attempt the transport send up to `retry_count` times.
    ///
    /// Attempts are strictly sequential on the calling task. Each attempt is
    /// bounded by `execution_timeout`; between failing attempts the task
    /// waits `retry_delay`, racing the wait against `cancel` so a shutdown
    /// signal aborts a pending retry without completing it.
    ///
    /// Whether the command is legal in the device's current mode is the
    /// caller's responsibility, checked before this call.
    pub async fn execute_cancellable(
        &self,
        device: &Device,
        params: &ParamMap,
        cancel: &CancellationToken,
    ) -> Result<CommandOutcome, CommandError> {
        if let Err(e) = self.validate_parameters(params) {
            warn!(
                command_id = %self.command_id,
                device_id = %device.device_id(),
                error = %e,
                "parameter validation failed"
            );
            self.notify_observers(
                CommandStatus::ValidationError,
                &CommandReport::Rejected(ValidationReport {
                    error: e.to_string(),
                }),
            );
            return Err(CommandError::Rejected(e));
        }

        let transport = device.transport();
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let result = match tokio::time::timeout(
                self.execution_timeout,
                transport.attempt_send(device.device_id(), &self.command_id, params),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(format!(
                    "no response within {:?}",
                    self.execution_timeout
                ))),
            };

            match result {
                Ok(()) => {
                    let outcome = CommandOutcome {
                        execution_id: Uuid::new_v4(),
                        command_id: self.command_id.clone(),
                        device_id: device.device_id().to_string(),
                        parameters: params.clone(),
                        timestamp: Utc::now(),
                        attempt,
                    };
                    info!(
                        command_id = %self.command_id,
                        device_id = %device.device_id(),
                        attempt,
                        "command executed"
                    );
                    self.notify_observers(
                        CommandStatus::Success,
                        &CommandReport::Outcome(outcome.clone()),
                    );
                    return Ok(outcome);
                }
                Err(e) if attempt < self.retry_count => {
                    debug!(
                        command_id = %self.command_id,
                        attempt,
                        retry_in = ?self.retry_delay,
                        error = %e,
                        "attempt failed, will retry"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry_delay) => {}
                        _ = cancel.cancelled() => {
                            info!(command_id = %self.command_id, "retry aborted by cancellation");
                            return Err(CommandError::Cancelled {
                                command_id: self.command_id.clone(),
                            });
                        }
                    }
                }
                Err(e) => {
                    let failure = CommandFailure {
                        error: e.to_string(),
                        command_id: self.command_id.clone(),
                        device_id: device.device_id().to_string(),
                        parameters: params.clone(),
                        timestamp: Utc::now(),
                        attempts: attempt,
                    };
                    warn!(
                        command_id = %self.command_id,
                        device_id = %device.device_id(),
                        attempts = attempt,
                        error = %e,
                        "command failed, retry budget exhausted"
                    );
                    self.notify_observers(CommandStatus::Error, &CommandReport::Failure(failure));
                    return Err(CommandError::Exhausted {
                        command_id: self.command_id.clone(),
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }
}
