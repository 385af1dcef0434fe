//! Transport collaborator boundary
//!
//! The core never performs physical I/O. Connecting and sending are
//! delegated to a `Transport` implementation (UDP, USB, simulated); the
//! state machines only consume its success-or-fault outcomes.

pub mod error;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::TransportError;
pub use mock::MockTransport;

use crate::value::ParamMap;

/// Network endpoint of a device. Mutable on the device side so a caller can
/// re-target before reconnecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAddress {
    pub host: String,
    pub port: u16,
}

impl DeviceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Transport-agnostic interface consumed by `Device` and `Command`.
///
/// Implementations decide what "connect" and "send" physically mean; the
/// core only reacts to the returned outcome.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Attempt to open a connection to the given address.
    async fn attempt_connect(&self, address: &DeviceAddress) -> Result<(), TransportError>;

    /// Attempt to deliver one command invocation to a device.
    async fn attempt_send(
        &self,
        device_id: &str,
        command_id: &str,
        params: &ParamMap,
    ) -> Result<(), TransportError>;
}
