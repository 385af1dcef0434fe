//! Mock transport for testing and simulation
//!
//! Scriptable stand-in for a real link: failures are queued per operation,
//! the link can be cut atomically, and every send attempt is recorded so
//! tests can assert side-effect counts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{DeviceAddress, Transport, TransportError};
use crate::value::ParamMap;

/// One recorded `attempt_send` call
#[derive(Debug, Clone)]
pub struct SentCommand {
    pub device_id: String,
    pub command_id: String,
    pub params: ParamMap,
}

/// Mock transport with scripted outcomes
#[derive(Default)]
pub struct MockTransport {
    link_down: AtomicBool,
    latency: Option<Duration>,
    connect_faults: RwLock<VecDeque<TransportError>>,
    send_faults: RwLock<VecDeque<TransportError>>,
    connect_attempts: AtomicU32,
    sent: RwLock<Vec<SentCommand>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate link latency on every operation
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Queue `n` connect failures ahead of any successful connect
    pub fn fail_next_connects(&self, n: usize) {
        let mut faults = self.connect_faults.write();
        for _ in 0..n {
            faults.push_back(TransportError::ConnectionFailed(
                "scripted connect fault".to_string(),
            ));
        }
    }

    /// Queue `n` send failures ahead of any successful send
    pub fn fail_next_sends(&self, n: usize) {
        let mut faults = self.send_faults.write();
        for _ in 0..n {
            faults.push_back(TransportError::SendFailed("scripted send fault".to_string()));
        }
    }

    /// Queue a specific fault for the next connect
    pub fn push_connect_fault(&self, fault: TransportError) {
        self.connect_faults.write().push_back(fault);
    }

    /// Queue a specific fault for the next send
    pub fn push_send_fault(&self, fault: TransportError) {
        self.send_faults.write().push_back(fault);
    }

    /// Cut or restore the link. A cut link fails every operation with
    /// `ConnectionClosed` regardless of scripted faults.
    pub fn set_link_up(&self, up: bool) {
        self.link_down.store(!up, Ordering::SeqCst);
    }

    /// Number of `attempt_connect` calls seen so far
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Number of `attempt_send` calls seen so far (successful or not)
    pub fn send_attempts(&self) -> usize {
        self.sent.read().len()
    }

    /// Snapshot of every recorded send attempt
    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.read().clone()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn attempt_connect(&self, address: &DeviceAddress) -> Result<(), TransportError> {
        self.simulate_latency().await;
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if self.link_down.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        if let Some(fault) = self.connect_faults.write().pop_front() {
            return Err(fault);
        }
        tracing::debug!(%address, "mock transport: connected");
        Ok(())
    }

    async fn attempt_send(
        &self,
        device_id: &str,
        command_id: &str,
        params: &ParamMap,
    ) -> Result<(), TransportError> {
        self.simulate_latency().await;
        self.sent.write().push(SentCommand {
            device_id: device_id.to_string(),
            command_id: command_id.to_string(),
            params: params.clone(),
        });

        if self.link_down.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        if let Some(fault) = self.send_faults.write().pop_front() {
            return Err(fault);
        }
        tracing::debug!(device_id, command_id, "mock transport: sent command");
        Ok(())
    }
}
