//! Device connection state machine
//!
//! A `Device` is a logical controllable endpoint. It tracks link state,
//! a bounded connect-attempt budget, heartbeat-based liveness and an
//! append-only command history. All physical I/O is delegated to the
//! `Transport` collaborator; every state-mutating operation ends by
//! notifying the registered observers.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::observer::{DeviceObserver, ObserverSet};
use crate::transport::{DeviceAddress, Transport};
use crate::value::ParamMap;

/// Last-event label of a device.
///
/// This is a diagnostic field, not an authoritative state machine: any
/// operation may overwrite it. Liveness is carried separately by
/// `is_connected`, faults by `last_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Disconnected,
    Connecting,
    Connected,
    /// A connect attempt failed; budget permitting, the caller may retry.
    ConnectionError,
    /// The connect-attempt budget is exhausted.
    ConnectionFailed,
    /// Heartbeat staleness detected by `check_connection`.
    ConnectionLost,
    CommandSent,
    CommandError,
    /// `send_command` was refused because the device is not connected.
    NotConnected,
    ModeChanged,
    /// `set_mode` was refused because the mode is not available.
    InvalidMode,
    /// Reserved for mode changes that fail downstream of the availability
    /// check (e.g. rejected by the device itself).
    ModeError,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeviceStatus::Disconnected => "disconnected",
            DeviceStatus::Connecting => "connecting",
            DeviceStatus::Connected => "connected",
            DeviceStatus::ConnectionError => "connection_error",
            DeviceStatus::ConnectionFailed => "connection_failed",
            DeviceStatus::ConnectionLost => "connection_lost",
            DeviceStatus::CommandSent => "command_sent",
            DeviceStatus::CommandError => "command_error",
            DeviceStatus::NotConnected => "not_connected",
            DeviceStatus::ModeChanged => "mode_changed",
            DeviceStatus::InvalidMode => "invalid_mode",
            DeviceStatus::ModeError => "mode_error",
        };
        f.write_str(s)
    }
}

/// One entry of the append-only command history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub command: String,
    pub params: ParamMap,
    pub timestamp: DateTime<Utc>,
}

/// Fixed-schema snapshot of a device, intended for direct serialization
/// towards UI or logging consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub device_id: String,
    pub name: String,
    pub device_type: String,
    pub status: DeviceStatus,
    pub is_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_mode: Option<String>,
    pub error_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub connection_attempts: u32,
}

const DEFAULT_MAX_CONNECTION_ATTEMPTS: u32 = 3;
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// A logical controllable device
pub struct Device {
    device_id: String,
    device_type: String,
    name: String,
    address: RwLock<DeviceAddress>,
    transport: Arc<dyn Transport>,

    is_connected: AtomicBool,
    status: RwLock<DeviceStatus>,
    current_mode: RwLock<Option<String>>,
    available_modes: RwLock<Vec<String>>,

    command_history: RwLock<Vec<CommandRecord>>,
    last_command_time: RwLock<Option<DateTime<Utc>>>,

    error_count: AtomicU32,
    last_error: RwLock<Option<String>>,

    connection_attempts: AtomicU32,
    max_connection_attempts: u32,
    reconnect_delay: Duration,

    last_heartbeat: RwLock<Option<DateTime<Utc>>>,
    heartbeat_interval: Duration,

    observers: ObserverSet<dyn DeviceObserver>,
}

impl Device {
    pub fn new(
        device_id: impl Into<String>,
        device_type: impl Into<String>,
        name: impl Into<String>,
        address: DeviceAddress,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_type: device_type.into(),
            name: name.into(),
            address: RwLock::new(address),
            transport,
            is_connected: AtomicBool::new(false),
            status: RwLock::new(DeviceStatus::Disconnected),
            current_mode: RwLock::new(None),
            available_modes: RwLock::new(Vec::new()),
            command_history: RwLock::new(Vec::new()),
            last_command_time: RwLock::new(None),
            error_count: AtomicU32::new(0),
            last_error: RwLock::new(None),
            connection_attempts: AtomicU32::new(0),
            max_connection_attempts: DEFAULT_MAX_CONNECTION_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            last_heartbeat: RwLock::new(None),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            observers: ObserverSet::new(),
        }
    }

    /// Override the connect-attempt budget and the suggested delay between
    /// caller-driven reconnects.
    pub fn with_connection_policy(mut self, max_attempts: u32, reconnect_delay: Duration) -> Self {
        self.max_connection_attempts = max_attempts;
        self.reconnect_delay = reconnect_delay;
        self
    }

    /// Override the heartbeat staleness threshold.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Declare which modes this device accepts in `set_mode`.
    pub fn with_available_modes(self, modes: impl IntoIterator<Item = String>) -> Self {
        *self.available_modes.write() = modes.into_iter().collect();
        self
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> DeviceAddress {
        self.address.read().clone()
    }

    /// The transport this device speaks through. `Command::execute` borrows
    /// it to deliver invocations without going through `send_command`.
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> DeviceStatus {
        *self.status.read()
    }

    pub fn current_mode(&self) -> Option<String> {
        self.current_mode.read().clone()
    }

    pub fn available_modes(&self) -> Vec<String> {
        self.available_modes.read().clone()
    }

    pub fn set_available_modes(&self, modes: impl IntoIterator<Item = String>) {
        *self.available_modes.write() = modes.into_iter().collect();
    }

    pub fn command_history(&self) -> Vec<CommandRecord> {
        self.command_history.read().clone()
    }

    pub fn last_command_time(&self) -> Option<DateTime<Utc>> {
        *self.last_command_time.read()
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn connection_attempts(&self) -> u32 {
        self.connection_attempts.load(Ordering::SeqCst)
    }

    pub fn max_connection_attempts(&self) -> u32 {
        self.max_connection_attempts
    }

    /// Suggested wait between caller-driven reconnect attempts. The device
    /// never schedules a retry on its own.
    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        *self.last_heartbeat.read()
    }

    /// Re-target the device before reconnecting.
    pub fn set_address(&self, address: DeviceAddress) {
        *self.address.write() = address;
    }

    // =========================================================================
    // Observers
    // =========================================================================

    pub fn add_observer(&self, observer: &Arc<dyn DeviceObserver>) {
        self.observers.subscribe(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn DeviceObserver>) {
        self.observers.unsubscribe(observer);
    }

    fn notify_observers(&self) {
        self.observers.notify(|o| o.on_device_state_changed(self));
    }

    fn set_status(&self, status: DeviceStatus) {
        *self.status.write() = status;
    }

    fn record_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Attempt to connect. Consumes one unit of the attempt budget on
    /// failure; refuses outright once the budget is exhausted. The caller
    /// decides whether (and when) to call again.
    pub async fn connect(&self) -> bool {
        if self.connection_attempts.load(Ordering::SeqCst) >= self.max_connection_attempts {
            warn!(
                device_id = %self.device_id,
                max_attempts = self.max_connection_attempts,
                "connect refused: attempt budget exhausted"
            );
            self.set_status(DeviceStatus::ConnectionFailed);
            self.notify_observers();
            return false;
        }

        self.set_status(DeviceStatus::Connecting);
        let address = self.address();
        match self.transport.attempt_connect(&address).await {
            Ok(()) => {
                self.is_connected.store(true, Ordering::SeqCst);
                self.connection_attempts.store(0, Ordering::SeqCst);
                *self.last_heartbeat.write() = Some(Utc::now());
                self.set_status(DeviceStatus::Connected);
                info!(device_id = %self.device_id, %address, "device connected");
                self.notify_observers();
                true
            }
            Err(e) => {
                let attempts = self.connection_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                self.record_error(e.to_string());
                self.set_status(DeviceStatus::ConnectionError);
                warn!(
                    device_id = %self.device_id,
                    %address,
                    attempts,
                    error = %e,
                    "connect attempt failed"
                );
                self.notify_observers();
                false
            }
        }
    }

    /// Drop the connection. Idempotent.
    pub fn disconnect(&self) {
        self.is_connected.store(false, Ordering::SeqCst);
        self.set_status(DeviceStatus::Disconnected);
        *self.current_mode.write() = None;
        info!(device_id = %self.device_id, "device disconnected");
        self.notify_observers();
    }

    /// Deliver one command to the device. `is_connected` is the only
    /// precondition; mode legality is the caller's concern.
    pub async fn send_command(&self, command_id: &str, params: &ParamMap) -> bool {
        if !self.is_connected() {
            self.set_status(DeviceStatus::NotConnected);
            debug!(device_id = %self.device_id, command_id, "send refused: not connected");
            self.notify_observers();
            return false;
        }

        match self
            .transport
            .attempt_send(&self.device_id, command_id, params)
            .await
        {
            Ok(()) => {
                let now = Utc::now();
                self.command_history.write().push(CommandRecord {
                    command: command_id.to_string(),
                    params: params.clone(),
                    timestamp: now,
                });
                *self.last_command_time.write() = Some(now);
                self.set_status(DeviceStatus::CommandSent);
                debug!(device_id = %self.device_id, command_id, "command sent");
                self.notify_observers();
                true
            }
            Err(e) => {
                self.error_count.fetch_add(1, Ordering::SeqCst);
                self.record_error(e.to_string());
                self.set_status(DeviceStatus::CommandError);
                warn!(device_id = %self.device_id, command_id, error = %e, "command send failed");
                self.notify_observers();
                false
            }
        }
    }

    /// Select an operating mode. The mode must be among `available_modes`.
    pub fn set_mode(&self, mode_id: &str) -> bool {
        if !self.available_modes.read().iter().any(|m| m == mode_id) {
            self.set_status(DeviceStatus::InvalidMode);
            warn!(device_id = %self.device_id, mode_id, "mode not available");
            self.notify_observers();
            return false;
        }

        *self.current_mode.write() = Some(mode_id.to_string());
        self.set_status(DeviceStatus::ModeChanged);
        info!(device_id = %self.device_id, mode_id, "mode changed");
        self.notify_observers();
        true
    }

    /// Record a liveness proof. Driven by an external probe collaborator,
    /// never by a timer owned by the device.
    pub fn update_heartbeat(&self) {
        *self.last_heartbeat.write() = Some(Utc::now());
        self.set_status(DeviceStatus::Connected);
        debug!(device_id = %self.device_id, "heartbeat updated");
        self.notify_observers();
    }

    /// Pure liveness check. Marks the connection lost (and notifies) when
    /// the last heartbeat is older than the staleness threshold; otherwise
    /// leaves all state untouched.
    pub fn check_connection(&self) -> bool {
        if !self.is_connected() {
            return false;
        }

        let stale = match *self.last_heartbeat.read() {
            Some(heartbeat) => {
                let elapsed = Utc::now()
                    .signed_duration_since(heartbeat)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                elapsed > self.heartbeat_interval
            }
            None => true,
        };

        if stale {
            self.is_connected.store(false, Ordering::SeqCst);
            self.set_status(DeviceStatus::ConnectionLost);
            warn!(device_id = %self.device_id, "heartbeat stale, connection lost");
            self.notify_observers();
            return false;
        }

        true
    }

    /// Fixed-schema status snapshot.
    pub fn status_summary(&self) -> DeviceSummary {
        DeviceSummary {
            device_id: self.device_id.clone(),
            name: self.name.clone(),
            device_type: self.device_type.clone(),
            status: self.status(),
            is_connected: self.is_connected(),
            current_mode: self.current_mode(),
            error_count: self.error_count(),
            last_error: self.last_error(),
            last_heartbeat: self.last_heartbeat(),
            connection_attempts: self.connection_attempts(),
        }
    }
}
