//! Command validation and retried execution scenarios
//!
//! Run with: cargo test -p lisu-tests --test command_execution_test

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use lisu_core::{
    Command, CommandError, CommandObserver, CommandReport, CommandStatus, Device, DeviceAddress,
    MockTransport, ParamMap, ParamType, ParamValue, TransportError,
};

fn drone(transport: Arc<MockTransport>) -> Device {
    Device::new(
        "drone-1",
        "quadcopter",
        "Test Drone",
        DeviceAddress::new("192.168.1.20", 7700),
        transport,
    )
}

fn throttle_command() -> Command {
    Command::new("set_throttle", "Set Throttle", "Set normalized throttle")
        .with_required_parameter("value")
        .with_parameter_type("value", ParamType::Float)
        .with_parameter_range("value", 0.0, 1.0)
        .with_retry_policy(3, Duration::from_millis(1))
}

fn throttle_params(value: f64) -> ParamMap {
    let mut params = ParamMap::new();
    params.insert("value".to_string(), ParamValue::Float(value));
    params
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(CommandStatus, CommandReport)>>,
}

impl CommandObserver for Recorder {
    fn on_command_executed(&self, _command: &Command, status: CommandStatus, report: &CommandReport) {
        self.events.lock().push((status, report.clone()));
    }
}

#[tokio::test]
async fn test_out_of_range_value_never_reaches_the_wire() {
    let transport = Arc::new(MockTransport::new());
    let device = drone(transport.clone());
    let command = throttle_command();

    let recorder = Arc::new(Recorder::default());
    let observer: Arc<dyn CommandObserver> = recorder.clone();
    command.add_observer(&observer);

    let err = command
        .execute(&device, &throttle_params(1.5))
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Parameter value out of range: 0 <= 1.5 <= 1"
    );
    assert_eq!(transport.send_attempts(), 0);

    let events = recorder.events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, CommandStatus::ValidationError);
}

#[tokio::test]
async fn test_transient_send_failures_are_retried() {
    let transport = Arc::new(MockTransport::new());
    let device = drone(transport.clone());
    let command = throttle_command();
    transport.fail_next_sends(2);

    let outcome = command
        .execute(&device, &throttle_params(0.5))
        .await
        .unwrap();

    assert_eq!(outcome.attempt, 3);
    assert_eq!(outcome.device_id, "drone-1");
    assert_eq!(transport.send_attempts(), 3);

    // Every attempt carried the same payload.
    for sent in transport.sent() {
        assert_eq!(sent.command_id, "set_throttle");
        assert_eq!(sent.params, throttle_params(0.5));
    }
}

#[tokio::test]
async fn test_persistent_failure_exhausts_the_budget() {
    let transport = Arc::new(MockTransport::new());
    let device = drone(transport.clone());
    let command = throttle_command();
    transport.set_link_up(false);

    let recorder = Arc::new(Recorder::default());
    let observer: Arc<dyn CommandObserver> = recorder.clone();
    command.add_observer(&observer);

    let err = command
        .execute(&device, &throttle_params(0.5))
        .await
        .unwrap_err();

    match err {
        CommandError::Exhausted {
            attempts, source, ..
        } => {
            assert_eq!(attempts, 3);
            assert!(matches!(source, TransportError::ConnectionClosed));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let events = recorder.events.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, CommandStatus::Error);
    match &events[0].1 {
        CommandReport::Failure(failure) => {
            assert_eq!(failure.attempts, 3);
            assert_eq!(failure.device_id, "drone-1");
        }
        other => panic!("unexpected report: {:?}", other),
    }
}

#[tokio::test]
async fn test_shutdown_cancels_a_pending_retry() {
    let transport = Arc::new(MockTransport::new());
    let device = drone(transport.clone());
    let command = throttle_command().with_retry_policy(3, Duration::from_secs(300));
    transport.fail_next_sends(3);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let err = command
        .execute_cancellable(&device, &throttle_params(0.5), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, CommandError::Cancelled { .. }));
    assert_eq!(transport.send_attempts(), 1);
}

#[tokio::test]
async fn test_execute_bypasses_device_connection_gate() {
    // Command delivery goes straight to the transport; the is_connected
    // gate applies to Device::send_command only, and the caller decides
    // which path to use.
    let transport = Arc::new(MockTransport::new());
    let device = drone(transport.clone());
    assert!(!device.is_connected());

    let outcome = throttle_command()
        .execute(&device, &throttle_params(0.5))
        .await
        .unwrap();
    assert_eq!(outcome.attempt, 1);

    assert!(!device.send_command("set_throttle", &throttle_params(0.5)).await);
    assert_eq!(transport.send_attempts(), 1);
}

#[tokio::test]
async fn test_execution_independent_of_mode_legality() {
    let transport = Arc::new(MockTransport::new());
    let device = drone(transport.clone());
    let mode = lisu_core::Mode::new("idle", "Idle", "No commands allowed");

    // The mode forbids the command, but executing it still succeeds; the
    // caller is expected to consult the mode first.
    assert!(!mode.is_command_allowed("set_throttle"));
    let outcome = throttle_command()
        .execute(&device, &throttle_params(0.2))
        .await
        .unwrap();
    assert_eq!(outcome.command_id, "set_throttle");
}
