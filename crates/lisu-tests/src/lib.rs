//! Integration tests for the LISU device-control core
//!
//! This crate contains end-to-end tests that exercise the full core:
//! - Device lifecycle (connect budget, heartbeat, command history)
//! - Command contracts (validation, retried execution, cancellation)
//! - Mode transition graphs (guards, state variables, history)
//! - Observer fabric and the TOML configuration layer
//!
//! All tests run against the scriptable `MockTransport`, so no hardware or
//! network access is required:
//!
//! ```bash
//! cargo test -p lisu-tests
//! ```
//!
//! # Test Structure
//!
//! - `device_lifecycle_test.rs` - connect/disconnect/heartbeat scenarios
//! - `command_execution_test.rs` - validation and retry scenarios
//! - `mode_transition_test.rs` - guarded transitions and mode gating
//! - `config_integration_test.rs` - TOML-driven setup end to end

// This crate only contains tests, no library code
