//! lisu-core - Device-control core for the LISU framework
//!
//! Models the lifecycle of a controllable hardware device with three
//! cooperating state machines and an observer fabric:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         lisu-core                            │
//! │                                                              │
//! │  ┌───────────┐   ┌────────────┐   ┌────────────────────────┐ │
//! │  │  Device   │   │  Command   │   │         Mode           │ │
//! │  │ (link +   │   │ (contract  │   │ (guarded transition    │ │
//! │  │ heartbeat)│   │  + retry)  │   │  graph + variables)    │ │
//! │  └─────┬─────┘   └─────┬──────┘   └────────────────────────┘ │
//! │        │               │                                     │
//! │        └───────┬───────┘                                     │
//! │          ┌─────┴──────┐          ┌──────────────────┐        │
//! │          │ Transport  │          │   ObserverSet    │        │
//! │          │  (trait)   │          │ (state-change    │        │
//! │          └────────────┘          │  notifications)  │        │
//! │                                  └──────────────────┘        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Physical I/O lives behind the [`Transport`] trait; the crate ships a
//! scriptable [`MockTransport`] for tests and simulation. TOML configuration
//! builds devices, commands and modes declaratively via [`FrameworkConfig`].

pub mod command;
pub mod config;
pub mod device;
pub mod mode;
pub mod observer;
pub mod transport;
pub mod value;

pub use command::{
    Command, CommandError, CommandFailure, CommandOutcome, CommandReport, CommandStatus,
    ParamRange, ParameterInfo, ValidationError, ValidationReport,
};
pub use config::{
    CommandConfig, ConfigError, DeviceConfig, FrameworkConfig, ModeConfig, ParamSpec,
    TransitionSpec,
};
pub use device::{CommandRecord, Device, DeviceStatus, DeviceSummary};
pub use mode::{
    Mode, ModeEvent, ModeStateInfo, TransitionError, TransitionRecord, TransitionRule,
    INITIAL_STATE,
};
pub use observer::{CommandObserver, DeviceObserver, ModeObserver, ObserverSet};
pub use transport::{DeviceAddress, MockTransport, Transport, TransportError};
pub use value::{ParamMap, ParamType, ParamValue};
