//! plugdock: a realtime plugin-hosting runtime.
//!
//! Hosts audio plugins behind a trait-object boundary: port and
//! parameter introspection, feature negotiation, host-owned buffer
//! allocation, a non-blocking per-block `process()` with transport and
//! MIDI injection, a background work thread, lock-free control-change
//! rings towards a UI, and JSON state/preset persistence.
//!
//! The audio driver backend, plugin discovery, and UI widgets are
//! external collaborators; this crate owns everything between the
//! driver's process callback and the plugin's run function.

pub mod config;
pub mod control;
pub mod error;
pub mod event;
pub mod features;
pub mod instance;
pub mod module;
pub mod port;
pub mod state;
pub mod transport;
pub mod urid;
pub mod worker;

pub use config::HostConfig;
pub use control::{ControlRecord, HostEndpoint, UiEndpoint};
pub use error::{HostError, WorkError};
pub use event::EventBuffer;
pub use features::{HostOptions, NegotiatedFeatures};
pub use instance::{DropCounters, LifecycleState, PauseGate, PluginInstance};
pub use module::{
    ModuleInfo, ParameterInfo, PluginHandle, PluginModule, PortConnections,
    PortInfo, PresetInfo, WorkInterface,
};
pub use port::{MidiOut, Port, PortFlags, PortFlow, PortKind, PortRange};
pub use state::{StateHandle, StateManager, StateRecord};
pub use transport::{PositionEvent, TimeInfo};
pub use urid::{Urid, UridTable};
pub use worker::{WorkScheduler, Worker, WorkerMode};
