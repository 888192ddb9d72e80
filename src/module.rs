//! The plugin boundary.
//!
//! The plugin-description/discovery library and the plugin binary are
//! external collaborators: the host consumes introspected metadata
//! ([`ModuleInfo`]) at load time and afterwards talks to the instance
//! only through the [`PluginHandle`] capability table.  Nothing behind
//! that table is inspected or assumed.

use std::sync::Arc;

use crate::error::{HostError, WorkError};
use crate::features::NegotiatedFeatures;
use crate::port::{Port, PortFlags, PortFlow, PortKind, PortRange};
use crate::state::StateRecord;

/// One plugin-declared port, as reported by the discovery library.
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub symbol: String,
    pub name: String,
    pub kind: PortKind,
    pub flow: PortFlow,
    pub range: PortRange,
    pub flags: PortFlags,
    /// Declared minimum event-buffer capacity in bytes (0 = none).
    pub min_event_size: u32,
    /// True for the port designated as the primary control input, the
    /// target for patch-style messages.
    pub designated_control: bool,
}

/// One plugin-declared read/write parameter.  A parameter that is both
/// readable and writable appears once with both flags set.
#[derive(Debug, Clone)]
pub struct ParameterInfo {
    pub uri: String,
    pub label: String,
    pub range: PortRange,
    pub readable: bool,
    pub writable: bool,
}

/// A preset the plugin ships with.
#[derive(Debug, Clone)]
pub struct PresetInfo {
    pub uri: String,
    pub label: String,
    pub bank: Option<String>,
    pub state: StateRecord,
}

/// Introspected metadata for one loadable plugin.
#[derive(Debug, Clone, Default)]
pub struct ModuleInfo {
    pub uri: String,
    pub name: String,
    pub ports: Vec<PortInfo>,
    pub parameters: Vec<ParameterInfo>,
    pub required_features: Vec<String>,
    pub optional_features: Vec<String>,
    pub presets: Vec<PresetInfo>,
    /// Declares the background-work capability.
    pub has_worker: bool,
    /// State restore may run concurrently with processing.
    pub thread_safe_restore: bool,
    pub default_state: Option<StateRecord>,
    /// Known to crash on unload; the handle is leaked instead of
    /// dropped at cleanup.
    pub unstable_cleanup: bool,
}

/// A loadable plugin: metadata plus a factory for instances.
pub trait PluginModule: Send + Sync {
    fn info(&self) -> &ModuleInfo;

    fn instantiate(
        &self,
        sample_rate: f64,
        features: &NegotiatedFeatures,
    ) -> Result<Box<dyn PluginHandle>, HostError>;
}

/// The opaque instantiated plugin.  Only the realtime thread calls
/// `run`; lifecycle methods are called from the control thread while
/// processing is inactive or paused.
pub trait PluginHandle: Send {
    fn activate(&mut self) {}
    fn deactivate(&mut self) {}

    /// One processing cycle over the host-owned port buffers.
    fn run(&mut self, ports: &mut PortConnections<'_>, nframes: u32);

    /// The background-work capability table, when declared.  Shared
    /// between the worker thread and the realtime thread, so the
    /// plugin is responsible for its own internal synchronization.
    fn work_interface(&self) -> Option<Arc<dyn WorkInterface>> {
        None
    }

    /// Plugin-private state beyond port values, opaque to the host.
    fn save_custom_state(&self) -> Option<Vec<u8>> {
        None
    }

    fn restore_custom_state(&mut self, _data: &[u8]) -> Result<(), HostError> {
        Ok(())
    }
}

/// Background-work callbacks, mirroring the worker extension contract:
/// `work` runs off the audio thread and may respond zero or more
/// times; each response is delivered back through `work_response` from
/// the realtime thread on a later cycle, followed by `end_run`.
pub trait WorkInterface: Send + Sync {
    fn work(
        &self,
        respond: &mut dyn FnMut(&[u8]),
        data: &[u8],
    ) -> Result<(), WorkError>;

    fn work_response(&self, data: &[u8]);

    fn end_run(&self) {}
}

/// The plugin's per-cycle view of the host-owned port buffers.
pub struct PortConnections<'a> {
    ports: &'a mut [Port],
}

impl<'a> PortConnections<'a> {
    pub(crate) fn new(ports: &'a mut [Port]) -> Self {
        Self { ports }
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn kind(&self, index: u32) -> Option<PortKind> {
        self.ports.get(index as usize).map(|p| p.kind)
    }

    pub fn flow(&self, index: u32) -> Option<PortFlow> {
        self.ports.get(index as usize).map(|p| p.flow)
    }

    /// Value of a control port; 0.0 for anything else.
    pub fn control(&self, index: u32) -> f32 {
        self.ports
            .get(index as usize)
            .and_then(|p| p.control_value())
            .unwrap_or(0.0)
    }

    /// Writes a control output value (unclamped; outputs report).
    pub fn set_control(&mut self, index: u32, value: f32) {
        if let Some(p) = self.ports.get_mut(index as usize) {
            p.force_control(value);
        }
    }

    pub fn audio(&self, index: u32) -> Option<&[f32]> {
        self.ports.get(index as usize).and_then(|p| p.audio_buffer())
    }

    pub fn audio_mut(&mut self, index: u32) -> Option<&mut [f32]> {
        self.ports
            .get_mut(index as usize)
            .and_then(|p| p.audio_buffer_mut())
    }

    /// Simultaneous read/write access to two distinct float ports,
    /// the common in-place-capable processing shape.
    pub fn audio_pair(
        &mut self,
        input: u32,
        output: u32,
    ) -> Option<(&[f32], &mut [f32])> {
        let (input, output) = (input as usize, output as usize);
        if input == output || input >= self.ports.len() || output >= self.ports.len() {
            return None;
        }
        let (lo, hi, swapped) = if input < output {
            (input, output, false)
        } else {
            (output, input, true)
        };
        let (head, tail) = self.ports.split_at_mut(hi);
        let (a, b) = (&mut head[lo], &mut tail[0]);
        if swapped {
            Some((b.audio_buffer()?, a.audio_buffer_mut()?))
        } else {
            Some((a.audio_buffer()?, b.audio_buffer_mut()?))
        }
    }

    pub fn events(&self, index: u32) -> Option<&crate::event::EventBuffer> {
        self.ports.get(index as usize).and_then(|p| p.event_buffer())
    }

    pub fn events_mut(&mut self, index: u32) -> Option<&mut crate::event::EventBuffer> {
        self.ports
            .get_mut(index as usize)
            .and_then(|p| p.event_buffer_mut())
    }
}
