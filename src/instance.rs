//! The plugin host instance: feature negotiation, port construction,
//! buffer allocation, lifecycle, and the per-cycle `process()` step.
//!
//! Everything inside `process()` is non-blocking by construction: ring
//! reads/writes are lock-free SPSC, all buffers are pre-allocated, and
//! any unexpected per-port condition is logged and skipped so one
//! malfunctioning plugin cannot stall the rest of the audio graph.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::config::HostConfig;
use crate::control::{
    self, ControlReader, ControlRecord, ControlWriter, HostEndpoint, UiEndpoint,
};
use crate::error::HostError;
use crate::features;
use crate::module::{PluginHandle, PluginModule, PortConnections};
use crate::port::{MidiOut, Port, PortBuffer, PortFlow, PortKind};
use crate::state::StateRecord;
use crate::transport::{PositionEvent, TimeInfo, TransportShadow};
use crate::urid;
use crate::worker::{Worker, WorkerMode};

static NEXT_INSTANCE_SEQ: AtomicU64 = AtomicU64::new(1);

/// Cycles between aggregated drop-diagnostic log lines.
const DROP_REPORT_INTERVAL: u64 = 1024;

/// How long a pause request waits for the audio thread to acknowledge
/// before proceeding anyway (the driver may simply not be cycling).
const PAUSE_ACK_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Instantiated,
    Activated,
    Deactivated,
    Freed,
    /// Unrecoverable instantiation error; the plugin is unusable for
    /// this session.
    Failed,
}

impl LifecycleState {
    pub fn name(self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Instantiated => "instantiated",
            LifecycleState::Activated => "activated",
            LifecycleState::Deactivated => "deactivated",
            LifecycleState::Freed => "freed",
            LifecycleState::Failed => "failed",
        }
    }
}

/// Saturating per-instance counters for conditions recovered inside the
/// realtime path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropCounters {
    pub event_overflow: u64,
    pub control_overflow: u64,
    pub work_dispatch: u64,
}

#[derive(Default)]
struct PauseFlags {
    requested: bool,
    paused: bool,
}

/// Pause/resume handshake between the control thread and the driver
/// backend's processing callback.
///
/// The driver calls [`checkpoint`](Self::checkpoint) once per block,
/// *before* it borrows the instance for `process()`; a pending request
/// parks the audio thread there until [`resume`](Self::resume).  This
/// is the one place the realtime path is allowed to block, and it is
/// bounded by the handshake rather than a lock held across the audio
/// callback.
pub struct PauseGate {
    flags: Mutex<PauseFlags>,
    cond: Condvar,
}

impl PauseGate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            flags: Mutex::new(PauseFlags::default()),
            cond: Condvar::new(),
        })
    }

    /// Audio-thread side; returns once no pause is pending.
    pub fn checkpoint(&self) {
        let mut flags = self.flags.lock();
        if !flags.requested {
            return;
        }
        flags.paused = true;
        self.cond.notify_all();
        while flags.requested {
            self.cond.wait(&mut flags);
        }
        flags.paused = false;
        self.cond.notify_all();
    }

    /// Control-thread side.  Returns true once the audio thread has
    /// acknowledged; false if nothing acknowledged within the timeout
    /// (no driver cycling, which makes the pause trivially safe).
    pub fn request_pause(&self) -> bool {
        let mut flags = self.flags.lock();
        flags.requested = true;
        let deadline = std::time::Instant::now() + PAUSE_ACK_TIMEOUT;
        while !flags.paused {
            if self.cond.wait_until(&mut flags, deadline).timed_out() {
                return false;
            }
        }
        true
    }

    pub fn resume(&self) {
        let mut flags = self.flags.lock();
        flags.requested = false;
        self.cond.notify_all();
    }
}

pub struct PluginInstance {
    module: Arc<dyn PluginModule>,
    config: HostConfig,
    lifecycle: LifecycleState,
    ports: Vec<Port>,
    /// Index of the primary control-input event port, target for
    /// patch-style messages.
    control_in: Option<u32>,
    handle: Option<Box<dyn PluginHandle>>,
    worker: Option<Worker>,
    state_worker: Option<Worker>,
    shadow: TransportShadow,
    last_time: TimeInfo,
    plugin_latency: u32,
    latency_changed: bool,
    ui: Option<HostEndpoint>,
    ui_update_accum: u32,
    request_update: AtomicBool,
    /// Host-internal edit queue: state application routes values here
    /// while the transport rolls, drained like UI edits each cycle.
    edits_tx: ControlWriter,
    edits_rx: ControlReader,
    pause: Arc<PauseGate>,
    drops: DropCounters,
    drops_reported: DropCounters,
    cycle_count: u64,
    temp_dir: Option<PathBuf>,
    state_file: Option<PathBuf>,
    current_preset: Option<String>,
}

impl PluginInstance {
    pub fn new(module: Arc<dyn PluginModule>, config: HostConfig) -> Self {
        let (edits_tx, edits_rx) =
            control::edit_queue(control::ring_capacity(config.event_buffer_size));
        Self {
            module,
            config,
            lifecycle: LifecycleState::Created,
            ports: Vec::new(),
            control_in: None,
            handle: None,
            worker: None,
            state_worker: None,
            shadow: TransportShadow::new(),
            last_time: TimeInfo::default(),
            plugin_latency: 0,
            latency_changed: false,
            ui: None,
            ui_update_accum: 0,
            request_update: AtomicBool::new(false),
            edits_tx,
            edits_rx,
            pause: PauseGate::new(),
            drops: DropCounters::default(),
            drops_reported: DropCounters::default(),
            cycle_count: 0,
            temp_dir: None,
            state_file: None,
            current_preset: None,
        }
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn module(&self) -> &Arc<dyn PluginModule> {
        &self.module
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn pause_gate(&self) -> Arc<PauseGate> {
        self.pause.clone()
    }

    pub fn drop_counters(&self) -> DropCounters {
        self.drops
    }

    /// Path of the last saved state file, consulted when
    /// `instantiate` is asked to use saved state.
    pub fn state_file(&self) -> Option<&Path> {
        self.state_file.as_deref()
    }

    pub fn set_state_file(&mut self, path: PathBuf) {
        self.state_file = Some(path);
    }

    pub fn current_preset(&self) -> Option<&str> {
        self.current_preset.as_deref()
    }

    pub(crate) fn set_current_preset(&mut self, uri: Option<String>) {
        self.current_preset = uri;
    }

    /// Builds ports and parameters, negotiates features, allocates
    /// buffers, instantiates the opaque handle and applies the initial
    /// state, chosen in priority order: preset by URI, saved state
    /// file, externally supplied state, plugin-default state.
    ///
    /// A missing required feature or a handle failure leaves the
    /// instance `Failed` with no allocated ports.  A state-load
    /// failure after successful instantiation leaves the instance
    /// `Instantiated` with default values and reports the error.
    pub fn instantiate(
        &mut self,
        use_saved_state: bool,
        preset_uri: Option<&str>,
        external_state: Option<StateRecord>,
    ) -> Result<(), HostError> {
        if self.lifecycle != LifecycleState::Created {
            return Err(HostError::InvalidLifecycle(self.lifecycle.name()));
        }
        let info = self.module.info().clone();

        let mut negotiated = match features::negotiate(&info, &self.config) {
            Ok(nf) => nf,
            Err(e) => {
                self.lifecycle = LifecycleState::Failed;
                return Err(e);
            }
        };

        // ordinary ports first, then parameters as virtual control
        // inputs; the array index is the connection index
        for (i, port_info) in info.ports.iter().enumerate() {
            self.ports.push(Port::from_info(
                port_info,
                i as u32,
                self.config.sample_rate,
            ));
        }
        for param in &info.parameters {
            let urid = urid::table().map(&param.uri);
            let index = self.ports.len() as u32;
            self.ports.push(Port::from_parameter(param, urid, index));
        }
        if self.ports.is_empty() {
            self.lifecycle = LifecycleState::Failed;
            return Err(HostError::InstantiationFailed(format!(
                "{}: plugin declares no usable ports",
                info.name
            )));
        }

        self.control_in = self
            .ports
            .iter()
            .position(|p| {
                p.kind == PortKind::Event
                    && p.flow == PortFlow::Input
                    && info
                        .ports
                        .get(p.index as usize)
                        .is_some_and(|pi| pi.designated_control)
            })
            .or_else(|| {
                self.ports.iter().position(|p| {
                    p.kind == PortKind::Event && p.flow == PortFlow::Input
                })
            })
            .map(|i| i as u32);

        for port in &mut self.ports {
            port.allocate(
                self.config.nominal_block_length,
                self.config.event_buffer_size,
            );
        }

        let temp_dir = std::env::temp_dir().join(format!(
            "plugdock-{}-{}",
            std::process::id(),
            NEXT_INSTANCE_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        if let Err(e) = std::fs::create_dir_all(&temp_dir) {
            self.ports.clear();
            self.lifecycle = LifecycleState::Failed;
            return Err(HostError::InstantiationFailed(format!(
                "cannot create temp dir: {e}"
            )));
        }
        self.temp_dir = Some(temp_dir.clone());
        negotiated.temp_dir = Some(temp_dir);

        if info.has_worker {
            let mode = if self.config.freewheeling {
                WorkerMode::Inline
            } else {
                WorkerMode::Threaded
            };
            let worker = Worker::new(mode);
            negotiated.worker = Some(worker.scheduler());
            self.worker = Some(worker);
            if info.thread_safe_restore {
                let state_worker = Worker::new(WorkerMode::Inline);
                negotiated.state_worker = Some(state_worker.scheduler());
                self.state_worker = Some(state_worker);
            }
        }

        let handle = match self
            .module
            .instantiate(self.config.sample_rate, &negotiated)
        {
            Ok(handle) => handle,
            Err(e) => {
                self.worker = None;
                self.state_worker = None;
                self.ports.clear();
                self.lifecycle = LifecycleState::Failed;
                return Err(e);
            }
        };
        self.handle = Some(handle);

        match self.handle.as_ref().and_then(|h| h.work_interface()) {
            Some(iface) => {
                if let Some(w) = self.worker.as_mut() {
                    w.activate(iface.clone());
                }
                if let Some(w) = self.state_worker.as_mut() {
                    w.activate(iface);
                }
            }
            None => {
                if info.has_worker {
                    log::warn!(
                        "{}: declares work capability but provides no \
                         work interface",
                        info.name
                    );
                    self.worker = None;
                    self.state_worker = None;
                }
            }
        }

        self.lifecycle = LifecycleState::Instantiated;
        log::info!("{}: instantiated ({} ports)", info.name, self.ports.len());

        // initial state, in priority order
        let result = if let Some(uri) = preset_uri {
            match info.presets.iter().find(|p| p.uri == uri) {
                Some(preset) => {
                    let record = preset.state.clone();
                    self.current_preset = Some(uri.to_string());
                    self.apply_record_direct(&record)
                }
                None => Err(HostError::PresetNotFound(uri.to_string())),
            }
        } else if use_saved_state && let Some(path) = self.state_file.clone() {
            match std::fs::read_to_string(&path) {
                Ok(text) => match serde_json::from_str::<StateRecord>(&text) {
                    Ok(record) => self.apply_record_direct(&record),
                    Err(e) => Err(HostError::StateLoadFailed(format!(
                        "{}: {e}",
                        path.display()
                    ))),
                },
                Err(e) => Err(HostError::StateLoadFailed(format!(
                    "{}: {e}",
                    path.display()
                ))),
            }
        } else if let Some(record) = external_state {
            self.apply_record_direct(&record)
        } else if let Some(record) = info.default_state.clone() {
            self.apply_record_direct(&record)
        } else {
            Ok(())
        };

        if let Err(ref e) = result {
            log::warn!("{}: initial state not applied: {e}", info.name);
        }
        result
    }

    /// Applies a state record with direct port writes.  Only valid
    /// while processing is not running (instantiation, pause).
    pub(crate) fn apply_record_direct(
        &mut self,
        record: &StateRecord,
    ) -> Result<(), HostError> {
        let own_uri = &self.module.info().uri;
        if !record.plugin_uri.is_empty() && &record.plugin_uri != own_uri {
            return Err(HostError::StateLoadFailed(format!(
                "state belongs to <{}>, not <{}>",
                record.plugin_uri, own_uri
            )));
        }
        let float_uri = urid::uris::ATOM_FLOAT;
        for (symbol, value) in &record.ports {
            let Some(index) = self.port_index_by_symbol(symbol) else {
                log::warn!("state references unknown port '{symbol}', skipping");
                continue;
            };
            if value.type_uri != float_uri || value.data.len() != 4 {
                log::warn!(
                    "port '{symbol}': unsupported state value type <{}>, skipping",
                    value.type_uri
                );
                continue;
            }
            let v = f32::from_ne_bytes([
                value.data[0],
                value.data[1],
                value.data[2],
                value.data[3],
            ]);
            self.ports[index as usize].set_control(v);
        }
        if let Some(custom) = &record.custom {
            self.restore_custom(custom)?;
        }
        Ok(())
    }

    pub fn activate(&mut self, activate: bool) -> Result<(), HostError> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(HostError::InvalidLifecycle(self.lifecycle.name()));
        };
        match (self.lifecycle, activate) {
            (LifecycleState::Instantiated | LifecycleState::Deactivated, true) => {
                handle.activate();
                self.lifecycle = LifecycleState::Activated;
                Ok(())
            }
            (LifecycleState::Activated, false) => {
                handle.deactivate();
                self.lifecycle = LifecycleState::Deactivated;
                Ok(())
            }
            // already there
            (LifecycleState::Activated, true)
            | (LifecycleState::Instantiated | LifecycleState::Deactivated, false) => {
                Ok(())
            }
            _ => Err(HostError::InvalidLifecycle(self.lifecycle.name())),
        }
    }

    // ── per-cycle processing ──

    /// Runs the plugin for one block.  Only call from the driver
    /// backend's processing thread while Activated; the call never
    /// blocks, allocates buffers, or raises.
    pub fn process(&mut self, time: &TimeInfo, nframes: u32) {
        if self.lifecycle != LifecycleState::Activated || self.handle.is_none() {
            return;
        }
        self.cycle_count += 1;
        self.maybe_report_drops();

        // per-cycle transient state
        for port in &mut self.ports {
            port.midi_out.clear();
        }

        let known = urid::known();

        // 1. transport discontinuity?
        let xport_changed = self.shadow.changed(time);
        let pos_bytes = PositionEvent::from_time(time).to_bytes();
        let request_update = self.request_update.swap(false, Ordering::AcqRel);
        let control_in = self.control_in;

        // 2-4. fill input event buffers: position first, then the
        // state-reload query, then queued MIDI rebased to this window
        for port in &mut self.ports {
            if port.kind != PortKind::Event || port.flow != PortFlow::Input {
                continue;
            }
            let wants_transport = port.flags.wants_transport;
            let is_control_in = Some(port.index) == control_in;
            {
                let Some(buf) = port.event_buffer_mut() else {
                    log::warn!(
                        "event input '{}' has no buffer, skipping",
                        port.symbol
                    );
                    continue;
                };
                buf.reset(true);
                if wants_transport
                    && xport_changed
                    && !buf.push(0, 0, known.time_position, &pos_bytes)
                {
                    self.drops.event_overflow += 1;
                }
                if request_update
                    && is_control_in
                    && !buf.push(0, 0, known.patch_get, &[])
                {
                    self.drops.event_overflow += 1;
                }
            }
            self.drops.event_overflow +=
                port.drain_midi_into_events(time.frame, nframes, known.midi_event);
        }

        // 5. freewheel overrides
        for port in &mut self.ports {
            if port.kind == PortKind::Control
                && port.flow == PortFlow::Input
                && port.flags.freewheel
            {
                let v = if self.config.freewheeling {
                    port.range.max
                } else {
                    port.range.min
                };
                port.force_control(v);
            }
        }

        // 6. pending control edits: host-internal first, then UI
        while let Some(record) = self.edits_rx.read() {
            Self::apply_control_record(&mut self.ports, &record, &mut self.drops);
        }
        if let Some(ui) = self.ui.as_mut() {
            while let Some(record) = ui.from_ui.read() {
                Self::apply_control_record(&mut self.ports, &record, &mut self.drops);
            }
        }

        // 7. run
        if let Some(handle) = self.handle.as_mut() {
            let mut connections = PortConnections::new(&mut self.ports);
            handle.run(&mut connections, nframes);
        }

        // 8. worker responses
        if let Some(worker) = &self.worker {
            worker.drain_responses();
            self.drops.work_dispatch += worker.take_dispatch_failures();
        }
        if let Some(worker) = &self.state_worker {
            worker.drain_responses();
            self.drops.work_dispatch += worker.take_dispatch_failures();
        }

        // 9. control outputs: latency report + throttled UI updates
        self.ui_update_accum = self.ui_update_accum.saturating_add(nframes);
        let update_frames =
            (self.config.sample_rate / f64::from(self.config.ui_update_hz.max(1.0)))
                as u32;
        let send_ui_updates =
            self.ui.is_some() && self.ui_update_accum > update_frames;
        if send_ui_updates {
            self.ui_update_accum = 0;
        }
        for port in &mut self.ports {
            if port.kind != PortKind::Control {
                continue;
            }
            if port.flow == PortFlow::Output && port.flags.reports_latency {
                let v = port.control_value().unwrap_or(0.0);
                if (v - self.plugin_latency as f32).abs() > 0.001 {
                    self.plugin_latency = v.max(0.0) as u32;
                    self.latency_changed = true;
                }
            }
            if !send_ui_updates {
                continue;
            }
            let Some(v) = port.control_value() else { continue };
            // a port edited from the UI is not echoed back; the flag
            // holds until a send window passes, that feedback makes
            // knobs tremble while dragging
            if port.received_ui_event {
                port.received_ui_event = false;
                port.last_sent_value = v;
                continue;
            }
            if v != port.last_sent_value {
                port.last_sent_value = v;
                if let Some(ui) = self.ui.as_mut()
                    && !ui.to_ui.write(&ControlRecord::float(port.index, v))
                {
                    self.drops.control_overflow += 1;
                }
            }
        }

        // 10. event outputs: translate MIDI for downstream routing,
        // forward other event types to the UI, reopen for writing
        for port in &mut self.ports {
            if port.kind != PortKind::Event || port.flow != PortFlow::Output {
                continue;
            }
            let index = port.index;
            let Port {
                buffer, midi_out, ..
            } = port;
            let PortBuffer::Event(buf) = buffer else {
                continue;
            };
            for ev in buf.iter() {
                if ev.type_urid == known.midi_event {
                    if ev.body.len() >= 3 {
                        midi_out.push(MidiOut {
                            time_frames: ev.time_frames,
                            data: [ev.body[0], ev.body[1], ev.body[2]],
                        });
                    }
                } else if let Some(ui) = self.ui.as_mut()
                    && !ui.to_ui.write(&ControlRecord::event(
                        index,
                        known.event_transfer,
                        ev.type_urid,
                        ev.body,
                    ))
                {
                    self.drops.control_overflow += 1;
                }
            }
            buf.reset(false);
        }

        self.shadow.advance(time, nframes);
        self.last_time = *time;
    }

    fn apply_control_record(
        ports: &mut [Port],
        record: &ControlRecord,
        drops: &mut DropCounters,
    ) {
        let known = urid::known();
        let Some(port) = ports.get_mut(record.port_index as usize) else {
            log::warn!(
                "control message for out-of-range port {}, skipping",
                record.port_index
            );
            return;
        };
        if port.flow != PortFlow::Input {
            log::warn!(
                "control message addressed to output port '{}', skipping",
                port.symbol
            );
            return;
        }
        if record.protocol == control::PROTOCOL_FLOAT {
            match record.float_value() {
                Some(v) => {
                    port.set_control(v);
                    port.received_ui_event = true;
                }
                None => log::warn!(
                    "malformed float control message for '{}', skipping",
                    port.symbol
                ),
            }
        } else if record.protocol == known.event_transfer {
            let Some((type_urid, payload)) = record.event_parts() else {
                log::warn!(
                    "malformed event-transfer message for '{}', skipping",
                    port.symbol
                );
                return;
            };
            match port.event_buffer_mut() {
                Some(buf) => {
                    if !buf.push(0, 0, type_urid, payload) {
                        drops.event_overflow += 1;
                    }
                }
                None => log::warn!(
                    "event-transfer message for non-event port '{}', skipping",
                    port.symbol
                ),
            }
        } else {
            log::debug!(
                "unknown control protocol {} for '{}', skipping",
                record.protocol,
                port.symbol
            );
        }
    }

    fn maybe_report_drops(&mut self) {
        if self.cycle_count % DROP_REPORT_INTERVAL != 0 {
            return;
        }
        let d = self.drops;
        let r = self.drops_reported;
        let events = d.event_overflow - r.event_overflow;
        let control = d.control_overflow - r.control_overflow;
        let work = d.work_dispatch - r.work_dispatch;
        if events + control + work > 0 {
            log::warn!(
                "{}: dropped over the last {} cycles: {} events, \
                 {} control messages, {} work dispatches",
                self.module.info().name,
                DROP_REPORT_INTERVAL,
                events,
                control,
                work
            );
            self.drops_reported = d;
        }
    }

    // ── latency ──

    /// Latency in frames, probed through one zero-length cycle when
    /// the plugin declares a latency-reporting control output.
    pub fn get_latency(&mut self) -> u32 {
        let declares = self.ports.iter().any(|p| {
            p.kind == PortKind::Control
                && p.flow == PortFlow::Output
                && p.flags.reports_latency
        });
        if !declares {
            return 0;
        }
        if self.lifecycle == LifecycleState::Activated {
            let time = self.last_time;
            self.process(&time, 0);
        }
        self.plugin_latency
    }

    /// True once per latency change; the driver backend recomputes its
    /// scheduling when it sees this.
    pub fn take_latency_changed(&mut self) -> bool {
        std::mem::take(&mut self.latency_changed)
    }

    // ── UI channel ──

    /// Creates a fresh control-change channel and returns the UI-side
    /// endpoints.  Any previously attached UI is detached.
    pub fn attach_ui(&mut self) -> UiEndpoint {
        let capacity = control::ring_capacity(self.config.event_buffer_size);
        let (host, ui) = control::channel(capacity);
        self.ui = Some(host);
        ui
    }

    pub fn detach_ui(&mut self) {
        self.ui = None;
    }

    pub fn ui_attached(&self) -> bool {
        self.ui.is_some()
    }

    /// Asks the plugin for its current values on the next cycle, after
    /// an off-thread state change.  Safe from any thread.
    pub fn request_state_update(&self) {
        self.request_update.store(true, Ordering::Release);
    }

    // ── port access (off the audio thread) ──

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn port_by_symbol(&self, symbol: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.symbol == symbol)
    }

    pub fn port_index_by_symbol(&self, symbol: &str) -> Option<u32> {
        self.ports
            .iter()
            .position(|p| p.symbol == symbol)
            .map(|i| i as u32)
    }

    pub fn control_value(&self, index: u32) -> Option<f32> {
        self.ports.get(index as usize).and_then(|p| p.control_value())
    }

    /// Direct control write, clamped to the port range.
    pub fn set_control(&mut self, index: u32, value: f32) -> bool {
        match self.ports.get_mut(index as usize) {
            Some(p) if p.kind == PortKind::Control => {
                p.set_control(value);
                true
            }
            _ => false,
        }
    }

    /// Queues a control edit for delivery at the start of the next
    /// cycle, the delayed path used while the transport rolls.
    pub(crate) fn queue_control_edit(&mut self, index: u32, value: f32) -> bool {
        let ok = self.edits_tx.write(&ControlRecord::float(index, value));
        if !ok {
            self.drops.control_overflow += 1;
        }
        ok
    }

    pub(crate) fn transport_rolling(&self) -> bool {
        self.shadow.rolling()
    }

    pub(crate) fn custom_state(&self) -> Option<Vec<u8>> {
        self.handle.as_ref().and_then(|h| h.save_custom_state())
    }

    pub(crate) fn restore_custom(&mut self, data: &[u8]) -> Result<(), HostError> {
        match self.handle.as_mut() {
            Some(h) => h.restore_custom_state(data),
            None => Err(HostError::InvalidLifecycle(self.lifecycle.name())),
        }
    }

    /// Float buffer of an audio/CV port, for the driver backend to
    /// read plugin output from.
    pub fn audio_buffer(&self, index: u32) -> Option<&[f32]> {
        self.ports.get(index as usize).and_then(|p| p.audio_buffer())
    }

    /// Float buffer of an audio/CV port, for the driver backend to
    /// fill plugin input into.
    pub fn audio_buffer_mut(&mut self, index: u32) -> Option<&mut [f32]> {
        self.ports
            .get_mut(index as usize)
            .and_then(|p| p.audio_buffer_mut())
    }

    /// Queues a MIDI-style event for an event input port.
    pub fn queue_midi(&mut self, port_index: u32, frame: u64, data: [u8; 3]) -> bool {
        match self.ports.get_mut(port_index as usize) {
            Some(p) if p.kind == PortKind::Event && p.flow == PortFlow::Input => {
                p.queue_midi(frame, data);
                true
            }
            _ => false,
        }
    }

    /// Drains MIDI the plugin produced on an event output this cycle.
    pub fn take_midi_output(&mut self, port_index: u32) -> Vec<MidiOut> {
        self.ports
            .get_mut(port_index as usize)
            .map(|p| p.take_midi_output())
            .unwrap_or_default()
    }

    /// Reallocates float/event buffers for a new block length.  Must
    /// not be called while the driver is mid-cycle.
    pub fn set_block_length(&mut self, block_length: u32) {
        self.config.nominal_block_length = block_length;
        for port in &mut self.ports {
            port.allocate(block_length, self.config.event_buffer_size);
        }
    }

    // ── teardown ──

    /// Deactivates if needed, terminates and joins the worker(s),
    /// frees buffers, releases the handle.  Plugins on the
    /// known-unstable list have their handle leaked intentionally
    /// rather than dropped through a crashing destructor.
    pub fn cleanup(&mut self) {
        if matches!(
            self.lifecycle,
            LifecycleState::Freed | LifecycleState::Created
        ) {
            self.lifecycle = LifecycleState::Freed;
            return;
        }
        if self.lifecycle == LifecycleState::Activated
            && let Some(handle) = self.handle.as_mut()
        {
            handle.deactivate();
        }
        if let Some(mut worker) = self.worker.take() {
            worker.terminate();
        }
        if let Some(mut worker) = self.state_worker.take() {
            worker.terminate();
        }
        if let Some(handle) = self.handle.take() {
            if self.module.info().unstable_cleanup {
                log::warn!(
                    "{}: not freeing instance, plugin is known to crash on \
                     unload",
                    self.module.info().name
                );
                std::mem::forget(handle);
            } else {
                drop(handle);
            }
        }
        self.ports.clear();
        self.ui = None;
        if let Some(dir) = self.temp_dir.take() {
            let _ = std::fs::remove_dir_all(&dir);
        }
        self.lifecycle = LifecycleState::Freed;
        log::info!("{}: cleaned up", self.module.info().name);
    }
}

impl Drop for PluginInstance {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_gate_round_trip() {
        let gate = PauseGate::new();
        let audio = gate.clone();
        let worker = std::thread::spawn(move || {
            // simulated driver loop: checkpoint once per "cycle"
            for _ in 0..100 {
                audio.checkpoint();
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        assert!(gate.request_pause());
        // audio thread is parked inside checkpoint now
        gate.resume();
        worker.join().unwrap();
    }

    #[test]
    fn pause_without_driver_times_out() {
        let gate = PauseGate::new();
        assert!(!gate.request_pause());
        gate.resume();
    }
}
