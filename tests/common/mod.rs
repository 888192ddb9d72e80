//! In-crate test plugins: a gain processor with an event path and a
//! background-work echo plugin.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use plugdock::error::{HostError, WorkError};
use plugdock::features::NegotiatedFeatures;
use plugdock::module::{
    ModuleInfo, PluginHandle, PluginModule, PortConnections, PortInfo,
    WorkInterface,
};
use plugdock::port::{PortFlags, PortFlow, PortKind, PortRange};
use plugdock::urid;
use plugdock::worker::WorkScheduler;

/// Routes host log output through the test harness; run with
/// `RUST_LOG=debug` to see the per-cycle diagnostics.
pub fn capture_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn control_port(symbol: &str, flow: PortFlow, range: PortRange) -> PortInfo {
    PortInfo {
        symbol: symbol.to_string(),
        name: symbol.to_string(),
        kind: PortKind::Control,
        flow,
        range,
        flags: PortFlags::default(),
        min_event_size: 0,
        designated_control: false,
    }
}

pub fn audio_port(symbol: &str, flow: PortFlow) -> PortInfo {
    PortInfo {
        symbol: symbol.to_string(),
        name: symbol.to_string(),
        kind: PortKind::Audio,
        flow,
        range: PortRange::default(),
        flags: PortFlags::default(),
        min_event_size: 0,
        designated_control: false,
    }
}

pub fn event_port(symbol: &str, flow: PortFlow) -> PortInfo {
    PortInfo {
        symbol: symbol.to_string(),
        name: symbol.to_string(),
        kind: PortKind::Event,
        flow,
        range: PortRange::default(),
        flags: PortFlags::default(),
        min_event_size: 0,
        designated_control: false,
    }
}

// ── gain plugin ──

pub const GAIN_URI: &str = "urn:plugdock-test:gain";

pub const P_GAIN: u32 = 0;
pub const P_IN: u32 = 1;
pub const P_OUT: u32 = 2;
pub const P_EVENTS: u32 = 3;
pub const P_MIDI_OUT: u32 = 4;
pub const P_LATENCY: u32 = 5;

#[derive(Default)]
pub struct GainStats {
    pub position_events: AtomicU64,
    pub patch_gets: AtomicU64,
    pub midi_seen: Mutex<Vec<(u32, [u8; 3])>>,
    pub custom: Mutex<Option<Vec<u8>>>,
}

/// Multiplies input by the gain control, echoes MIDI to its event
/// output, reports a fixed latency, and tallies host-injected events.
pub struct GainModule {
    info: ModuleInfo,
    pub stats: Arc<GainStats>,
}

impl GainModule {
    pub fn new() -> Self {
        Self::with_latency(64.0)
    }

    pub fn with_latency(latency: f32) -> Self {
        capture_logs();
        let mut events_in = event_port("events", PortFlow::Input);
        events_in.flags.wants_transport = true;
        events_in.designated_control = true;
        let mut latency_out = control_port(
            "latency",
            PortFlow::Output,
            PortRange {
                min: 0.0,
                max: 8192.0,
                ..PortRange::default()
            },
        );
        latency_out.flags.reports_latency = true;
        let info = ModuleInfo {
            uri: GAIN_URI.to_string(),
            name: "Test Gain".to_string(),
            ports: vec![
                control_port(
                    "gain",
                    PortFlow::Input,
                    PortRange {
                        min: 0.0,
                        max: 2.0,
                        default: 1.0,
                        ..PortRange::default()
                    },
                ),
                audio_port("in", PortFlow::Input),
                audio_port("out", PortFlow::Output),
                events_in,
                event_port("midi_out", PortFlow::Output),
                latency_out,
            ],
            ..ModuleInfo::default()
        };
        Self {
            info,
            stats: Arc::new(GainStats {
                custom: Mutex::new(Some(latency.to_ne_bytes().to_vec())),
                ..GainStats::default()
            }),
        }
    }
}

impl PluginModule for GainModule {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn instantiate(
        &self,
        _sample_rate: f64,
        _features: &NegotiatedFeatures,
    ) -> Result<Box<dyn PluginHandle>, HostError> {
        Ok(Box::new(GainHandle {
            stats: self.stats.clone(),
        }))
    }
}

struct GainHandle {
    stats: Arc<GainStats>,
}

impl PluginHandle for GainHandle {
    fn run(&mut self, ports: &mut PortConnections<'_>, nframes: u32) {
        let known = urid::known();
        let mut midi_thru = Vec::new();
        let mut state_reply = None;
        if let Some(events) = ports.events(P_EVENTS) {
            for ev in events.iter() {
                if ev.type_urid == known.time_position {
                    self.stats.position_events.fetch_add(1, Ordering::Relaxed);
                } else if ev.type_urid == known.patch_get {
                    self.stats.patch_gets.fetch_add(1, Ordering::Relaxed);
                    state_reply = self.stats.custom.lock().clone();
                } else if ev.type_urid == known.midi_event && ev.body.len() >= 3 {
                    let data = [ev.body[0], ev.body[1], ev.body[2]];
                    self.stats.midi_seen.lock().push((ev.time_frames, data));
                    midi_thru.push((ev.time_frames, data));
                }
            }
        }
        if let Some(out) = ports.events_mut(P_MIDI_OUT) {
            for (frames, data) in midi_thru {
                out.push(frames, 0, known.midi_event, &data);
            }
            // a state query gets its answer on the event output
            if let Some(body) = state_reply {
                out.push(0, 0, known.patch_set, &body);
            }
        }
        let gain = ports.control(P_GAIN);
        if let Some((input, output)) = ports.audio_pair(P_IN, P_OUT) {
            let n = nframes as usize;
            for i in 0..n.min(input.len()).min(output.len()) {
                output[i] = input[i] * gain;
            }
        }
        let latency = self
            .stats
            .custom
            .lock()
            .as_deref()
            .and_then(|b| b.try_into().ok())
            .map(f32::from_ne_bytes)
            .unwrap_or(0.0);
        ports.set_control(P_LATENCY, latency);
    }

    fn save_custom_state(&self) -> Option<Vec<u8>> {
        self.stats.custom.lock().clone()
    }

    fn restore_custom_state(&mut self, data: &[u8]) -> Result<(), HostError> {
        *self.stats.custom.lock() = Some(data.to_vec());
        Ok(())
    }
}

// ── background-work echo plugin ──

pub const ECHO_URI: &str = "urn:plugdock-test:echo";

#[derive(Default)]
pub struct EchoState {
    /// Requests the next `run()` should schedule.
    pub pending: Mutex<Vec<Vec<u8>>>,
    /// Responses delivered back on the processing path.
    pub responses: Mutex<Vec<Vec<u8>>>,
    pub end_runs: AtomicU64,
}

/// Declares the background-work capability; every scheduled request is
/// echoed back as a single response.
pub struct EchoModule {
    info: ModuleInfo,
    pub state: Arc<EchoState>,
}

impl EchoModule {
    pub fn new() -> Self {
        capture_logs();
        let info = ModuleInfo {
            uri: ECHO_URI.to_string(),
            name: "Test Echo".to_string(),
            ports: vec![audio_port("out", PortFlow::Output)],
            has_worker: true,
            ..ModuleInfo::default()
        };
        Self {
            info,
            state: Arc::new(EchoState::default()),
        }
    }
}

impl PluginModule for EchoModule {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn instantiate(
        &self,
        _sample_rate: f64,
        features: &NegotiatedFeatures,
    ) -> Result<Box<dyn PluginHandle>, HostError> {
        Ok(Box::new(EchoHandle {
            scheduler: features.worker.clone(),
            state: self.state.clone(),
            iface: Arc::new(EchoIface {
                state: self.state.clone(),
            }),
        }))
    }
}

struct EchoIface {
    state: Arc<EchoState>,
}

impl WorkInterface for EchoIface {
    fn work(
        &self,
        respond: &mut dyn FnMut(&[u8]),
        data: &[u8],
    ) -> Result<(), WorkError> {
        respond(data);
        Ok(())
    }

    fn work_response(&self, data: &[u8]) {
        self.state.responses.lock().push(data.to_vec());
    }

    fn end_run(&self) {
        self.state.end_runs.fetch_add(1, Ordering::Relaxed);
    }
}

struct EchoHandle {
    scheduler: Option<WorkScheduler>,
    state: Arc<EchoState>,
    iface: Arc<dyn WorkInterface>,
}

impl PluginHandle for EchoHandle {
    fn run(&mut self, _ports: &mut PortConnections<'_>, _nframes: u32) {
        if let Some(scheduler) = &self.scheduler {
            for request in self.state.pending.lock().drain(..) {
                scheduler.schedule(&request);
            }
        }
    }

    fn work_interface(&self) -> Option<Arc<dyn WorkInterface>> {
        Some(self.iface.clone())
    }
}
