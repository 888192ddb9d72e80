//! Processing-path integration tests: the full instantiate → activate
//! → process lifecycle against in-crate test plugins.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use plugdock::control::{ControlRecord, PROTOCOL_FLOAT};
use plugdock::error::HostError;
use plugdock::instance::{LifecycleState, PluginInstance};
use plugdock::module::ModuleInfo;
use plugdock::port::{PortFlow, PortRange};
use plugdock::transport::TimeInfo;
use plugdock::urid;
use plugdock::{HostConfig, PluginModule};

use common::{
    EchoModule, GainModule, P_EVENTS, P_GAIN, P_IN, P_LATENCY, P_MIDI_OUT,
    P_OUT, control_port,
};

fn small_config() -> HostConfig {
    HostConfig {
        nominal_block_length: 64,
        ..HostConfig::default()
    }
}

fn running_gain() -> (PluginInstance, Arc<common::GainStats>) {
    let module = GainModule::new();
    let stats = module.stats.clone();
    let mut instance = PluginInstance::new(Arc::new(module), small_config());
    instance.instantiate(false, None, None).unwrap();
    instance.activate(true).unwrap();
    (instance, stats)
}

fn rolling(frame: u64) -> TimeInfo {
    TimeInfo {
        frame,
        rolling: true,
        ..TimeInfo::default()
    }
}

fn stopped(frame: u64) -> TimeInfo {
    TimeInfo {
        frame,
        rolling: false,
        ..TimeInfo::default()
    }
}

#[test]
fn gain_passes_audio_through_and_applies_control_edits() {
    let (mut instance, _stats) = running_gain();
    instance
        .audio_buffer_mut(P_IN)
        .unwrap()
        .iter_mut()
        .for_each(|s| *s = 1.0);

    instance.process(&rolling(0), 64);
    assert!(
        instance.audio_buffer(P_OUT).unwrap()[..64]
            .iter()
            .all(|&s| s == 1.0)
    );

    // an edit arriving over the channel applies at the next cycle start
    let mut ui = instance.attach_ui();
    assert!(ui.to_host.write(&ControlRecord::float(P_GAIN, 0.5)));
    instance
        .audio_buffer_mut(P_IN)
        .unwrap()
        .iter_mut()
        .for_each(|s| *s = 1.0);
    instance.process(&rolling(64), 64);
    assert_eq!(instance.control_value(P_GAIN), Some(0.5));
    assert!(
        instance.audio_buffer(P_OUT).unwrap()[..64]
            .iter()
            .all(|&s| s == 0.5)
    );
}

#[test]
fn control_edits_clamp_to_port_range() {
    let (mut instance, _stats) = running_gain();
    let mut ui = instance.attach_ui();
    assert!(ui.to_host.write(&ControlRecord::float(P_GAIN, 99.0)));
    instance.process(&rolling(0), 64);
    assert_eq!(instance.control_value(P_GAIN), Some(2.0));
}

#[test]
fn transport_changes_emit_exactly_one_position_event() {
    let (mut instance, stats) = running_gain();

    // first cycle always counts as a discontinuity
    instance.process(&stopped(0), 64);
    assert_eq!(stats.position_events.load(Ordering::Relaxed), 1);

    // stable stopped transport: nothing
    instance.process(&stopped(0), 64);
    assert_eq!(stats.position_events.load(Ordering::Relaxed), 1);

    // start rolling: one event, then contiguous cycles are silent
    instance.process(&rolling(0), 64);
    assert_eq!(stats.position_events.load(Ordering::Relaxed), 2);
    instance.process(&rolling(64), 64);
    instance.process(&rolling(128), 64);
    assert_eq!(stats.position_events.load(Ordering::Relaxed), 2);

    // seek while rolling
    instance.process(&rolling(4096), 64);
    assert_eq!(stats.position_events.load(Ordering::Relaxed), 3);

    // stop
    instance.process(&stopped(4160), 64);
    assert_eq!(stats.position_events.load(Ordering::Relaxed), 4);
}

#[test]
fn queued_midi_is_rebased_and_echoed_to_the_output() {
    let (mut instance, stats) = running_gain();

    // note-on at absolute frame 100, inside the window [64, 128)
    assert!(instance.queue_midi(P_EVENTS, 100, [0x90, 60, 100]));
    // and one late event, delivered at the window start
    assert!(instance.queue_midi(P_EVENTS, 10, [0x80, 60, 0]));
    // and one beyond the window, which must wait
    assert!(instance.queue_midi(P_EVENTS, 500, [0x90, 62, 90]));

    instance.process(&rolling(64), 64);
    let seen = stats.midi_seen.lock().clone();
    assert_eq!(seen, vec![(36, [0x90, 60, 100]), (0, [0x80, 60, 0])]);

    // the pass-through output was translated for downstream routing
    let out = instance.take_midi_output(P_MIDI_OUT);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].time_frames, 36);
    assert_eq!(out[0].data, [0x90, 60, 100]);

    // the future event arrives once its window comes up
    instance.process(&rolling(448), 64);
    let seen = stats.midi_seen.lock().clone();
    assert_eq!(seen.last(), Some(&(52, [0x90, 62, 90])));
}

#[test]
fn latency_is_probed_from_the_reporting_port() {
    let module = GainModule::with_latency(200.0);
    let mut instance = PluginInstance::new(Arc::new(module), small_config());
    instance.instantiate(false, None, None).unwrap();
    instance.activate(true).unwrap();

    assert_eq!(instance.get_latency(), 200);
    assert!(instance.take_latency_changed());
    assert!(!instance.take_latency_changed());
    assert_eq!(instance.get_latency(), 200);
}

#[test]
fn required_feature_mismatch_fails_without_leaking_ports() {
    let module = GainModule::new();
    // not a URI this host advertises
    let info = ModuleInfo {
        required_features: vec!["urn:example:unobtainium".to_string()],
        ..module.info().clone()
    };
    let module = OverrideInfo {
        inner: module,
        info,
    };
    let mut instance = PluginInstance::new(Arc::new(module), small_config());
    match instance.instantiate(false, None, None) {
        Err(HostError::FeatureUnsupported(_)) => {}
        other => panic!("expected FeatureUnsupported, got {other:?}"),
    }
    assert_eq!(instance.lifecycle(), LifecycleState::Failed);
    assert!(instance.ports().is_empty());
}

/// Wraps a module with replacement metadata.
struct OverrideInfo {
    inner: GainModule,
    info: ModuleInfo,
}

impl PluginModule for OverrideInfo {
    fn info(&self) -> &ModuleInfo {
        &self.info
    }

    fn instantiate(
        &self,
        sample_rate: f64,
        features: &plugdock::NegotiatedFeatures,
    ) -> Result<Box<dyn plugdock::PluginHandle>, HostError> {
        self.inner.instantiate(sample_rate, features)
    }
}

#[test]
fn worker_responses_come_back_in_order_on_later_cycles() {
    let module = EchoModule::new();
    let state = module.state.clone();
    let mut instance = PluginInstance::new(Arc::new(module), small_config());
    instance.instantiate(false, None, None).unwrap();
    instance.activate(true).unwrap();

    state
        .pending
        .lock()
        .extend([b"alpha".to_vec(), b"beta".to_vec(), b"gamma".to_vec()]);

    let mut frame = 0u64;
    for _ in 0..200 {
        instance.process(&rolling(frame), 64);
        frame += 64;
        if state.responses.lock().len() == 3 {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(
        state.responses.lock().clone(),
        vec![b"alpha".to_vec(), b"beta".to_vec(), b"gamma".to_vec()]
    );
    assert!(state.end_runs.load(Ordering::Relaxed) >= 1);

    instance.cleanup();
    assert_eq!(instance.lifecycle(), LifecycleState::Freed);
}

#[test]
fn freewheeling_host_runs_work_inline() {
    let module = EchoModule::new();
    let state = module.state.clone();
    let config = HostConfig {
        freewheeling: true,
        nominal_block_length: 64,
        ..HostConfig::default()
    };
    let mut instance = PluginInstance::new(Arc::new(module), config);
    instance.instantiate(false, None, None).unwrap();
    instance.activate(true).unwrap();

    state.pending.lock().push(b"offline".to_vec());
    // inline mode: scheduled, worked, and drained inside one cycle
    instance.process(&rolling(0), 64);
    assert_eq!(state.responses.lock().clone(), vec![b"offline".to_vec()]);
}

#[test]
fn state_update_request_injects_a_patch_get() {
    let (mut instance, stats) = running_gain();
    instance.process(&rolling(0), 64);
    assert_eq!(stats.patch_gets.load(Ordering::Relaxed), 0);

    instance.request_state_update();
    instance.process(&rolling(64), 64);
    assert_eq!(stats.patch_gets.load(Ordering::Relaxed), 1);

    // one-shot
    instance.process(&rolling(128), 64);
    assert_eq!(stats.patch_gets.load(Ordering::Relaxed), 1);
}

#[test]
fn ui_edits_are_not_echoed_back_after_the_send_window() {
    let (mut instance, _stats) = running_gain();
    let mut ui = instance.attach_ui();
    assert!(ui.to_host.write(&ControlRecord::float(P_GAIN, 0.5)));

    // short block: the edit applies but no send window elapses yet
    instance.process(&rolling(0), 64);
    assert_eq!(instance.control_value(P_GAIN), Some(0.5));

    // crossing the send window must not bounce the edit back
    instance.process(&rolling(64), 4096);
    while let Some(record) = ui.from_host.read() {
        assert!(
            !(record.port_index == P_GAIN
                && record.protocol == PROTOCOL_FLOAT),
            "edited control was echoed back to the UI"
        );
    }

    // later windows stay quiet as well
    instance.process(&rolling(4160), 4096);
    assert!(ui.from_host.read().is_none());
}

#[test]
fn control_outputs_and_typed_events_reach_the_ui() {
    let (mut instance, _stats) = running_gain();
    let mut ui = instance.attach_ui();
    instance.request_state_update();
    // long enough to pass the notification throttle
    instance.process(&rolling(0), 4096);

    let known = urid::known();
    let mut latency_note = None;
    let mut reply = None;
    while let Some(record) = ui.from_host.read() {
        if record.port_index == P_LATENCY && record.protocol == PROTOCOL_FLOAT
        {
            latency_note = record.float_value();
        } else if record.port_index == P_MIDI_OUT
            && record.protocol == known.event_transfer
        {
            reply = record
                .event_parts()
                .map(|(urid, body)| (urid, body.to_vec()));
        }
    }
    // the plugin-written latency value was published once it changed
    assert_eq!(latency_note, Some(64.0));
    // the state reply arrives as a typed event, not MIDI
    assert_eq!(
        reply,
        Some((known.patch_set, 64.0_f32.to_ne_bytes().to_vec()))
    );
}

#[test]
fn edits_addressed_to_output_ports_are_ignored() {
    let (mut instance, _stats) = running_gain();
    let mut ui = instance.attach_ui();
    assert!(ui.to_host.write(&ControlRecord::float(P_LATENCY, 3.0)));
    instance.process(&rolling(0), 4096);

    // the plugin-written value survives and is still published
    assert_eq!(instance.control_value(P_LATENCY), Some(64.0));
    let mut latency_note = None;
    while let Some(record) = ui.from_host.read() {
        if record.port_index == P_LATENCY && record.protocol == PROTOCOL_FLOAT
        {
            latency_note = record.float_value();
        }
    }
    assert_eq!(latency_note, Some(64.0));
}

#[test]
fn freewheel_controls_track_the_rendering_mode() {
    let build = |freewheeling: bool| {
        let module = GainModule::new();
        let mut info = module.info().clone();
        let mut speed = control_port(
            "speed",
            PortFlow::Input,
            PortRange {
                min: 0.0,
                max: 1.0,
                ..PortRange::default()
            },
        );
        speed.flags.freewheel = true;
        info.ports.push(speed);
        let module = OverrideInfo {
            inner: module,
            info,
        };
        let config = HostConfig {
            freewheeling,
            ..small_config()
        };
        let mut instance = PluginInstance::new(Arc::new(module), config);
        instance.instantiate(false, None, None).unwrap();
        instance.activate(true).unwrap();
        instance
    };
    let speed_port = P_LATENCY + 1;

    let mut offline = build(true);
    offline.process(&rolling(0), 64);
    assert_eq!(offline.control_value(speed_port), Some(1.0));

    let mut live = build(false);
    live.process(&rolling(0), 64);
    assert_eq!(live.control_value(speed_port), Some(0.0));
}

#[test]
fn activation_is_idempotent_and_ordered() {
    let module = GainModule::new();
    let mut instance = PluginInstance::new(Arc::new(module), small_config());
    assert!(matches!(
        instance.activate(true),
        Err(HostError::InvalidLifecycle(_))
    ));
    instance.instantiate(false, None, None).unwrap();
    instance.activate(true).unwrap();
    instance.activate(true).unwrap();
    instance.activate(false).unwrap();
    instance.activate(false).unwrap();
    instance.activate(true).unwrap();
    assert_eq!(instance.lifecycle(), LifecycleState::Activated);
}
