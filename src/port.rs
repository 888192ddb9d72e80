//! Ports: metadata plus the runtime buffer connecting host and plugin.

use crate::event::EventBuffer;
use crate::module::{ParameterInfo, PortInfo};
use crate::urid::Urid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Control,
    Audio,
    Cv,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortFlow {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortRange {
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub logarithmic: bool,
    pub toggled: bool,
    pub integer: bool,
    /// min/max are relative to the sample rate and get scaled once at
    /// port construction.
    pub sample_rate_relative: bool,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            default: 0.0,
            logarithmic: false,
            toggled: false,
            integer: false,
            sample_rate_relative: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortFlags {
    pub reports_latency: bool,
    pub sidechain: bool,
    /// Forced to max while freewheeling (export) and min during
    /// realtime playback.
    pub freewheel: bool,
    pub wants_transport: bool,
}

/// Exactly one variant is populated per port, matching its kind.
pub enum PortBuffer {
    Control(f32),
    Audio(Vec<f32>),
    Cv(Vec<f32>),
    Event(EventBuffer),
}

/// A MIDI-style event queued by the driver/sequencer for delivery into
/// an event input, timestamped with an absolute frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedMidi {
    pub frame: u64,
    pub data: [u8; 3],
}

/// A MIDI event produced by the plugin this cycle, frame relative to
/// the block start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiOut {
    pub time_frames: u32,
    pub data: [u8; 3],
}

/// Clamp tolerating NaN bounds; some plugins leave ranges unset.
pub(crate) fn safe_clamp(value: f32, min: f32, max: f32) -> f32 {
    if min.is_nan() || max.is_nan() {
        return value;
    }
    value.clamp(min, max)
}

pub struct Port {
    pub symbol: String,
    pub name: String,
    pub index: u32,
    pub kind: PortKind,
    pub flow: PortFlow,
    pub range: PortRange,
    pub flags: PortFlags,
    /// Set for virtual control ports built from plugin parameters,
    /// which are identified by property URID rather than position.
    pub property_urid: Option<Urid>,
    /// Plugin-declared minimum event-buffer capacity in bytes.
    pub min_event_size: u32,
    pub(crate) buffer: PortBuffer,
    pub(crate) pending_midi: Vec<QueuedMidi>,
    pub(crate) midi_out: Vec<MidiOut>,
    /// Set by an incoming UI edit; held until the next UI send window
    /// so the edit is never echoed straight back.
    pub(crate) received_ui_event: bool,
    pub(crate) last_sent_value: f32,
}

impl Port {
    pub(crate) fn from_info(info: &PortInfo, index: u32, sample_rate: f64) -> Self {
        let mut range = info.range;
        if range.sample_rate_relative {
            range.min *= sample_rate as f32;
            range.max *= sample_rate as f32;
            range.sample_rate_relative = false;
        }
        let default = if range.default.is_nan() {
            0.0
        } else {
            range.default
        };
        let buffer = match info.kind {
            PortKind::Control => PortBuffer::Control(default),
            PortKind::Audio => PortBuffer::Audio(Vec::new()),
            PortKind::Cv => PortBuffer::Cv(Vec::new()),
            PortKind::Event => PortBuffer::Event(EventBuffer::new(0)),
        };
        Self {
            symbol: info.symbol.clone(),
            name: info.name.clone(),
            index,
            kind: info.kind,
            flow: info.flow,
            range,
            flags: info.flags,
            property_urid: None,
            min_event_size: info.min_event_size,
            buffer,
            pending_midi: Vec::new(),
            midi_out: Vec::new(),
            received_ui_event: false,
            last_sent_value: default,
        }
    }

    /// Parameters become virtual control inputs identified by URID.
    pub(crate) fn from_parameter(param: &ParameterInfo, urid: Urid, index: u32) -> Self {
        let default = if param.range.default.is_nan() {
            0.0
        } else {
            param.range.default
        };
        Self {
            symbol: param
                .uri
                .rsplit(['#', '/'])
                .next()
                .unwrap_or(param.uri.as_str())
                .to_string(),
            name: param.label.clone(),
            index,
            kind: PortKind::Control,
            flow: PortFlow::Input,
            range: param.range,
            flags: PortFlags::default(),
            property_urid: Some(urid),
            min_event_size: 0,
            buffer: PortBuffer::Control(default),
            pending_midi: Vec::new(),
            midi_out: Vec::new(),
            received_ui_event: false,
            last_sent_value: default,
        }
    }

    pub fn is_parameter(&self) -> bool {
        self.property_urid.is_some()
    }

    /// (Re)allocates the runtime buffer for a block-size change.
    /// Control values survive; float arrays and event contents do not.
    pub(crate) fn allocate(&mut self, block_length: u32, event_buffer_size: u32) {
        match self.kind {
            PortKind::Control => {}
            PortKind::Audio => {
                self.buffer = PortBuffer::Audio(vec![0.0; block_length as usize]);
            }
            PortKind::Cv => {
                self.buffer = PortBuffer::Cv(vec![0.0; block_length as usize]);
            }
            PortKind::Event => {
                let capacity = self.min_event_size.max(event_buffer_size);
                let mut buf = EventBuffer::new(capacity);
                buf.reset(self.flow == PortFlow::Input);
                self.buffer = PortBuffer::Event(buf);
            }
        }
    }

    pub fn control_value(&self) -> Option<f32> {
        match self.buffer {
            PortBuffer::Control(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn set_control(&mut self, value: f32) {
        if let PortBuffer::Control(ref mut v) = self.buffer {
            *v = safe_clamp(value, self.range.min, self.range.max);
        }
    }

    /// Sets a control value without clamping; used for the freewheel
    /// override where the bound itself is the target.
    pub(crate) fn force_control(&mut self, value: f32) {
        if let PortBuffer::Control(ref mut v) = self.buffer {
            *v = value;
        }
    }

    pub fn event_buffer(&self) -> Option<&EventBuffer> {
        match self.buffer {
            PortBuffer::Event(ref b) => Some(b),
            _ => None,
        }
    }

    pub(crate) fn event_buffer_mut(&mut self) -> Option<&mut EventBuffer> {
        match self.buffer {
            PortBuffer::Event(ref mut b) => Some(b),
            _ => None,
        }
    }

    pub fn audio_buffer(&self) -> Option<&[f32]> {
        match self.buffer {
            PortBuffer::Audio(ref b) | PortBuffer::Cv(ref b) => Some(b),
            _ => None,
        }
    }

    pub fn audio_buffer_mut(&mut self) -> Option<&mut [f32]> {
        match self.buffer {
            PortBuffer::Audio(ref mut b) | PortBuffer::Cv(ref mut b) => Some(b),
            _ => None,
        }
    }

    /// Queues a MIDI-style event for a later cycle.  Called off the
    /// audio thread or between cycles by the driver collaborator.
    pub fn queue_midi(&mut self, frame: u64, data: [u8; 3]) {
        self.pending_midi.push(QueuedMidi { frame, data });
    }

    /// Moves queued MIDI events whose timestamp falls inside
    /// `[window_start, window_start + nframes)` into the event buffer,
    /// rebased to the window start.  Late events are delivered at 0,
    /// future events stay queued.  Returns the number of dropped
    /// (overflowed) events.
    pub(crate) fn drain_midi_into_events(
        &mut self,
        window_start: u64,
        nframes: u32,
        midi_urid: Urid,
    ) -> u64 {
        if self.pending_midi.is_empty() {
            return 0;
        }
        let window_end = window_start + u64::from(nframes);
        let mut dropped = 0u64;
        let pending = std::mem::take(&mut self.pending_midi);
        let buf = match self.buffer {
            PortBuffer::Event(ref mut b) => b,
            // no event buffer: put the queue back untouched
            _ => {
                self.pending_midi = pending;
                return 0;
            }
        };
        for ev in pending {
            if ev.frame >= window_end {
                self.pending_midi.push(ev);
                continue;
            }
            let rel = ev.frame.saturating_sub(window_start) as u32;
            if !buf.push(rel, 0, midi_urid, &ev.data) {
                dropped += 1;
            }
        }
        dropped
    }

    /// Drains the MIDI events the plugin produced this cycle.
    pub fn take_midi_output(&mut self) -> Vec<MidiOut> {
        std::mem::take(&mut self.midi_out)
    }
}
