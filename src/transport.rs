//! Transport position injection.
//!
//! The driver backend hands `process()` a [`TimeInfo`] every block.  The
//! instance shadows the rolling flag, global frame and BPM from the
//! previous cycle; when any of them jumps, a position event is written
//! into every transport-interested event input before other events.

use crate::urid::Urid;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeInfo {
    /// Absolute frame at the start of this block.
    pub frame: u64,
    pub rolling: bool,
    pub bpm: f32,
    /// Zero-based bar number.
    pub bar: i64,
    /// Beat within the bar, fractional.
    pub beat: f64,
    pub beats_per_bar: f32,
    pub beat_unit: u32,
}

impl Default for TimeInfo {
    fn default() -> Self {
        Self {
            frame: 0,
            rolling: false,
            bpm: 120.0,
            bar: 0,
            beat: 0.0,
            beats_per_bar: 4.0,
            beat_unit: 4,
        }
    }
}

const BPM_EPSILON: f32 = 1e-3;

/// Last observed transport, used to detect discontinuities.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TransportShadow {
    rolling: bool,
    frame: u64,
    bpm: f32,
    primed: bool,
}

impl TransportShadow {
    pub fn new() -> Self {
        Self {
            rolling: false,
            frame: 0,
            bpm: 0.0,
            primed: false,
        }
    }

    pub fn rolling(&self) -> bool {
        self.rolling
    }

    /// True when the transport differs from what the previous cycle
    /// predicted: rolling toggled, frame discontinuous, or BPM moved.
    /// The very first cycle always counts as changed.
    pub fn changed(&self, time: &TimeInfo) -> bool {
        !self.primed
            || self.rolling != time.rolling
            || self.frame != time.frame
            || (self.bpm - time.bpm).abs() > BPM_EPSILON
    }

    /// Records the expected transport for the next cycle.
    pub fn advance(&mut self, time: &TimeInfo, nframes: u32) {
        self.rolling = time.rolling;
        self.bpm = time.bpm;
        self.frame = if time.rolling {
            time.frame + u64::from(nframes)
        } else {
            time.frame
        };
        self.primed = true;
    }
}

/// Payload of a position event: a fixed 40-byte native-endian record.
///
/// Both producer and consumer live in this process, so a flat layout is
/// used instead of a nested attribute object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionEvent {
    pub frame: u64,
    /// 1.0 while rolling, 0.0 while stopped.
    pub speed: f32,
    pub bar: i64,
    pub beat: f32,
    pub beats_per_bar: f32,
    pub beat_unit: u32,
    pub bpm: f32,
}

pub const POSITION_EVENT_SIZE: usize = 40;

impl PositionEvent {
    pub fn from_time(time: &TimeInfo) -> Self {
        Self {
            frame: time.frame,
            speed: if time.rolling { 1.0 } else { 0.0 },
            bar: time.bar,
            beat: time.beat as f32,
            beats_per_bar: time.beats_per_bar,
            beat_unit: time.beat_unit,
            bpm: time.bpm,
        }
    }

    pub fn type_urid() -> Urid {
        crate::urid::known().time_position
    }

    pub fn to_bytes(&self) -> [u8; POSITION_EVENT_SIZE] {
        let mut out = [0u8; POSITION_EVENT_SIZE];
        out[0..8].copy_from_slice(&self.frame.to_ne_bytes());
        out[8..12].copy_from_slice(&self.speed.to_ne_bytes());
        out[12..20].copy_from_slice(&self.bar.to_ne_bytes());
        out[20..24].copy_from_slice(&self.beat.to_ne_bytes());
        out[24..28].copy_from_slice(&self.beats_per_bar.to_ne_bytes());
        out[28..32].copy_from_slice(&self.beat_unit.to_ne_bytes());
        out[32..36].copy_from_slice(&self.bpm.to_ne_bytes());
        out
    }

    pub fn from_bytes(body: &[u8]) -> Option<Self> {
        if body.len() < POSITION_EVENT_SIZE - 4 {
            return None;
        }
        let u32_at = |at: usize| {
            u32::from_ne_bytes([body[at], body[at + 1], body[at + 2], body[at + 3]])
        };
        let f32_at = |at: usize| f32::from_ne_bytes(u32_at(at).to_ne_bytes());
        Some(Self {
            frame: u64::from_ne_bytes(body[0..8].try_into().ok()?),
            speed: f32_at(8),
            bar: i64::from_ne_bytes(body[12..20].try_into().ok()?),
            beat: f32_at(20),
            beats_per_bar: f32_at(24),
            beat_unit: u32_at(28),
            bpm: f32_at(32),
        })
    }
}
