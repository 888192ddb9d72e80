//! Control-change messaging between the realtime thread and a UI or
//! control thread.
//!
//! Each direction is a single-producer/single-consumer byte ring.  A
//! record is a 12-byte native-endian header `{ port_index, protocol,
//! size }` followed by `size` body bytes; protocol 0 carries a raw
//! 4-byte float control value, any other protocol is an
//! application-defined URID (e.g. event-transfer for forwarded atoms).
//! Writes are non-blocking and drop whole records on overflow; a
//! partial record is never left on the ring.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::urid::Urid;

/// Protocol tag for a raw float control value (4-byte body).
pub const PROTOCOL_FLOAT: u32 = 0;

/// The ring holds a few cycles' worth of traffic so the UI thread does
/// not have to drain every cycle.  Value inherited from long-running
/// host practice.
pub const N_BUFFER_CYCLES: usize = 16;

const HEADER_SIZE: usize = 12;
const MIN_RING_BYTES: usize = 4096;

/// Ring capacity in bytes for one direction.
pub fn ring_capacity(event_buffer_size: u32) -> usize {
    (event_buffer_size as usize).max(MIN_RING_BYTES) * N_BUFFER_CYCLES
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRecord {
    pub port_index: u32,
    pub protocol: u32,
    pub body: Vec<u8>,
}

impl ControlRecord {
    pub fn float(port_index: u32, value: f32) -> Self {
        Self {
            port_index,
            protocol: PROTOCOL_FLOAT,
            body: value.to_ne_bytes().to_vec(),
        }
    }

    /// For event-transfer records the body is the event's type id
    /// followed by its payload.
    pub fn event(port_index: u32, protocol: u32, type_urid: Urid, payload: &[u8]) -> Self {
        let mut body = Vec::with_capacity(4 + payload.len());
        body.extend_from_slice(&type_urid.to_ne_bytes());
        body.extend_from_slice(payload);
        Self {
            port_index,
            protocol,
            body,
        }
    }

    /// The float value, when this is a protocol-0 record with the
    /// mandated 4-byte body.
    pub fn float_value(&self) -> Option<f32> {
        if self.protocol != PROTOCOL_FLOAT || self.body.len() != 4 {
            return None;
        }
        Some(f32::from_ne_bytes([
            self.body[0],
            self.body[1],
            self.body[2],
            self.body[3],
        ]))
    }

    /// Splits an event-transfer body back into `(type, payload)`.
    pub fn event_parts(&self) -> Option<(Urid, &[u8])> {
        if self.body.len() < 4 {
            return None;
        }
        let type_urid = u32::from_ne_bytes([
            self.body[0],
            self.body[1],
            self.body[2],
            self.body[3],
        ]);
        Some((type_urid, &self.body[4..]))
    }

    fn wire_len(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

pub struct ControlWriter {
    prod: HeapProd<u8>,
}

pub struct ControlReader {
    cons: HeapCons<u8>,
}

impl ControlWriter {
    /// Non-blocking; returns `false` and writes nothing when the whole
    /// record does not fit.
    pub fn write(&mut self, record: &ControlRecord) -> bool {
        if self.prod.vacant_len() < record.wire_len() {
            return false;
        }
        // one push_slice per record: the consumer must never observe a
        // header whose body has not been published yet
        let mut wire = Vec::with_capacity(record.wire_len());
        wire.extend_from_slice(&record.port_index.to_ne_bytes());
        wire.extend_from_slice(&record.protocol.to_ne_bytes());
        wire.extend_from_slice(&(record.body.len() as u32).to_ne_bytes());
        wire.extend_from_slice(&record.body);
        self.prod.push_slice(&wire);
        true
    }
}

impl ControlReader {
    /// Non-blocking; `None` when no complete record is pending.
    pub fn read(&mut self) -> Option<ControlRecord> {
        if self.cons.occupied_len() < HEADER_SIZE {
            return None;
        }
        let mut header = [0u8; HEADER_SIZE];
        self.cons.pop_slice(&mut header);
        let field = |at: usize| {
            u32::from_ne_bytes([
                header[at],
                header[at + 1],
                header[at + 2],
                header[at + 3],
            ])
        };
        let port_index = field(0);
        let protocol = field(4);
        let size = field(8) as usize;
        let mut body = vec![0u8; size];
        // the producer publishes header and body in one push, so the
        // body is fully visible by now
        self.cons.pop_slice(&mut body);
        Some(ControlRecord {
            port_index,
            protocol,
            body,
        })
    }
}

/// Host-side endpoints of an attached channel.
pub struct HostEndpoint {
    pub to_ui: ControlWriter,
    pub from_ui: ControlReader,
}

/// UI-side endpoints.
pub struct UiEndpoint {
    pub to_host: ControlWriter,
    pub from_host: ControlReader,
}

/// Builds the two directed rings of one host<->UI channel.
pub fn channel(capacity_bytes: usize) -> (HostEndpoint, UiEndpoint) {
    let (host_prod, ui_cons) = HeapRb::<u8>::new(capacity_bytes).split();
    let (ui_prod, host_cons) = HeapRb::<u8>::new(capacity_bytes).split();
    (
        HostEndpoint {
            to_ui: ControlWriter { prod: host_prod },
            from_ui: ControlReader { cons: host_cons },
        },
        UiEndpoint {
            to_host: ControlWriter { prod: ui_prod },
            from_host: ControlReader { cons: ui_cons },
        },
    )
}

/// A private SPSC pair used inside the host (state-manager edits).
pub(crate) fn edit_queue(capacity_bytes: usize) -> (ControlWriter, ControlReader) {
    let (prod, cons) = HeapRb::<u8>::new(capacity_bytes).split();
    (
        ControlWriter { prod },
        ControlReader { cons },
    )
}
