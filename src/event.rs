//! Per-cycle event buffers for event-capable ports.
//!
//! An `EventBuffer` is a fixed-capacity byte region holding a sequence
//! of timestamped, typed records packed back to back:
//!
//! ```text
//! { time_frames: u32, subframe: u32, type: u32, size: u32, body[size] }
//! ```
//!
//! Each record is padded to an 8-byte boundary so iterators can advance
//! by computed offsets.  Header fields are native-endian; the buffer
//! never leaves the process.  Iteration order is append order; any
//! ordering guarantee beyond that is the writer's responsibility.

use crate::urid::Urid;

pub const EVENT_HEADER_SIZE: usize = 16;
const ALIGN: usize = 8;

#[inline]
fn padded(size: usize) -> usize {
    (size + (ALIGN - 1)) & !(ALIGN - 1)
}

/// Opaque cursor into an [`EventBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventIter {
    offset: usize,
}

/// A decoded view of one record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventRef<'a> {
    pub time_frames: u32,
    pub subframe: u32,
    pub type_urid: Urid,
    pub body: &'a [u8],
}

pub struct EventBuffer {
    data: Vec<u8>,
    len: usize,
    is_input: bool,
}

impl EventBuffer {
    /// Capacity is fixed for the lifetime of the buffer.
    pub fn new(capacity: u32) -> Self {
        let capacity = (capacity as usize).max(EVENT_HEADER_SIZE);
        Self {
            data: vec![0u8; capacity],
            len: 0,
            is_input: true,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Occupied bytes, padding included.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Clears the buffer: an input becomes an empty sequence for the
    /// host to fill, an output becomes an open chunk for the plugin to
    /// write into.
    pub fn reset(&mut self, as_input: bool) {
        self.len = 0;
        self.is_input = as_input;
    }

    pub fn is_input(&self) -> bool {
        self.is_input
    }

    pub fn begin(&self) -> EventIter {
        EventIter { offset: 0 }
    }

    pub fn end(&self) -> EventIter {
        EventIter { offset: self.len }
    }

    pub fn is_valid(&self, iter: EventIter) -> bool {
        iter.offset + EVENT_HEADER_SIZE <= self.len
    }

    pub fn next(&self, iter: EventIter) -> EventIter {
        if !self.is_valid(iter) {
            return iter;
        }
        let size = self.record_size(iter.offset);
        EventIter {
            offset: iter.offset + padded(EVENT_HEADER_SIZE + size),
        }
    }

    fn record_size(&self, offset: usize) -> usize {
        let b = &self.data[offset + 12..offset + 16];
        u32::from_ne_bytes([b[0], b[1], b[2], b[3]]) as usize
    }

    pub fn get(&self, iter: EventIter) -> Option<EventRef<'_>> {
        if !self.is_valid(iter) {
            return None;
        }
        let o = iter.offset;
        let field = |at: usize| {
            let b = &self.data[o + at..o + at + 4];
            u32::from_ne_bytes([b[0], b[1], b[2], b[3]])
        };
        let size = field(12) as usize;
        Some(EventRef {
            time_frames: field(0),
            subframe: field(4),
            type_urid: field(8),
            body: &self.data[o + EVENT_HEADER_SIZE..o + EVENT_HEADER_SIZE + size],
        })
    }

    /// Writes one record at the iterator position and advances it.
    ///
    /// Only appending at the current end is accepted.  Returns `false`
    /// without mutating anything if the padded record does not fit or
    /// the iterator is stale; callers treat that as drop-and-warn,
    /// never as a fatal error.
    pub fn write(
        &mut self,
        iter: &mut EventIter,
        time_frames: u32,
        subframe: u32,
        type_urid: Urid,
        body: &[u8],
    ) -> bool {
        if iter.offset != self.len {
            return false;
        }
        let total = padded(EVENT_HEADER_SIZE + body.len());
        if self.len + total > self.data.len() {
            return false;
        }
        let o = self.len;
        self.data[o..o + 4].copy_from_slice(&time_frames.to_ne_bytes());
        self.data[o + 4..o + 8].copy_from_slice(&subframe.to_ne_bytes());
        self.data[o + 8..o + 12].copy_from_slice(&type_urid.to_ne_bytes());
        self.data[o + 12..o + 16]
            .copy_from_slice(&(body.len() as u32).to_ne_bytes());
        self.data[o + EVENT_HEADER_SIZE..o + EVENT_HEADER_SIZE + body.len()]
            .copy_from_slice(body);
        // zero the padding so iteration over reused buffers stays clean
        self.data[o + EVENT_HEADER_SIZE + body.len()..o + total].fill(0);
        self.len = o + total;
        iter.offset = self.len;
        true
    }

    /// Appends at the end; convenience over [`write`](Self::write).
    pub fn push(
        &mut self,
        time_frames: u32,
        subframe: u32,
        type_urid: Urid,
        body: &[u8],
    ) -> bool {
        let mut iter = self.end();
        self.write(&mut iter, time_frames, subframe, type_urid, body)
    }

    pub fn iter(&self) -> Events<'_> {
        Events {
            buf: self,
            iter: self.begin(),
        }
    }
}

pub struct Events<'a> {
    buf: &'a EventBuffer,
    iter: EventIter,
}

impl<'a> Iterator for Events<'a> {
    type Item = EventRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let ev = self.buf.get(self.iter)?;
        self.iter = self.buf.next(self.iter);
        Some(ev)
    }
}
