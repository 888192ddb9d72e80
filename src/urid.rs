//! Process-wide URI <-> integer-id interning.
//!
//! Plugins and the host compare identifiers in hot paths by integer
//! rather than by string.  The table is process-global so that the same
//! URI maps to the same id across all plugin instances, guarded by a
//! single mutex since mapping happens at load time, never per sample.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// An interned URI id.  0 is reserved and never handed out.
pub type Urid = u32;

pub struct UridTable {
    inner: Mutex<UridTableInner>,
}

struct UridTableInner {
    uri_to_id: HashMap<String, Urid>,
    id_to_uri: Vec<String>,
}

impl UridTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(UridTableInner {
                uri_to_id: HashMap::new(),
                // index 0 is the reserved null id
                id_to_uri: vec![String::new()],
            }),
        }
    }

    /// Returns a stable id for `uri`, creating an entry on first use.
    pub fn map(&self, uri: &str) -> Urid {
        let mut inner = self.inner.lock();
        if let Some(&id) = inner.uri_to_id.get(uri) {
            return id;
        }
        let id = inner.id_to_uri.len() as Urid;
        inner.uri_to_id.insert(uri.to_string(), id);
        inner.id_to_uri.push(uri.to_string());
        id
    }

    /// Returns the URI originally mapped to `urid`, or `None` for ids
    /// this table never produced (including the reserved 0).
    pub fn unmap(&self, urid: Urid) -> Option<String> {
        if urid == 0 {
            return None;
        }
        let inner = self.inner.lock();
        inner.id_to_uri.get(urid as usize).cloned()
    }

    pub fn len(&self) -> usize {
        // minus the reserved slot
        self.inner.lock().id_to_uri.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for UridTable {
    fn default() -> Self {
        Self::new()
    }
}

static TABLE: Lazy<UridTable> = Lazy::new(UridTable::new);

/// The process-global table.  URIDs from here compare equal across all
/// plugin instances.
pub fn table() -> &'static UridTable {
    &TABLE
}

pub mod uris {
    pub const ATOM_FLOAT: &str = "http://lv2plug.in/ns/ext/atom#Float";
    pub const ATOM_INT: &str = "http://lv2plug.in/ns/ext/atom#Int";
    pub const ATOM_LONG: &str = "http://lv2plug.in/ns/ext/atom#Long";
    pub const ATOM_OBJECT: &str = "http://lv2plug.in/ns/ext/atom#Object";
    pub const ATOM_CHUNK: &str = "http://lv2plug.in/ns/ext/atom#Chunk";
    pub const ATOM_SEQUENCE: &str = "http://lv2plug.in/ns/ext/atom#Sequence";
    pub const MIDI_EVENT: &str = "http://lv2plug.in/ns/ext/midi#MidiEvent";
    pub const TIME_POSITION: &str = "http://lv2plug.in/ns/ext/time#Position";
    pub const PATCH_GET: &str = "http://lv2plug.in/ns/ext/patch#Get";
    pub const PATCH_SET: &str = "http://lv2plug.in/ns/ext/patch#Set";
    pub const EVENT_TRANSFER: &str =
        "http://lv2plug.in/ns/ext/atom#eventTransfer";
}

/// Ids for the URIs the host itself reads or writes, resolved once
/// against the global table.
pub struct KnownUrids {
    pub atom_float: Urid,
    pub atom_int: Urid,
    pub atom_long: Urid,
    pub atom_object: Urid,
    pub atom_chunk: Urid,
    pub atom_sequence: Urid,
    pub midi_event: Urid,
    pub time_position: Urid,
    pub patch_get: Urid,
    pub patch_set: Urid,
    pub event_transfer: Urid,
}

static KNOWN: Lazy<KnownUrids> = Lazy::new(|| {
    let t = table();
    KnownUrids {
        atom_float: t.map(uris::ATOM_FLOAT),
        atom_int: t.map(uris::ATOM_INT),
        atom_long: t.map(uris::ATOM_LONG),
        atom_object: t.map(uris::ATOM_OBJECT),
        atom_chunk: t.map(uris::ATOM_CHUNK),
        atom_sequence: t.map(uris::ATOM_SEQUENCE),
        midi_event: t.map(uris::MIDI_EVENT),
        time_position: t.map(uris::TIME_POSITION),
        patch_get: t.map(uris::PATCH_GET),
        patch_set: t.map(uris::PATCH_SET),
        event_transfer: t.map(uris::EVENT_TRANSFER),
    }
});

pub fn known() -> &'static KnownUrids {
    &KNOWN
}
