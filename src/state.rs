//! State capture, persistence, and restore.
//!
//! A state description is a JSON document: one value per control input
//! port (keyed by symbol, typed by URI so records survive across
//! processes) plus an optional opaque blob the plugin itself produced.
//! Restore without the thread-safe-restore capability briefly pauses
//! processing through the instance's [`PauseGate`]; with it, values go
//! through the event path while the transport rolls.
//!
//! [`PauseGate`]: crate::instance::PauseGate

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::HostError;
use crate::instance::{LifecycleState, PluginInstance};
use crate::module::ModuleInfo;
use crate::port::{PortFlow, PortKind};
use crate::urid::uris;

pub const STATE_FILE_EXT: &str = "statejson";

/// One persisted port value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortValue {
    /// Type URI, not URID: URIDs are process-local.
    pub type_uri: String,
    pub data: Vec<u8>,
}

impl PortValue {
    pub fn float(value: f32) -> Self {
        Self {
            type_uri: uris::ATOM_FLOAT.to_string(),
            data: value.to_ne_bytes().to_vec(),
        }
    }
}

/// A complete plugin state description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub plugin_uri: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub bank: Option<String>,
    #[serde(default)]
    pub ports: BTreeMap<String, PortValue>,
    /// Plugin-private blob, opaque to the host.
    #[serde(default)]
    pub custom: Option<Vec<u8>>,
}

/// A saved state: either portable in-memory or backed by a file.
#[derive(Debug, Clone)]
pub enum StateHandle {
    Memory(StateRecord),
    File { path: PathBuf, record: StateRecord },
}

impl StateHandle {
    pub fn record(&self) -> &StateRecord {
        match self {
            StateHandle::Memory(record) => record,
            StateHandle::File { record, .. } => record,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            StateHandle::Memory(_) => None,
            StateHandle::File { path, .. } => Some(path),
        }
    }
}

/// Resolves paths mentioned by state operations.  The default maps
/// nothing; a project-aware host substitutes its own to make saved
/// states relocatable.
pub trait PathMapper: Send + Sync {
    fn absolute(&self, path: &Path) -> PathBuf;
}

pub struct IdentityMapper;

impl PathMapper for IdentityMapper {
    fn absolute(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }
}

/// One listed preset: declared by the plugin, or a user state file.
#[derive(Debug, Clone)]
pub struct PresetEntry {
    /// Declared preset URI, or the state file path for user presets.
    pub uri: String,
    pub label: String,
    pub bank: Option<String>,
    pub user: bool,
}

pub struct StateManager {
    mapper: Box<dyn PathMapper>,
    preset_dir: Option<PathBuf>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            mapper: Box::new(IdentityMapper),
            preset_dir: dirs::data_local_dir()
                .map(|d| d.join("plugdock").join("presets")),
        }
    }

    pub fn with_mapper(mut self, mapper: Box<dyn PathMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_preset_dir(mut self, dir: PathBuf) -> Self {
        self.preset_dir = Some(dir);
        self
    }

    // ── capture ──

    /// Reads every control-input value plus the plugin's custom blob.
    pub fn capture(&self, instance: &PluginInstance, label: &str) -> StateRecord {
        let mut ports = BTreeMap::new();
        for port in instance.ports() {
            if port.kind != PortKind::Control || port.flow != PortFlow::Input {
                continue;
            }
            if let Some(v) = port.control_value() {
                ports.insert(port.symbol.clone(), PortValue::float(v));
            }
        }
        StateRecord {
            plugin_uri: instance.module().info().uri.clone(),
            label: label.to_string(),
            bank: None,
            ports,
            custom: instance.custom_state(),
        }
    }

    pub fn save_to_memory(
        &self,
        instance: &PluginInstance,
        label: &str,
    ) -> StateHandle {
        StateHandle::Memory(self.capture(instance, label))
    }

    /// Serializes the current state under `<dir>/states/<name>.statejson`
    /// (`backups/` instead when `is_backup`).  Non-backup saves become
    /// the instance's saved-state file for later reinstantiation.
    pub fn save_to_file(
        &self,
        instance: &mut PluginInstance,
        dir: &Path,
        label: &str,
        is_backup: bool,
    ) -> Result<StateHandle, HostError> {
        let record = self.capture(instance, label);
        let subdir = self
            .mapper
            .absolute(dir)
            .join(if is_backup { "backups" } else { "states" });
        std::fs::create_dir_all(&subdir)?;
        let path = subdir.join(format!("{}.{STATE_FILE_EXT}", file_stem(label)));
        let text = serde_json::to_string_pretty(&record).map_err(|e| {
            HostError::StateLoadFailed(format!("cannot serialize state: {e}"))
        })?;
        std::fs::write(&path, text)?;
        if !is_backup {
            instance.set_state_file(path.clone());
        }
        log::info!(
            "{}: saved state to {}",
            instance.module().info().name,
            path.display()
        );
        Ok(StateHandle::File { path, record })
    }

    pub fn load_file(&self, path: &Path) -> Result<StateRecord, HostError> {
        let path = self.mapper.absolute(path);
        let text = std::fs::read_to_string(&path)?;
        serde_json::from_str(&text).map_err(|e| {
            HostError::StateLoadFailed(format!("{}: {e}", path.display()))
        })
    }

    // ── restore ──

    /// Applies a saved state to a live instance.
    ///
    /// Without the thread-safe-restore capability the application is
    /// wrapped in a pause handshake; otherwise values written while
    /// the transport rolls take the delayed event path instead of
    /// direct assignment.  Finishes by asking the plugin to report its
    /// current values on the next cycle.
    pub fn apply(
        &self,
        instance: &mut PluginInstance,
        handle: &StateHandle,
    ) -> Result<(), HostError> {
        let record = handle.record();
        let info = instance.module().info();
        if !record.plugin_uri.is_empty() && record.plugin_uri != info.uri {
            return Err(HostError::StateLoadFailed(format!(
                "state belongs to <{}>, not <{}>",
                record.plugin_uri, info.uri
            )));
        }
        let thread_safe = info.thread_safe_restore;
        let name = info.name.clone();

        let result = if !thread_safe && instance.lifecycle() == LifecycleState::Activated
        {
            let gate = instance.pause_gate();
            if !gate.request_pause() {
                log::debug!("{name}: no processing cycle acknowledged the pause");
            }
            let result = instance.apply_record_direct(record);
            gate.resume();
            result
        } else if thread_safe && instance.transport_rolling() {
            self.apply_via_event_path(instance, record)
        } else {
            instance.apply_record_direct(record)
        };

        instance.request_state_update();
        result
    }

    fn apply_via_event_path(
        &self,
        instance: &mut PluginInstance,
        record: &StateRecord,
    ) -> Result<(), HostError> {
        for (symbol, value) in &record.ports {
            let Some(index) = instance.port_index_by_symbol(symbol) else {
                log::warn!("state references unknown port '{symbol}', skipping");
                continue;
            };
            if value.type_uri != uris::ATOM_FLOAT || value.data.len() != 4 {
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
            instance.queue_control_edit(index, v);
        }
        if let Some(custom) = &record.custom {
            instance.restore_custom(custom)?;
        }
        Ok(())
    }

    // ── presets ──

    /// Applies a module-declared preset by URI, or a `.statejson` file
    /// by path.
    pub fn apply_preset(
        &self,
        instance: &mut PluginInstance,
        uri_or_path: &str,
    ) -> Result<(), HostError> {
        let declared = instance
            .module()
            .info()
            .presets
            .iter()
            .find(|p| p.uri == uri_or_path)
            .map(|p| p.state.clone());
        if let Some(record) = declared {
            self.apply(instance, &StateHandle::Memory(record))?;
            instance.set_current_preset(Some(uri_or_path.to_string()));
            return Ok(());
        }
        let path = Path::new(uri_or_path);
        if path.extension().is_some_and(|e| e == STATE_FILE_EXT) {
            let resolved = self.mapper.absolute(path);
            if resolved.is_file() {
                let record = self.load_file(path)?;
                self.apply(instance, &StateHandle::Memory(record))?;
                instance.set_current_preset(Some(uri_or_path.to_string()));
                return Ok(());
            }
        }
        Err(HostError::PresetNotFound(uri_or_path.to_string()))
    }

    /// Module-declared presets plus user `.statejson` files from the
    /// preset directory.
    pub fn list_presets(&self, info: &ModuleInfo) -> Vec<PresetEntry> {
        let mut out: Vec<PresetEntry> = info
            .presets
            .iter()
            .map(|p| PresetEntry {
                uri: p.uri.clone(),
                label: p.label.clone(),
                bank: p.bank.clone(),
                user: false,
            })
            .collect();
        let Some(dir) = &self.preset_dir else {
            return out;
        };
        let Ok(entries) = std::fs::read_dir(dir) else {
            return out;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.extension().is_some_and(|e| e == STATE_FILE_EXT) {
                continue;
            }
            let Ok(record) = self.load_file(&path) else {
                log::warn!("unreadable preset file {}, skipping", path.display());
                continue;
            };
            // user preset files are plugin-specific
            if record.plugin_uri != info.uri {
                continue;
            }
            let label = if record.label.is_empty() {
                path.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            } else {
                record.label.clone()
            };
            out.push(PresetEntry {
                uri: path.to_string_lossy().into_owned(),
                label,
                bank: record.bank,
                user: true,
            });
        }
        out
    }

    /// Saves the current state as a user preset in the preset dir.
    pub fn save_preset(
        &self,
        instance: &mut PluginInstance,
        label: &str,
    ) -> Result<StateHandle, HostError> {
        let Some(dir) = self.preset_dir.clone() else {
            return Err(HostError::StateLoadFailed(
                "no preset directory configured".into(),
            ));
        };
        let record = self.capture(instance, label);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.{STATE_FILE_EXT}", file_stem(label)));
        let text = serde_json::to_string_pretty(&record).map_err(|e| {
            HostError::StateLoadFailed(format!("cannot serialize state: {e}"))
        })?;
        std::fs::write(&path, text)?;
        instance.set_current_preset(Some(path.to_string_lossy().into_owned()));
        Ok(StateHandle::File { path, record })
    }

    /// Deletes the currently applied preset when it is a user file.
    /// Module-declared presets are only deselected.
    pub fn delete_current_preset(
        &self,
        instance: &mut PluginInstance,
    ) -> Result<(), HostError> {
        if let Some(current) = instance.current_preset() {
            let path = self.mapper.absolute(Path::new(current));
            if path.extension().is_some_and(|e| e == STATE_FILE_EXT)
                && path.is_file()
            {
                std::fs::remove_file(&path)?;
                log::info!("deleted preset {}", path.display());
            }
        }
        instance.set_current_preset(None);
        Ok(())
    }
}

/// Filesystem-safe stem from a human label.
fn file_stem(label: &str) -> String {
    let stem: String = label
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if stem.is_empty() { "state".to_string() } else { stem }
}
