use serde::{Deserialize, Serialize};

/// Host-side configuration shared by every plugin instance.
///
/// The numeric fields are also communicated to plugins through the
/// options block at instantiation time; plugins may display the host
/// name/version but must not change behavior based on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub sample_rate: f64,
    pub min_block_length: u32,
    pub max_block_length: u32,
    /// Block length used when allocating audio/CV buffers.
    pub nominal_block_length: u32,
    /// Minimum capacity in bytes for event-port buffers.
    pub event_buffer_size: u32,
    pub ui_update_hz: f32,
    pub ui_scale_factor: f32,
    pub host_name: String,
    pub host_version: String,
    /// True while exporting/bouncing.  Workers run inline and
    /// freewheel-flagged control inputs are forced to their maximum.
    pub freewheeling: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            min_block_length: 1,
            max_block_length: 8192,
            nominal_block_length: 256,
            event_buffer_size: 4096,
            ui_update_hz: 30.0,
            ui_scale_factor: 1.0,
            host_name: "plugdock".to_string(),
            host_version: env!("CARGO_PKG_VERSION").to_string(),
            freewheeling: false,
        }
    }
}
