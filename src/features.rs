//! Feature and option negotiation.
//!
//! The host advertises a fixed, versioned set of feature URIs.  A
//! plugin listing a *required* feature outside this set fails
//! instantiation; unsupported *optional* features are logged and
//! ignored.  The options block carries engine numbers the plugin may
//! display but must not change behavior on.

use std::path::PathBuf;

use crate::config::HostConfig;
use crate::error::HostError;
use crate::module::ModuleInfo;
use crate::worker::WorkScheduler;

pub mod uris {
    pub const URID_MAP: &str = "http://lv2plug.in/ns/ext/urid#map";
    pub const URID_UNMAP: &str = "http://lv2plug.in/ns/ext/urid#unmap";
    pub const WORKER_SCHEDULE: &str = "http://lv2plug.in/ns/ext/worker#schedule";
    pub const STATE_MAKE_PATH: &str = "http://lv2plug.in/ns/ext/state#makePath";
    pub const LOG_LOG: &str = "http://lv2plug.in/ns/ext/log#log";
    pub const OPTIONS_OPTIONS: &str = "http://lv2plug.in/ns/ext/options#options";
    pub const THREAD_SAFE_RESTORE: &str =
        "http://lv2plug.in/ns/ext/state#threadSafeRestore";
    pub const LOAD_DEFAULT_STATE: &str =
        "http://lv2plug.in/ns/ext/state#loadDefaultState";
    pub const HARD_RT_CAPABLE: &str = "http://lv2plug.in/ns/lv2core#hardRTCapable";
    pub const DATA_ACCESS: &str = "http://lv2plug.in/ns/ext/data-access";
    pub const INSTANCE_ACCESS: &str = "http://lv2plug.in/ns/ext/instance-access";
    pub const BOUNDED_BLOCK_LENGTH: &str =
        "http://lv2plug.in/ns/ext/buf-size#boundedBlockLength";
    /// Accepted as required without carrying data.
    pub const IS_LIVE: &str = "http://lv2plug.in/ns/lv2core#isLive";
}

/// Everything the host always offers.
pub const SUPPORTED_FEATURES: &[&str] = &[
    uris::URID_MAP,
    uris::URID_UNMAP,
    uris::WORKER_SCHEDULE,
    uris::STATE_MAKE_PATH,
    uris::LOG_LOG,
    uris::OPTIONS_OPTIONS,
    uris::THREAD_SAFE_RESTORE,
    uris::LOAD_DEFAULT_STATE,
    uris::HARD_RT_CAPABLE,
    uris::DATA_ACCESS,
    uris::INSTANCE_ACCESS,
    uris::BOUNDED_BLOCK_LENGTH,
    uris::IS_LIVE,
];

pub fn is_supported(uri: &str) -> bool {
    SUPPORTED_FEATURES.contains(&uri)
}

/// Engine numbers and host identification handed to the plugin.
#[derive(Debug, Clone)]
pub struct HostOptions {
    pub sample_rate: f64,
    pub min_block_length: u32,
    pub max_block_length: u32,
    pub nominal_block_length: u32,
    pub event_buffer_size: u32,
    pub ui_update_hz: f32,
    pub ui_scale_factor: f32,
    pub host_name: String,
    pub host_version: String,
}

impl HostOptions {
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            min_block_length: config.min_block_length,
            max_block_length: config.max_block_length,
            nominal_block_length: config.nominal_block_length,
            event_buffer_size: config.event_buffer_size,
            ui_update_hz: config.ui_update_hz,
            ui_scale_factor: config.ui_scale_factor,
            host_name: config.host_name.clone(),
            host_version: config.host_version.clone(),
        }
    }
}

/// The outcome of negotiation, passed to `PluginModule::instantiate`.
pub struct NegotiatedFeatures {
    /// Accepted feature URIs (the full advertised set).
    pub features: Vec<String>,
    pub options: HostOptions,
    /// Schedule endpoint for background work, when the plugin declares
    /// the work capability.
    pub worker: Option<WorkScheduler>,
    /// Schedule endpoint used during state restore; always synchronous.
    pub state_worker: Option<WorkScheduler>,
    /// Instance-private directory for plugin temp files (make-path).
    pub temp_dir: Option<PathBuf>,
}

impl NegotiatedFeatures {
    pub fn supports(&self, uri: &str) -> bool {
        self.features.iter().any(|f| f == uri)
    }
}

/// Checks the plugin's declared requirements against the advertised
/// set.  The worker/temp-dir slots are filled in by the instance
/// before instantiation.
pub fn negotiate(
    info: &ModuleInfo,
    config: &HostConfig,
) -> Result<NegotiatedFeatures, HostError> {
    for uri in &info.required_features {
        if !is_supported(uri) {
            return Err(HostError::FeatureUnsupported(uri.clone()));
        }
    }
    for uri in &info.optional_features {
        if !is_supported(uri) {
            log::info!(
                "{}: optional feature <{}> not supported, ignoring",
                info.name,
                uri
            );
        }
    }
    Ok(NegotiatedFeatures {
        features: SUPPORTED_FEATURES.iter().map(|s| s.to_string()).collect(),
        options: HostOptions::from_config(config),
        worker: None,
        state_worker: None,
        temp_dir: None,
    })
}
