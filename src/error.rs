use std::io;

use thiserror::Error;

/// Failures surfaced from instantiate/activate/state operations.
///
/// Anything detected inside the realtime `process()` path is handled
/// locally (skip, drop, count) and never appears here.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("plugin requires unsupported feature <{0}>")]
    FeatureUnsupported(String),

    #[error("plugin instantiation failed: {0}")]
    InstantiationFailed(String),

    #[error("preset not found: {0}")]
    PresetNotFound(String),

    #[error("failed to load state: {0}")]
    StateLoadFailed(String),

    #[error("operation not valid in lifecycle state {0}")]
    InvalidLifecycle(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Returned by a plugin's work callback when it rejects a request.
/// The host logs it and moves on; no response will arrive.
#[derive(Debug, Clone, Copy, Error)]
#[error("plugin work callback failed")]
pub struct WorkError;
