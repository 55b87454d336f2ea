//! Error types for pipeline construction and per-frame processing
//!
//! Initialization errors are fatal: the pipeline refuses to come up rather
//! than run partially configured. Per-frame errors abort the current frame
//! and leave the pipeline ready for the next one.

use thiserror::Error;

/// Errors produced by the camera perception pipeline.
#[derive(Error, Debug)]
pub enum PerceptionError {
    /// The configuration tree is missing a required block or carries an
    /// invalid value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configured plugin name has no registered factory.
    #[error("No {kind} plugin registered under '{name}'")]
    PluginNotFound { kind: &'static str, name: String },

    /// A configured sensor could not be resolved to a camera model.
    #[error("Camera model error: {0}")]
    CameraModel(String),

    /// A stage was created but refused its init options.
    #[error("Failed to initialize {stage} '{name}': {reason}")]
    StageInit {
        stage: &'static str,
        name: String,
        reason: String,
    },

    /// A frame named a sensor the pipeline was not configured for.
    #[error("Unknown sensor '{0}'")]
    UnknownSensor(String),

    /// A frame arrived without a calibration service reference.
    #[error("Frame carries no calibration service")]
    MissingCalibrationService,

    /// A stage failed while processing a frame.
    #[error("{stage} failed: {reason}")]
    Stage {
        stage: &'static str,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] drishti_core::Error),
}

impl PerceptionError {
    /// Shorthand for per-frame stage failures.
    pub fn stage(stage: &'static str, reason: impl Into<String>) -> Self {
        PerceptionError::Stage {
            stage,
            reason: reason.into(),
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PerceptionError>;
