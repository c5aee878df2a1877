use thiserror::Error;

/// Errors produced by the tracker outside the per-frame loop.
///
/// Losing the target or an undefined calibration plane are tracker states,
/// not errors.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Configuration validation failure.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unrecognized tracking or focus mode name.
    #[error("unknown mode '{0}'")]
    UnknownMode(String),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}
