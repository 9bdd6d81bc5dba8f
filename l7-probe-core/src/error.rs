use thiserror::Error;

/// Errors surfaced outside the engine.
///
/// Per the spec's error-handling design, only transport failures and
/// admission-control rejections are propagated to the caller; everything
/// else (unknown protocol, invalid frame, resource exhaustion, orphan
/// frames) is handled internally and reflected in `telemetry::Metrics`.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("transport failure reading connection events: {0}")]
    Transport(String),

    #[error("tracker table exhausted: {current} trackers at cap {cap}")]
    TrackerTableFull { current: usize, cap: usize },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
