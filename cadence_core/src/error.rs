use thiserror::Error;

/// Errors produced by the sequencing core.
///
/// Fatal variants abort the whole run; `PrivilegeDenied` is advisory
/// and callers are expected to log it and continue under best-effort
/// scheduling.
#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("resource initialization failed: {0}")]
    ResourceInit(String),

    #[error("real-time scheduling privilege denied: {0}")]
    PrivilegeDenied(String),

    #[error("periodic timer unrecoverable after {retries} interrupted sleeps")]
    TimerUnrecoverable { retries: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported on this platform: {0}")]
    Unsupported(String),
}

/// Result type for cadence operations
pub type CadenceResult<T> = Result<T, CadenceError>;
