use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("capability probe failed: {0}")]
    ProbeFailed(String),

    #[error("model load failed: {0}")]
    LoadFailed(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("malformed worker message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("a generation is already in progress")]
    GenerationInProgress,

    #[error("a worker is already attached to this session")]
    WorkerAlreadyAttached,

    #[error("no worker attached")]
    NoWorker,

    #[error("worker channel closed")]
    WorkerClosed,

    #[error("configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// Protocol violations come from the untrusted worker side and are dropped
    /// rather than surfaced.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, SessionError::ProtocolViolation(_) | SessionError::Decode(_))
    }
}
