use thiserror::Error;

/// Main error type for the orchestration core
#[derive(Error, Debug)]
pub enum MarshalError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Admission errors
    #[error("Admission denied: {}", .0.join("; "))]
    AdmissionDenied(Vec<String>),

    #[error("Circuit breaker open: {reason} ({remaining_secs}s until cooldown elapses)")]
    CircuitOpen { reason: String, remaining_secs: u64 },

    // Consensus errors
    #[error("Consensus rejected: {0}")]
    ConsensusRejected(String),

    #[error("No consensus proposal for execution {0}")]
    ProposalNotFound(uuid::Uuid),

    // Delegation errors
    #[error("Delegation to {agent_kind} failed: {reason}")]
    DelegationFailed { agent_kind: String, reason: String },

    #[error("No agent registered for kind: {0}")]
    AgentUnavailable(String),

    // Attestation errors
    #[error("Attestation failed: {0}")]
    AttestationFailed(String),

    // Market data errors
    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for MarshalError
pub type Result<T> = std::result::Result<T, MarshalError>;

/// Specific error types for agent task execution
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    #[error("Agent {agent_id} is busy")]
    AgentBusy { agent_id: String },

    #[error("Unsupported task action: {action}")]
    UnsupportedAction { action: String },

    #[error("Missing task parameter: {name}")]
    MissingParameter { name: String },

    #[error("Handler failure: {0}")]
    Handler(String),
}

impl From<TaskError> for MarshalError {
    fn from(err: TaskError) -> Self {
        MarshalError::Internal(err.to_string())
    }
}
