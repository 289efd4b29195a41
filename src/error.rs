use thiserror::Error;

/// Why a downstream agent call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationCause {
    /// The call did not finish within the configured timeout.
    Timeout,
    /// The agent refused the payload (wrong shape, missing fields, bad response).
    RejectedInput(String),
    /// Network or provider-side failure.
    Transport(String),
}

impl InvocationCause {
    /// Transient failures are worth another attempt; rejected input is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, InvocationCause::Timeout | InvocationCause::Transport(_))
    }
}

impl std::fmt::Display for InvocationCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvocationCause::Timeout => write!(f, "timed out"),
            InvocationCause::RejectedInput(msg) => write!(f, "rejected input: {}", msg),
            InvocationCause::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

#[derive(Error, Debug)]
pub enum ScoutError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Agent '{0}' is already registered")]
    DuplicateName(String),

    #[error("Agent '{0}' is inactive")]
    Inactive(String),

    #[error("Unsupported agent type: {0}")]
    UnsupportedAgentType(String),

    #[error("Agent '{agent_name}' failed: {cause}")]
    AgentInvocationFailed {
        agent_name: String,
        cause: InvocationCause,
    },

    #[error("Invalid schedule state: {0}")]
    InvalidScheduleState(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScoutError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        ScoutError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScoutError>;
