use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

/// Why a decision could not be answered directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionFailure {
    Invalid,
    Timeout,
    LowConfidence,
    Unavailable,
}

impl std::fmt::Display for DecisionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionFailure::Invalid => write!(f, "invalid response"),
            DecisionFailure::Timeout => write!(f, "timed out"),
            DecisionFailure::LowConfidence => write!(f, "confidence below threshold"),
            DecisionFailure::Unavailable => write!(f, "reasoner unavailable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Network,
    Validation,
    Permission,
    NotFound,
    Other,
}

/// Typed failure from a capability adapter.
#[derive(Debug, Clone, Error)]
#[error("{kind:?} failure in '{capability}': {message}")]
pub struct ExecutionFailure {
    pub capability: String,
    pub kind: FailureKind,
    pub message: String,
}

impl ExecutionFailure {
    pub fn new(capability: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("Decision '{id}' failed ({failure}): {detail}")]
    Decision {
        id: String,
        failure: DecisionFailure,
        detail: String,
    },

    #[error(transparent)]
    Execution(#[from] ExecutionFailure),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Module load error: {0}")]
    ModuleLoad(String),

    #[error("Stale version for session '{session}': tried {attempted}, stored {stored}")]
    StaleVersion {
        session: String,
        attempted: u64,
        stored: u64,
    },

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(String),
}

impl AgentError {
    /// Run-time decision/execution failures may be routed to an `error`
    /// event handler; everything else propagates to the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AgentError::Decision { .. } | AgentError::Execution(_))
    }

    pub fn decision(
        id: impl Into<String>,
        failure: DecisionFailure,
        detail: impl Into<String>,
    ) -> Self {
        AgentError::Decision {
            id: id.into(),
            failure,
            detail: detail.into(),
        }
    }
}

impl From<serde_yaml::Error> for AgentError {
    fn from(err: serde_yaml::Error) -> Self {
        AgentError::Yaml(err.to_string())
    }
}
