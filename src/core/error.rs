//! Evaluation errors
//!
//! Failures are recorded on the entity that owns them (environment, thread
//! pool, block, topology) and reported as part of that entity's status; they
//! are never thrown past the orchestrator.

/// Evaluation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// An environment or thread pool the entity depends on is not ready
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// The runtime rejected the creation of a remote object
    #[error("Construction failed: {0}")]
    ConstructionFailed(String),

    /// A single property update was rejected; the block stays usable
    #[error("Property '{name}' rejected: {reason}")]
    PropertyRejected { name: String, reason: String },

    /// The runtime rejected wiring a connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Partial or total failure to activate the topology
    #[error("Activation failed: {0}")]
    ActivationFailed(String),

    /// Engine configuration could not be parsed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The evaluation service is no longer running
    #[error("Evaluation service stopped")]
    Stopped,
}

impl EvalError {
    /// Build a `ConstructionFailed` from an opaque remote error
    pub(crate) fn construction(what: impl std::fmt::Display, err: &anyhow::Error) -> Self {
        EvalError::ConstructionFailed(format!("{}: {:#}", what, err))
    }

    /// Does this error leave its entity without a live remote object?
    pub fn is_fatal(&self) -> bool {
        !matches!(self, EvalError::PropertyRejected { .. })
    }
}

impl From<serde_json::Error> for EvalError {
    fn from(error: serde_json::Error) -> Self {
        EvalError::InvalidConfig(error.to_string())
    }
}
