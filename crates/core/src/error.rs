use crate::types::ExperimentStatus;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub type EngineResult<T> = Result<T, EngineError>;

/// Kind of entity a lookup failed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Experiment,
    Flag,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Experiment => "Experiment",
            Self::Flag => "Feature flag",
        })
    }
}

/// Every variant is a deterministic consequence of caller input or referenced
/// state. Nothing here is transient, so the engine never retries.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("Experiment {experiment_id} is not running (status: {status})")]
    NotRunning {
        experiment_id: Uuid,
        status: ExperimentStatus,
    },

    #[error("User {user_id} has no assignment in experiment {experiment_id}")]
    NotAssigned { user_id: String, experiment_id: Uuid },

    #[error("Feature flag key already exists: {0}")]
    DuplicateKey(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn experiment_not_found(id: &Uuid) -> Self {
        Self::NotFound {
            kind: EntityKind::Experiment,
            id: id.to_string(),
        }
    }

    pub fn flag_not_found(id: impl fmt::Display) -> Self {
        Self::NotFound {
            kind: EntityKind::Flag,
            id: id.to_string(),
        }
    }

    /// Stable identifier for the HTTP boundary to map onto status codes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::NotRunning { .. } => "not_running",
            Self::NotAssigned { .. } => "not_assigned",
            Self::DuplicateKey(_) => "duplicate_key",
            Self::Config(_) => "config_error",
            Self::Serialization(_) => "serialization_error",
        }
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
