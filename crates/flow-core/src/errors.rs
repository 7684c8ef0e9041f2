//! Taxonomía de errores del motor de aprobaciones.
//!
//! Todos los errores de validación y permiso se detectan antes de escribir;
//! `StaleState`, `DeadlineExceeded` y `Storage` implican rollback de la
//! transacción en curso y el caller puede reintentar la misma petición.

use flow_domain::{DomainError, InstanceKey, MachineId, Status};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),
    #[error("unknown machine: {0}")]
    UnknownMachine(MachineId),
    #[error("duplicate instance: {0}")]
    DuplicateInstance(InstanceKey),
    #[error("instance not found: {0}")]
    InstanceNotFound(InstanceKey),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("fields not editable: {}", .0.join(","))]
    FieldNotEditable(Vec<String>),
    #[error("stale state: {0}")]
    StaleState(String),
    #[error("instance {key} already terminal ({status})")]
    AlreadyTerminal { key: InstanceKey, status: Status },
    #[error("identity resolution failed: {0}")]
    IdentityResolutionFailed(String),
    #[error("machine {0} has non-terminal instances")]
    MachineInUse(MachineId),
    #[error("deadline exceeded before commit")]
    DeadlineExceeded,
    #[error("storage: {0}")]
    Storage(String),
}

impl FlowError {
    /// Errores tras los cuales reintentar la misma petición tiene sentido.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FlowError::StaleState(_) | FlowError::Storage(_) | FlowError::DeadlineExceeded)
    }
}

impl From<DomainError> for FlowError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::InvalidDefinition(msg) => FlowError::InvalidDefinition(msg),
            DomainError::FieldNotEditable(fields) => FlowError::FieldNotEditable(fields),
            other @ DomainError::UnknownVariant { .. } => FlowError::Storage(other.to_string()),
        }
    }
}
