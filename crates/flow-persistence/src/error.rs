//! Errores de persistencia.
//! Mapea errores de Diesel / conexión a variantes semánticas y de ahí a la
//! taxonomía del motor.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use flow_core::FlowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("check violation: {0}")]
    CheckViolation(String),
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("not found")]
    NotFound,
    #[error("serialization conflict (retryable)")]
    SerializationConflict,
    /// Otro escritor agregó la misma revisión primero.
    #[error("revision {0} already taken")]
    RevisionConflict(u32),
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    #[error("invalid row: {0}")]
    InvalidRow(String),
    #[error("configuration: {0}")]
    Config(String),
    /// El callback de validación rechazó la transición; la transacción se
    /// revierte sin reintento.
    #[error(transparent)]
    Rejected(FlowError),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::CheckViolation => Self::CheckViolation(info.message().to_string()),
                DatabaseErrorKind::ForeignKeyViolation => Self::ForeignKeyViolation(info.message().to_string()),
                DatabaseErrorKind::SerializationFailure => Self::SerializationConflict,
                DatabaseErrorKind::ClosedConnection => Self::TransientIo(info.message().to_string()),
                other => Self::Unknown(format!("db error kind {:?}: {}", other, info.message())),
            },
            DieselError::DeserializationError(e) => Self::InvalidRow(format!("deser: {e}")),
            DieselError::SerializationError(e) => Self::InvalidRow(format!("ser: {e}")),
            DieselError::RollbackErrorOnCommit { rollback_error,
                                                 commit_error, } => {
                Self::Unknown(format!("rollback={rollback_error}; commit={commit_error}"))
            }
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            DieselError::QueryBuilderError(e) => Self::Unknown(format!("query builder: {e}")),
            other => Self::Unknown(format!("unhandled diesel error: {other:?}")),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidRow(format!("json: {err}"))
    }
}

impl From<PersistenceError> for FlowError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::Rejected(e) => e,
            PersistenceError::RevisionConflict(rev) => FlowError::StaleState(format!("revision {rev} already taken")),
            other => FlowError::Storage(other.to_string()),
        }
    }
}

/// Determina si un error es transitorio (recomendado reintentar con backoff).
///
/// Cubre conflictos de serialización, errores de IO de pool/conexión, la
/// pérdida de una carrera por revisión (el reintento relee la fila nueva) y
/// mensajes comunes de desconexión detectados por texto.
pub(crate) fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict
        | PersistenceError::TransientIo(_)
        | PersistenceError::RevisionConflict(_) => true,
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
            || m.contains("could not serialize access due to concurrent update")
            || m.contains("terminating connection due to administrator command")
            || m.contains("connection closed")
            || m.contains("connection refused")
            || m.contains("timeout")
        }
        _ => false,
    }
}
