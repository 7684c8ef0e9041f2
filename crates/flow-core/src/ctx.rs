//! Contexto de operación: deadline opcional del caller.
//!
//! El motor no tiene hilos propios; el deadline se verifica después de
//! validar y justo antes de confirmar la fila, de modo que una operación
//! vencida no deja rastro en el ledger.

use std::time::{Duration, Instant};

use crate::errors::FlowError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCtx {
    deadline: Option<Instant>,
}

impl OpCtx {
    /// Sin deadline.
    pub fn background() -> Self {
        Self { deadline: None }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self { deadline: Some(deadline) }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn check(&self) -> Result<(), FlowError> {
        match self.deadline {
            Some(d) if Instant::now() >= d => Err(FlowError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}
