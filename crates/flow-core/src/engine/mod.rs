//! Motor de transiciones (`FlowEngine`).
//!
//! El motor no guarda estado propio: combina un `LedgerStore`, un
//! `MachineStore` y un `IdentityResolver`. Cada operación mutante es un
//! compare-and-append sobre la última fila de la instancia.

mod admin;
mod queries;
mod requests;
mod transitions;

pub use admin::CancelReport;
pub use queries::{DetailField, InstanceSummary};
pub use requests::{CancelRequest, ConfirmRequest, Detail, ResubmitRequest, SubmitRequest, VoteRequest};

use flow_domain::{Machine, MachineId};

use crate::errors::FlowError;
use crate::identity::IdentityResolver;
use crate::ledger::{InMemoryLedger, LedgerStore};
use crate::machine::{InMemoryMachineStore, MachineStore};
use crate::permission::PermissionEvaluator;

pub struct FlowEngine<L, M, I> {
    ledger: L,
    machines: M,
    identity: I,
}

impl<L, M, I> FlowEngine<L, M, I>
    where L: LedgerStore,
          M: MachineStore,
          I: IdentityResolver
{
    pub fn new(ledger: L, machines: M, identity: I) -> Self {
        Self { ledger,
               machines,
               identity }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn machines(&self) -> &M {
        &self.machines
    }

    fn evaluator(&self) -> PermissionEvaluator<'_, I> {
        PermissionEvaluator::new(&self.identity)
    }

    fn require_machine(&self, id: MachineId) -> Result<Machine, FlowError> {
        self.machines.get(id)?.ok_or(FlowError::UnknownMachine(id))
    }
}

impl<I: IdentityResolver> FlowEngine<InMemoryLedger, InMemoryMachineStore, I> {
    /// Motor sobre almacenamiento en memoria (tests, demo).
    pub fn in_memory(identity: I) -> Self {
        Self::new(InMemoryLedger::new(), InMemoryMachineStore::new(), identity)
    }
}
