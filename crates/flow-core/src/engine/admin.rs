//! Operaciones administrativas: plantillas y cancelación masiva.

use log::{info, warn};
use rayon::prelude::*;

use flow_domain::{InstanceKey, Machine, MachineDraft, MachineId, MachinePatch, Outcome};

use super::FlowEngine;
use crate::ctx::OpCtx;
use crate::errors::FlowError;
use crate::identity::IdentityResolver;
use crate::ledger::LedgerStore;
use crate::machine::{MachineFilter, MachineStore};

/// Resultado de una cancelación masiva: los fallos individuales no abortan
/// el lote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CancelReport {
    pub canceled: Vec<Outcome>,
    pub failed: Vec<(InstanceKey, FlowError)>,
}

impl CancelReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl<L, M, I> FlowEngine<L, M, I>
    where L: LedgerStore,
          M: MachineStore,
          I: IdentityResolver
{
    pub fn create_machine(&self, draft: MachineDraft) -> Result<Machine, FlowError> {
        let machine = self.machines.insert(draft)?;
        info!("machine created id={} category={} levels={}",
              machine.id,
              machine.category,
              machine.levels.len());
        Ok(machine)
    }

    /// Un patch que altera los niveles de una máquina con instancias abiertas
    /// falla con `MachineInUse`; el resto de cambios se aplica siempre.
    pub fn update_machine(&self, id: MachineId, patch: MachinePatch) -> Result<Machine, FlowError> {
        let current = self.require_machine(id)?;
        if current.patch_changes_levels(&patch) && self.ledger.open_instances_of(id)? > 0 {
            return Err(FlowError::MachineInUse(id));
        }
        let next = current.patched(patch, chrono::Utc::now())?;
        self.machines.replace(&next)?;
        info!("machine updated id={id} levels_hash={}", next.levels_hash);
        Ok(next)
    }

    /// Elimina las plantillas indicadas. Si alguna tiene instancias abiertas
    /// no se elimina ninguna.
    pub fn delete_machines(&self, ids: &[MachineId]) -> Result<usize, FlowError> {
        for id in ids {
            if self.ledger.open_instances_of(*id)? > 0 {
                return Err(FlowError::MachineInUse(*id));
            }
        }
        let removed = self.machines.delete(ids)?;
        info!("machines deleted requested={} removed={removed}", ids.len());
        Ok(removed)
    }

    pub fn get_machine(&self, id: MachineId) -> Result<Machine, FlowError> {
        self.require_machine(id)
    }

    pub fn find_machines(&self, filter: &MachineFilter) -> Result<Vec<Machine>, FlowError> {
        self.machines.find(filter)
    }

    /// Cancela todas las instancias no terminales de `category`.
    pub fn cancel_all_in_category(&self, ctx: &OpCtx, category: &str) -> Result<CancelReport, FlowError> {
        let keys: Vec<InstanceKey> = self.ledger
                                         .latest(Some(category))?
                                         .into_iter()
                                         .filter(|d| !d.is_terminal())
                                         .map(|d| d.key())
                                         .collect();
        Ok(self.cancel_keys(ctx, keys))
    }

    /// Cancela las instancias `uuids` de `category`. Claves inexistentes o
    /// ya terminales quedan en `failed`.
    pub fn cancel_by_uuids<S: AsRef<str>>(&self, ctx: &OpCtx, category: &str, uuids: &[S]) -> CancelReport {
        let keys = uuids.iter().map(|u| InstanceKey::new(category, u.as_ref())).collect();
        self.cancel_keys(ctx, keys)
    }

    fn cancel_keys(&self, ctx: &OpCtx, keys: Vec<InstanceKey>) -> CancelReport {
        let results: Vec<(InstanceKey, Result<Outcome, FlowError>)> =
            keys.into_par_iter()
                .map(|key| {
                    let res = self.cancel_as_admin(ctx, &key).map(|d| d.outcome());
                    (key, res)
                })
                .collect();
        let mut report = CancelReport::default();
        for (key, res) in results {
            match res {
                Ok(outcome) => report.canceled.push(outcome),
                Err(e) => {
                    warn!("bulk cancel failed key={key}: {e}");
                    report.failed.push((key, e));
                }
            }
        }
        info!("bulk cancel canceled={} failed={}", report.canceled.len(), report.failed.len());
        report
    }
}
