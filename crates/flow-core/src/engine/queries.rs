//! Consultas de lectura: bandejas, log, historial y chequeos de permiso.
//!
//! Las consultas leen snapshots del ledger sin tomar locks.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use flow_domain::{Decision, Identity, InstanceKey, Machine, MachineId, RoleId, Status, UserId};

use super::FlowEngine;
use crate::constants::UNKNOWN_LEVEL;
use crate::errors::FlowError;
use crate::identity::IdentityResolver;
use crate::ledger::LedgerStore;
use crate::machine::MachineStore;
use crate::permission::{has_acted, EffectiveApprovers};
use crate::track::{build_track, TrackEntry};

/// Fila de bandeja: el estado actual de una instancia más quién puede
/// actuar sobre ella.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub key: InstanceKey,
    pub machine_id: MachineId,
    pub revision: u32,
    pub level_index: usize,
    pub level_name: String,
    pub status: Status,
    pub submitter_user_id: UserId,
    pub submitter_role_id: Option<RoleId>,
    pub can_approval_roles: Vec<RoleId>,
    pub can_approval_users: Vec<UserId>,
    pub prev_detail: Value,
    pub detail: Value,
    pub confirm: bool,
    pub resubmit: bool,
    pub updated_at: DateTime<Utc>,
}

impl InstanceSummary {
    fn new(machine: Option<&Machine>, latest: Decision, approvers: EffectiveApprovers) -> Self {
        let level_name = machine.filter(|m| m.levels_hash == latest.levels_hash)
                                .and_then(|m| m.level(latest.level_index))
                                .map(|l| l.name.clone())
                                .unwrap_or_else(|| UNKNOWN_LEVEL.to_string());
        Self { key: latest.key(),
               machine_id: latest.machine_id,
               revision: latest.revision,
               level_index: latest.level_index,
               level_name,
               status: latest.status,
               submitter_user_id: latest.submitter_user_id,
               submitter_role_id: latest.submitter_role_id,
               can_approval_roles: approvers.roles.into_iter().collect(),
               can_approval_users: approvers.users.into_iter().collect(),
               confirm: latest.status == Status::AwaitingConfirm,
               resubmit: latest.status == Status::AwaitingResubmit,
               updated_at: latest.created_at,
               prev_detail: latest.prev_detail,
               detail: latest.detail }
    }
}

/// Par clave/valor del detalle del submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailField {
    pub key: String,
    pub val: Value,
}

impl<L, M, I> FlowEngine<L, M, I>
    where L: LedgerStore,
          M: MachineStore,
          I: IdentityResolver
{
    /// Máquinas leídas una sola vez por consulta.
    fn machine_cache(&self, rows: &[Decision]) -> Result<HashMap<MachineId, Machine>, FlowError> {
        let mut cache = HashMap::new();
        for row in rows {
            if !cache.contains_key(&row.machine_id) {
                if let Some(m) = self.machines.get(row.machine_id)? {
                    cache.insert(row.machine_id, m);
                }
            }
        }
        Ok(cache)
    }

    /// Instancias `Pending` cuyo nivel actual admite a `identity`.
    pub fn find_pending_by_approver(&self,
                                    identity: &Identity,
                                    category: Option<&str>)
                                    -> Result<Vec<InstanceSummary>, FlowError> {
        let pending: Vec<Decision> = self.ledger
                                         .latest(category)?
                                         .into_iter()
                                         .filter(|d| d.status == Status::Pending)
                                         .collect();
        let machines = self.machine_cache(&pending)?;
        let eval = self.evaluator();
        let mut out = Vec::new();
        for row in pending {
            let Some(machine) = machines.get(&row.machine_id) else {
                continue;
            };
            let Some(level) = machine.level(row.level_index) else {
                continue;
            };
            let approvers = eval.effective_approvers(level)?;
            if approvers.admits(identity) {
                out.push(InstanceSummary::new(Some(machine), row, approvers));
            }
        }
        Ok(out)
    }

    /// Bandeja del submitter: instancias esperando su confirmación o reenvío.
    pub fn find_awaiting_submitter(&self,
                                   user: UserId,
                                   category: Option<&str>)
                                   -> Result<Vec<InstanceSummary>, FlowError> {
        let waiting: Vec<Decision> = self.ledger
                                         .latest(category)?
                                         .into_iter()
                                         .filter(|d| d.status.awaits_submitter() && d.submitter_user_id == user)
                                         .collect();
        let machines = self.machine_cache(&waiting)?;
        Ok(waiting.into_iter()
                  .map(|row| {
                      let approvers = EffectiveApprovers { users: [user].into_iter().collect(),
                                                           roles: Default::default() };
                      InstanceSummary::new(machines.get(&row.machine_id), row, approvers)
                  })
                  .collect())
    }

    /// Filas crudas de la instancia en orden ascendente.
    pub fn find_log(&self, key: &InstanceKey) -> Result<Vec<Decision>, FlowError> {
        self.ledger.list(key)
    }

    /// Historial legible; la última entrada indica si `viewer` puede actuar.
    pub fn find_track(&self, key: &InstanceKey, viewer: &Identity) -> Result<Vec<TrackEntry>, FlowError> {
        let rows = self.ledger.list(key)?;
        let Some(last) = rows.last() else {
            return Ok(Vec::new());
        };
        let machine = self.machines.get(last.machine_id)?;
        let can_act = match &machine {
            Some(m) => self.evaluator().can_act(viewer, m, last)?,
            None => false,
        };
        Ok(build_track(machine.as_ref(), &rows, can_act))
    }

    /// ¿Puede `identity` ver el log? El submitter, cualquier aprobador
    /// configurado en la máquina y quien ya haya votado en la instancia.
    pub fn check_log_permission(&self, identity: &Identity, key: &InstanceKey) -> Result<bool, FlowError> {
        let rows = self.ledger.list(key)?;
        let Some(last) = rows.last() else {
            return Ok(false);
        };
        if identity.user == Some(last.submitter_user_id) {
            return Ok(true);
        }
        let voted = rows.iter()
                        .filter(|d| d.action.is_level_vote())
                        .filter_map(Decision::actor)
                        .any(|a| identity.credits(&a));
        if voted {
            return Ok(true);
        }
        let Some(machine) = self.machines.get(last.machine_id)? else {
            return Ok(false);
        };
        let eval = self.evaluator();
        for level in &machine.levels {
            if eval.effective_approvers(level)?.admits(identity) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// true si `identity` ya votó en el ciclo actual de la instancia.
    pub fn has_acted(&self, identity: &Identity, key: &InstanceKey) -> Result<bool, FlowError> {
        Ok(has_acted(identity, &self.ledger.list(key)?))
    }

    /// Verifica que `identity` pueda editar `fields` en el estado actual:
    /// aprobador del nivel (campos del nivel editable) o submitter (campos de
    /// reenvío o de confirmación).
    pub fn check_edit_permission<'a, F>(&self, identity: &Identity, key: &InstanceKey, fields: F) -> Result<(), FlowError>
        where F: IntoIterator<Item = &'a str>
    {
        let latest = self.ledger
                         .last(key)?
                         .ok_or_else(|| FlowError::InstanceNotFound(key.clone()))?;
        let machine = self.require_machine(latest.machine_id)?;
        let allowed = match latest.status {
            Status::Pending => {
                if !self.evaluator().is_level_approver(identity, &machine, latest.level_index)? {
                    return Err(FlowError::PermissionDenied(format!("not an approver of level {} on {key}",
                                                                   latest.level_index)));
                }
                machine.level(latest.level_index)
                       .map(|l| l.permitted_fields())
                       .unwrap_or_default()
            }
            Status::AwaitingResubmit | Status::AwaitingConfirm => {
                if identity.user != Some(latest.submitter_user_id) {
                    return Err(FlowError::PermissionDenied(format!("only the submitter may edit {key}")));
                }
                if latest.status == Status::AwaitingResubmit {
                    machine.submitter_edit_fields.clone()
                } else {
                    machine.submitter_confirm_edit_fields.clone()
                }
            }
            status => return Err(FlowError::AlreadyTerminal { key: key.clone(), status }),
        };
        allowed.check_keys(fields)?;
        Ok(())
    }

    /// Detalle actual proyectado sobre `submitter_edit_fields`, en el orden
    /// declarado en la máquina. Campos ausentes valen `null`.
    pub fn submitter_detail(&self, key: &InstanceKey) -> Result<Vec<DetailField>, FlowError> {
        let latest = self.ledger
                         .last(key)?
                         .ok_or_else(|| FlowError::InstanceNotFound(key.clone()))?;
        let machine = self.require_machine(latest.machine_id)?;
        Ok(machine.submitter_edit_fields
                  .iter()
                  .map(|f| DetailField { key: f.to_string(),
                                         val: latest.detail.get(f).cloned().unwrap_or(Value::Null) })
                  .collect())
    }
}
