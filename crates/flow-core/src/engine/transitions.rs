//! Submit / Approve / Refuse / Resubmit / Confirm / Cancel.

use log::info;
use serde_json::{Map, Value};

use flow_domain::{Action, Actor, Decision, FieldSet, Identity, InstanceKey, Machine, NewDecision, Status};

use super::requests::{CancelRequest, ConfirmRequest, Detail, ResubmitRequest, SubmitRequest, VoteRequest};
use super::FlowEngine;
use crate::ctx::OpCtx;
use crate::errors::FlowError;
use crate::identity::IdentityResolver;
use crate::ledger::LedgerStore;
use crate::machine::MachineStore;
use crate::permission::has_acted;

/// Campos de la fila siguiente que dependen de la transición.
struct Step {
    action: Action,
    actor: Option<Actor>,
    opinion: Option<String>,
    detail: Value,
    level_index: usize,
    status: Status,
}

/// Falla si la última fila no está en `wanted`.
fn require_status(latest: &Decision, wanted: Status) -> Result<(), FlowError> {
    if latest.status == wanted {
        return Ok(());
    }
    if latest.is_terminal() {
        return Err(FlowError::AlreadyTerminal { key: latest.key(),
                                                status: latest.status });
    }
    Err(FlowError::StaleState(format!("{}: expected {wanted}, found {} at revision {}",
                                      latest.key(),
                                      latest.status,
                                      latest.revision)))
}

fn require_revision(latest: &Decision, expected: Option<u32>) -> Result<(), FlowError> {
    match expected {
        Some(rev) if rev != latest.revision => Err(FlowError::StaleState(format!("{}: expected revision {rev}, found {}",
                                                                                 latest.key(),
                                                                                 latest.revision))),
        _ => Ok(()),
    }
}

fn require_submitter(latest: &Decision, user: u64) -> Result<(), FlowError> {
    if latest.submitter_user_id == user {
        Ok(())
    } else {
        Err(FlowError::PermissionDenied(format!("user {user} is not the submitter of {}", latest.key())))
    }
}

/// Aplica `patch` sobre el detalle actual tras validar sus claves contra
/// `allowed`.
fn merge_detail(current: &Value, patch: &Detail, allowed: &FieldSet) -> Result<Value, FlowError> {
    allowed.check_keys(patch.keys().map(String::as_str))?;
    let mut merged = match current {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    for (k, v) in patch {
        merged.insert(k.clone(), v.clone());
    }
    Ok(Value::Object(merged))
}

fn follow(latest: &Decision, step: Step) -> NewDecision {
    NewDecision { category: latest.category.clone(),
                  uuid: latest.uuid.clone(),
                  revision: latest.revision + 1,
                  machine_id: latest.machine_id,
                  level_index: step.level_index,
                  actor_role_id: step.actor.and_then(|a| a.role()),
                  actor_user_id: step.actor.and_then(|a| a.user()),
                  action: step.action,
                  opinion: step.opinion,
                  prev_detail: latest.detail.clone(),
                  detail: step.detail,
                  submitter_user_id: latest.submitter_user_id,
                  submitter_role_id: latest.submitter_role_id,
                  levels_hash: latest.levels_hash.clone(),
                  status: step.status }
}

impl<L, M, I> FlowEngine<L, M, I>
    where L: LedgerStore,
          M: MachineStore,
          I: IdentityResolver
{
    /// Compare-and-append común a toda transición sobre una instancia
    /// existente. `step` corre con la última fila y el historial bloqueados;
    /// el deadline se verifica antes de confirmar.
    fn transition<F>(&self,
                     ctx: &OpCtx,
                     key: &InstanceKey,
                     expected_revision: Option<u32>,
                     mut step: F)
                     -> Result<Decision, FlowError>
        where F: FnMut(&Machine, &Decision, &[Decision]) -> Result<NewDecision, FlowError>
    {
        ctx.check()?;
        let snapshot = self.ledger
                           .last(key)?
                           .ok_or_else(|| FlowError::InstanceNotFound(key.clone()))?;
        let machine = self.require_machine(snapshot.machine_id)?;
        let decision = self.ledger.append_with(key, &mut |rows| {
                                      let latest = rows.last()
                                                       .ok_or_else(|| FlowError::InstanceNotFound(key.clone()))?;
                                      require_revision(latest, expected_revision)?;
                                      let next = step(&machine, latest, rows)?;
                                      ctx.check()?;
                                      Ok(next)
                                  })?;
        info!("transition key={key} action={} revision={} level={} status={}",
              decision.action,
              decision.revision,
              decision.level_index,
              decision.status);
        Ok(decision)
    }

    /// Crea la instancia en `Pending(0)`.
    pub fn submit(&self, ctx: &OpCtx, req: SubmitRequest) -> Result<Decision, FlowError> {
        ctx.check()?;
        let machine = self.require_machine(req.machine_id)?;
        if machine.category != req.key.category {
            return Err(FlowError::InvalidDefinition(format!("machine {} belongs to category {}, not {}",
                                                            machine.id, machine.category, req.key.category)));
        }
        let detail = merge_detail(&Value::Object(Map::new()), &req.detail, &machine.submitter_edit_fields)?;
        let key = req.key;
        let decision = self.ledger.append_with(&key, &mut |rows| {
                                      if !rows.is_empty() {
                                          return Err(FlowError::DuplicateInstance(key.clone()));
                                      }
                                      ctx.check()?;
                                      Ok(NewDecision { category: key.category.clone(),
                                                       uuid: key.uuid.clone(),
                                                       revision: 0,
                                                       machine_id: machine.id,
                                                       level_index: 0,
                                                       actor_role_id: None,
                                                       actor_user_id: None,
                                                       action: Action::Submit,
                                                       opinion: None,
                                                       prev_detail: Value::Object(Map::new()),
                                                       detail: detail.clone(),
                                                       submitter_user_id: req.submitter_user_id,
                                                       submitter_role_id: req.submitter_role_id,
                                                       levels_hash: machine.levels_hash.clone(),
                                                       status: Status::Pending })
                                  })?;
        info!("submit key={key} machine={} submitter={}", machine.id, decision.submitter_user_id);
        Ok(decision)
    }

    /// Verifica que `actor` pertenezca al nivel actual y no haya votado ya en
    /// este ciclo, y valida el patch.
    fn vote_checks(&self,
                   machine: &Machine,
                   latest: &Decision,
                   rows: &[Decision],
                   req: &VoteRequest)
                   -> Result<Value, FlowError> {
        require_status(latest, Status::Pending)?;
        let identity = Identity::from(req.actor);
        if has_acted(&identity, rows) {
            return Err(FlowError::StaleState(format!("{}: {} already voted in this cycle (revision {})",
                                                     latest.key(),
                                                     req.actor,
                                                     latest.revision)));
        }
        if !self.evaluator().is_level_approver(&identity, machine, latest.level_index)? {
            return Err(FlowError::PermissionDenied(format!("{} is not an approver of level {} on {}",
                                                           req.actor,
                                                           latest.level_index,
                                                           latest.key())));
        }
        let level = machine.level(latest.level_index)
                           .ok_or_else(|| FlowError::Storage(format!("{}: level {} out of range for machine {}",
                                                                     latest.key(),
                                                                     latest.level_index,
                                                                     machine.id)))?;
        merge_detail(&latest.detail, &req.detail_patch, &level.permitted_fields())
    }

    /// Avanza al siguiente nivel; en el último pasa a `AwaitingConfirm` o
    /// `Approved` según la máquina.
    pub fn approve(&self, ctx: &OpCtx, req: VoteRequest) -> Result<Decision, FlowError> {
        self.transition(ctx, &req.key, req.expected_revision, |machine, latest, rows| {
                let detail = self.vote_checks(machine, latest, rows, &req)?;
                let (level_index, status) = if !machine.is_last_level(latest.level_index) {
                    (latest.level_index + 1, Status::Pending)
                } else if machine.submitter_confirm_required {
                    (latest.level_index, Status::AwaitingConfirm)
                } else {
                    (latest.level_index, Status::Approved)
                };
                Ok(follow(latest,
                          Step { action: Action::Approve,
                                 actor: Some(req.actor),
                                 opinion: req.opinion.clone(),
                                 detail,
                                 level_index,
                                 status }))
            })
    }

    /// Devuelve la instancia al submitter (`AwaitingResubmit`), conservando
    /// el nivel que rechazó.
    pub fn refuse(&self, ctx: &OpCtx, req: VoteRequest) -> Result<Decision, FlowError> {
        self.transition(ctx, &req.key, req.expected_revision, |machine, latest, rows| {
                let detail = self.vote_checks(machine, latest, rows, &req)?;
                Ok(follow(latest,
                          Step { action: Action::Refuse,
                                 actor: Some(req.actor),
                                 opinion: req.opinion.clone(),
                                 detail,
                                 level_index: latest.level_index,
                                 status: Status::AwaitingResubmit }))
            })
    }

    /// Reenvío tras un rechazo: la cadena se reevalúa desde el nivel 0.
    pub fn resubmit(&self, ctx: &OpCtx, req: ResubmitRequest) -> Result<Decision, FlowError> {
        self.transition(ctx, &req.key, req.expected_revision, |machine, latest, _| {
                require_status(latest, Status::AwaitingResubmit)?;
                require_submitter(latest, req.submitter_user_id)?;
                let detail = merge_detail(&latest.detail, &req.detail_patch, &machine.submitter_edit_fields)?;
                Ok(follow(latest,
                          Step { action: Action::Resubmit,
                                 actor: Some(Actor::User(req.submitter_user_id)),
                                 opinion: req.opinion.clone(),
                                 detail,
                                 level_index: 0,
                                 status: Status::Pending }))
            })
    }

    pub fn confirm(&self, ctx: &OpCtx, req: ConfirmRequest) -> Result<Decision, FlowError> {
        self.transition(ctx, &req.key, req.expected_revision, |machine, latest, _| {
                require_status(latest, Status::AwaitingConfirm)?;
                require_submitter(latest, req.submitter_user_id)?;
                let detail = merge_detail(&latest.detail,
                                          &req.detail_patch,
                                          &machine.submitter_confirm_edit_fields)?;
                let status = if req.approved { Status::Approved } else { Status::AwaitingResubmit };
                Ok(follow(latest,
                          Step { action: Action::Confirm,
                                 actor: Some(Actor::User(req.submitter_user_id)),
                                 opinion: req.opinion.clone(),
                                 detail,
                                 level_index: latest.level_index,
                                 status }))
            })
    }

    /// Cancelación por el submitter (usuario o rol de submit). El permiso se
    /// evalúa antes que el estado: un tercero recibe `PermissionDenied` aun
    /// sobre instancias terminales.
    pub fn cancel(&self, ctx: &OpCtx, req: CancelRequest) -> Result<Decision, FlowError> {
        self.transition(ctx, &req.key, req.expected_revision, |_, latest, _| {
                if !req.actor.is_submitter(latest.submitter_user_id, latest.submitter_role_id) {
                    return Err(FlowError::PermissionDenied(format!("{} may not cancel {}",
                                                                   req.actor,
                                                                   latest.key())));
                }
                cancel_row(latest, Some(req.actor), req.opinion.clone())
            })
    }

    /// Cancelación administrativa de una instancia: sin actor ni chequeo de
    /// permisos.
    pub(super) fn cancel_as_admin(&self, ctx: &OpCtx, key: &InstanceKey) -> Result<Decision, FlowError> {
        self.transition(ctx, key, None, |_, latest, _| cancel_row(latest, None, None))
    }
}

fn cancel_row(latest: &Decision, actor: Option<Actor>, opinion: Option<String>) -> Result<NewDecision, FlowError> {
    if latest.is_terminal() {
        return Err(FlowError::AlreadyTerminal { key: latest.key(),
                                                status: latest.status });
    }
    Ok(follow(latest,
              Step { action: Action::Cancel,
                     actor,
                     opinion,
                     detail: latest.detail.clone(),
                     level_index: latest.level_index,
                     status: Status::Canceled }))
}
