//! Recorridos de referencia del motor, reutilizados por el binario de demo y
//! por los tests de integración. Funcionan sobre cualquier backend.

use flow_core::{CancelRequest, ConfirmRequest, FlowEngine, FlowError, IdentityResolver, LedgerStore, MachineStore,
                OpCtx, SubmitRequest, VoteRequest};
use flow_domain::{Actor, Decision, FieldSet, InstanceKey, Level, MachineDraft, MachineId};

/// Plantilla de tres niveles con confirmación del submitter:
/// `L1: users [4,5,6]`, `L2: roles [4] + users [8]`, `L3: roles [5]`.
pub fn leave_machine(category: &str) -> MachineDraft {
    MachineDraft::new(category, "Leave Approval", "applicant")
        .submitter_edit_fields(FieldSet::parse("name,time,type"))
        .confirm_required(FieldSet::parse("time"))
        .level(Level::new("L1").with_users([4, 5, 6]))
        .level(Level::new("L2").with_roles([4]).with_users([8]))
        .level(Level::new("L3").with_roles([5]))
}

/// Submit → approve ×3 → confirm. Devuelve las filas agregadas en orden.
pub fn approve_all_levels<L, M, I>(engine: &FlowEngine<L, M, I>,
                                   ctx: &OpCtx,
                                   machine_id: MachineId,
                                   key: &InstanceKey)
                                   -> Result<Vec<Decision>, FlowError>
    where L: LedgerStore,
          M: MachineStore,
          I: IdentityResolver
{
    let mut rows = Vec::with_capacity(5);
    rows.push(engine.submit(ctx,
                            SubmitRequest::new(key.clone(), machine_id, 123).field("name", "ana")
                                                                            .field("time", "3d"))?);
    rows.push(engine.approve(ctx, VoteRequest::new(key.clone(), Actor::User(5)).opinion("ok"))?);
    rows.push(engine.approve(ctx, VoteRequest::new(key.clone(), Actor::Role(4)))?);
    rows.push(engine.approve(ctx, VoteRequest::new(key.clone(), Actor::Role(5)))?);
    rows.push(engine.confirm(ctx, ConfirmRequest::new(key.clone(), 123, true))?);
    Ok(rows)
}

/// Submit por 234, intento de cancelación de un tercero y cancelación del
/// submitter. Devuelve el resultado del intento ajeno y la fila final.
pub fn cancel_by_submitter<L, M, I>(engine: &FlowEngine<L, M, I>,
                                    ctx: &OpCtx,
                                    machine_id: MachineId,
                                    key: &InstanceKey)
                                    -> Result<(Result<Decision, FlowError>, Decision), FlowError>
    where L: LedgerStore,
          M: MachineStore,
          I: IdentityResolver
{
    engine.submit(ctx, SubmitRequest::new(key.clone(), machine_id, 234))?;
    let denied = engine.cancel(ctx, CancelRequest::new(key.clone(), Actor::User(5)));
    let canceled = engine.cancel(ctx, CancelRequest::new(key.clone(), Actor::User(234)))?;
    Ok((denied, canceled))
}
