use approvalflow::scenarios::{approve_all_levels, cancel_by_submitter, leave_machine};
use flow_core::{FlowEngine, FlowError, OpCtx, StaticDirectory};
use flow_domain::{Action, Identity, InstanceKey, Status};

fn engine() -> FlowEngine<flow_core::InMemoryLedger, flow_core::InMemoryMachineStore, StaticDirectory> {
    FlowEngine::in_memory(StaticDirectory::new().role(4, [40]).role(5, [50]))
}

#[test]
fn leave_request_walks_every_level() {
    let engine = engine();
    let machine = engine.create_machine(leave_machine("leave")).unwrap();
    let key = InstanceKey::new("leave", "log1");
    let rows = approve_all_levels(&engine, &OpCtx::background(), machine.id, &key).unwrap();

    let shape: Vec<_> = rows.iter().map(|r| (r.action, r.status)).collect();
    assert_eq!(shape,
               vec![(Action::Submit, Status::Pending),
                    (Action::Approve, Status::Pending),
                    (Action::Approve, Status::Pending),
                    (Action::Approve, Status::AwaitingConfirm),
                    (Action::Confirm, Status::Approved)]);
    assert_eq!(rows.iter().map(|r| r.revision).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    assert_eq!(engine.find_log(&key).unwrap().len(), 5);

    let track = engine.find_track(&key, &Identity::user(123)).unwrap();
    assert_eq!(track.len(), 5);
    assert!(track.last().unwrap().end);
}

#[test]
fn only_the_submitter_cancels() {
    let engine = engine();
    let machine = engine.create_machine(leave_machine("leave")).unwrap();
    let key = InstanceKey::new("leave", "log2");
    let (denied, canceled) = cancel_by_submitter(&engine, &OpCtx::background(), machine.id, &key).unwrap();

    assert!(matches!(denied, Err(FlowError::PermissionDenied(_))), "{denied:?}");
    assert_eq!(canceled.status, Status::Canceled);
    assert_eq!(canceled.actor_user_id, Some(234));
    assert_eq!(engine.find_log(&key).unwrap().len(), 2);
}
