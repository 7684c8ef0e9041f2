use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use flow_core::{CancelRequest, ConfirmRequest, FlowEngine, FlowError, IdentityError, IdentityResolver, InMemoryLedger,
                InMemoryMachineStore, OpCtx, ResubmitRequest, StaticDirectory, SubmitRequest, VoteRequest};
use flow_domain::{Action, Actor, Decision, FieldSet, InstanceKey, Level, MachineDraft, MachineId, RoleId, Status,
                  UserId};
use uuid::Uuid;

type Engine = FlowEngine<InMemoryLedger, InMemoryMachineStore, StaticDirectory>;

fn setup(confirm: bool) -> (Engine, MachineId) {
    let engine = FlowEngine::in_memory(StaticDirectory::new().role(4, [40, 41]).role(5, [50, 51]));
    let mut draft = MachineDraft::new("purchase", "Purchase", "buyer")
        .submitter_edit_fields(FieldSet::parse("amount,vendor"))
        .level(Level::new("L1").with_users([1, 2, 3, 4, 5, 6, 7, 8]))
        .level(Level::new("L2").with_roles([4]))
        .level(Level::new("L3").with_roles([5]));
    if confirm {
        draft = draft.confirm_required(FieldSet::new());
    }
    let machine = engine.create_machine(draft).expect("machine");
    (engine, machine.id)
}

fn fresh_key() -> InstanceKey {
    InstanceKey::new("purchase", Uuid::new_v4().to_string())
}

/// Niveles no decrecientes entre reenvíos.
fn assert_monotonic(rows: &[Decision]) {
    let mut prev = 0usize;
    for row in rows {
        if row.action == Action::Resubmit || row.action == Action::Submit {
            prev = row.level_index;
            continue;
        }
        assert!(row.level_index >= prev, "level went back at revision {}", row.revision);
        prev = row.level_index;
    }
}

#[test]
fn at_most_one_winner_under_concurrent_approvals() {
    let (engine, machine_id) = setup(false);
    let ctx = OpCtx::background();
    let key = fresh_key();
    engine.submit(&ctx, SubmitRequest::new(key.clone(), machine_id, 99)).unwrap();

    let results: Vec<Result<Decision, FlowError>> = std::thread::scope(|s| {
        let handles: Vec<_> = (1..=8u64).map(|user| {
                                             let engine = &engine;
                                             let key = key.clone();
                                             s.spawn(move || {
                                                  engine.approve(&ctx,
                                                                 VoteRequest::new(key, Actor::User(user))
                                                                     .expect_revision(0))
                                              })
                                         })
                                         .collect();
        handles.into_iter().map(|h| h.join().expect("thread")).collect()
    });

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for err in results.into_iter().filter_map(Result::err) {
        assert!(matches!(err, FlowError::StaleState(_) | FlowError::PermissionDenied(_)),
                "unexpected {err:?}");
    }
    let log = engine.find_log(&key).unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].level_index, 1);
}

#[test]
fn same_approver_advances_once_without_expectation() {
    let (engine, machine_id) = setup(false);
    let ctx = OpCtx::background();
    let key = fresh_key();
    engine.submit(&ctx, SubmitRequest::new(key.clone(), machine_id, 99)).unwrap();

    // el usuario 4 aprueba L1 por lista y L2 por el rol 4; sin revisión
    // esperada, sólo uno de sus votos puede contar en el ciclo.
    let results: Vec<Result<Decision, FlowError>> = std::thread::scope(|s| {
        let handles: Vec<_> = [Actor::User(4), Actor::Member { user: 4, role: 4 }, Actor::Member { user: 4, role: 4 }]
            .into_iter()
            .map(|actor| {
                let engine = &engine;
                let key = key.clone();
                s.spawn(move || engine.approve(&ctx, VoteRequest::new(key, actor)))
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("thread")).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.into_iter().filter_map(Result::err) {
        assert!(matches!(err, FlowError::StaleState(_)), "unexpected {err:?}");
    }
    let log = engine.find_log(&key).unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!((log[1].level_index, log[1].status), (1, Status::Pending));
    assert_monotonic(&log);
}

#[test]
fn repeated_vote_is_stale_until_the_next_cycle() {
    let (engine, machine_id) = setup(false);
    let ctx = OpCtx::background();
    let key = fresh_key();
    let member = Actor::Member { user: 4, role: 4 };
    engine.submit(&ctx, SubmitRequest::new(key.clone(), machine_id, 99)).unwrap();

    let first = engine.approve(&ctx, VoteRequest::new(key.clone(), member)).unwrap();
    assert_eq!(first.revision, 1);
    let retry = engine.approve(&ctx, VoteRequest::new(key.clone(), member)).unwrap_err();
    assert!(matches!(retry, FlowError::StaleState(_)), "unexpected {retry:?}");
    let err = engine.refuse(&ctx, VoteRequest::new(key.clone(), Actor::User(4))).unwrap_err();
    assert!(matches!(err, FlowError::StaleState(_)), "unexpected {err:?}");
    assert_eq!(engine.find_log(&key).unwrap().len(), 2);

    // otro miembro del rol sí puede decidir L2
    let refused = engine.refuse(&ctx, VoteRequest::new(key.clone(), Actor::User(40))).unwrap();
    assert_eq!(refused.status, Status::AwaitingResubmit);
    engine.resubmit(&ctx, ResubmitRequest::new(key.clone(), 99)).unwrap();

    // nuevo ciclo: el voto anterior ya no cuenta
    let again = engine.approve(&ctx, VoteRequest::new(key.clone(), member)).unwrap();
    assert_eq!((again.revision, again.level_index), (4, 1));
}

#[test]
fn resubmit_resets_to_first_level() {
    let (engine, machine_id) = setup(false);
    let ctx = OpCtx::background();
    let key = fresh_key();
    engine.submit(&ctx, SubmitRequest::new(key.clone(), machine_id, 99).field("amount", 10)).unwrap();
    engine.approve(&ctx, VoteRequest::new(key.clone(), Actor::User(1))).unwrap();
    engine.approve(&ctx, VoteRequest::new(key.clone(), Actor::User(40))).unwrap();
    let refused = engine.refuse(&ctx, VoteRequest::new(key.clone(), Actor::Role(5)).opinion("too much"))
                        .unwrap();
    assert_eq!((refused.status, refused.level_index), (Status::AwaitingResubmit, 2));

    let err = engine.resubmit(&ctx, ResubmitRequest::new(key.clone(), 100)).unwrap_err();
    assert!(matches!(err, FlowError::PermissionDenied(_)));
    let err = engine.resubmit(&ctx, ResubmitRequest::new(key.clone(), 99).patch("approver", 1))
                    .unwrap_err();
    assert!(matches!(err, FlowError::FieldNotEditable(_)));

    let d = engine.resubmit(&ctx, ResubmitRequest::new(key.clone(), 99).patch("amount", 5)).unwrap();
    assert_eq!((d.status, d.level_index), (Status::Pending, 0));
    assert_eq!(d.prev_detail["amount"], 10);
    assert_eq!(d.detail["amount"], 5);

    // el ciclo arranca de nuevo: L1 vuelve a ser necesario
    let err = engine.approve(&ctx, VoteRequest::new(key.clone(), Actor::Role(5))).unwrap_err();
    assert!(matches!(err, FlowError::PermissionDenied(_)));
    assert_monotonic(&engine.find_log(&key).unwrap());
}

#[test]
fn confirm_gating_never_skips_awaiting_confirm() {
    let (engine, machine_id) = setup(true);
    let ctx = OpCtx::background();
    for _ in 0..5 {
        let key = fresh_key();
        engine.submit(&ctx, SubmitRequest::new(key.clone(), machine_id, 99)).unwrap();
        for actor in [Actor::User(3), Actor::User(41), Actor::User(51)] {
            engine.approve(&ctx, VoteRequest::new(key.clone(), actor)).unwrap();
        }
        let log = engine.find_log(&key).unwrap();
        assert_eq!(log.last().map(|d| d.status), Some(Status::AwaitingConfirm));
        assert!(log.iter().all(|d| d.status != Status::Approved));
        let d = engine.confirm(&ctx, ConfirmRequest::new(key, 99, true)).unwrap();
        assert_eq!(d.status, Status::Approved);
    }
}

#[test]
fn cancel_by_non_submitter_always_denied() {
    let (engine, machine_id) = setup(true);
    let ctx = OpCtx::background();
    let key = fresh_key();
    engine.submit(&ctx, SubmitRequest::new(key.clone(), machine_id, 99)).unwrap();
    for stage in 0..4 {
        match stage {
            1 => {
                engine.approve(&ctx, VoteRequest::new(key.clone(), Actor::User(1))).unwrap();
            }
            2 => {
                engine.refuse(&ctx, VoteRequest::new(key.clone(), Actor::User(40))).unwrap();
            }
            3 => {
                engine.cancel(&ctx, CancelRequest::new(key.clone(), Actor::User(99))).unwrap();
            }
            _ => {}
        }
        for intruder in [Actor::User(1), Actor::Role(4), Actor::Member { user: 50, role: 5 }] {
            let err = engine.cancel(&ctx, CancelRequest::new(key.clone(), intruder)).unwrap_err();
            assert!(matches!(err, FlowError::PermissionDenied(_)), "{intruder} got {err:?}");
        }
    }
}

#[test]
fn expired_deadline_writes_nothing() {
    let (engine, machine_id) = setup(false);
    let key = fresh_key();
    engine.submit(&OpCtx::background(), SubmitRequest::new(key.clone(), machine_id, 99)).unwrap();

    let expired = OpCtx::with_deadline(Instant::now() - Duration::from_millis(5));
    let err = engine.approve(&expired, VoteRequest::new(key.clone(), Actor::User(1))).unwrap_err();
    assert_eq!(err, FlowError::DeadlineExceeded);
    let err = engine.submit(&expired, SubmitRequest::new(fresh_key(), machine_id, 99)).unwrap_err();
    assert_eq!(err, FlowError::DeadlineExceeded);
    assert_eq!(engine.find_log(&key).unwrap().len(), 1);

    let ok = OpCtx::with_timeout(Duration::from_secs(30));
    engine.approve(&ok, VoteRequest::new(key.clone(), Actor::User(1))).unwrap();
    assert_eq!(engine.find_log(&key).unwrap().len(), 2);
}

/// Directorio caído: toda resolución de roles falla.
struct Unreachable;

impl IdentityResolver for Unreachable {
    fn members(&self, _: &BTreeSet<RoleId>) -> Result<BTreeSet<UserId>, IdentityError> {
        Err(IdentityError("directory timeout".into()))
    }
}

#[test]
fn resolver_failure_aborts_the_vote() {
    let engine = FlowEngine::in_memory(Unreachable);
    let machine = engine.create_machine(MachineDraft::new("purchase", "Purchase", "buyer")
                                            .level(Level::new("L1").with_roles([4]).with_users([7])))
                        .expect("machine");
    let ctx = OpCtx::background();
    let key = fresh_key();
    engine.submit(&ctx, SubmitRequest::new(key.clone(), machine.id, 99)).unwrap();

    let err = engine.approve(&ctx, VoteRequest::new(key.clone(), Actor::User(40))).unwrap_err();
    assert_eq!(err, FlowError::IdentityResolutionFailed("directory timeout".into()));
    let err = engine.refuse(&ctx, VoteRequest::new(key.clone(), Actor::User(41))).unwrap_err();
    assert!(matches!(err, FlowError::IdentityResolutionFailed(_)));
    assert_eq!(engine.find_log(&key).unwrap().len(), 1);
}
