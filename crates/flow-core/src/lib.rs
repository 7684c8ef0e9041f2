//! flow-core: motor de aprobaciones multinivel sobre un ledger append-only.
pub mod constants;
pub mod ctx;
pub mod engine;
pub mod errors;
pub mod identity;
pub mod ledger;
pub mod machine;
pub mod permission;
pub mod track;

pub use ctx::OpCtx;
pub use engine::{CancelReport, CancelRequest, ConfirmRequest, Detail, DetailField, FlowEngine, InstanceSummary,
                 ResubmitRequest, SubmitRequest, VoteRequest};
pub use errors::FlowError;
pub use identity::{IdentityError, IdentityResolver, StaticDirectory};
pub use ledger::{check_chain, Decide, InMemoryLedger, LedgerStore};
pub use machine::{InMemoryMachineStore, MachineFilter, MachineStore};
pub use permission::{has_acted, EffectiveApprovers, PermissionEvaluator};
pub use track::{build_track, TrackEntry};
