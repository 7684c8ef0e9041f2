// flow-domain library entry point
pub mod actor;
pub mod decision;
pub mod error;
pub mod fields;
pub mod hashing;
pub mod machine;
pub use actor::{Actor, Identity, RoleId, UserId};
pub use decision::{Action, Decision, InstanceKey, NewDecision, Outcome, Status};
pub use error::DomainError;
pub use fields::FieldSet;
pub use machine::{Level, Machine, MachineDraft, MachineId, MachinePatch};
