//! Parámetros de las operaciones mutantes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use flow_domain::{Actor, InstanceKey, MachineId, RoleId, UserId};

pub type Detail = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub key: InstanceKey,
    pub machine_id: MachineId,
    pub submitter_user_id: UserId,
    pub submitter_role_id: Option<RoleId>,
    /// Sólo claves de `submitter_edit_fields`.
    pub detail: Detail,
}

impl SubmitRequest {
    pub fn new(key: InstanceKey, machine_id: MachineId, submitter_user_id: UserId) -> Self {
        Self { key,
               machine_id,
               submitter_user_id,
               submitter_role_id: None,
               detail: Detail::new() }
    }

    pub fn as_role(mut self, role: RoleId) -> Self {
        self.submitter_role_id = Some(role);
        self
    }

    pub fn field(mut self, key: impl Into<String>, val: impl Into<Value>) -> Self {
        self.detail.insert(key.into(), val.into());
        self
    }
}

/// Approve / Refuse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub key: InstanceKey,
    pub actor: Actor,
    pub opinion: Option<String>,
    /// Sólo permitido en niveles `editable`, restringido a sus `edit_fields`.
    pub detail_patch: Detail,
    pub expected_revision: Option<u32>,
}

impl VoteRequest {
    pub fn new(key: InstanceKey, actor: Actor) -> Self {
        Self { key,
               actor,
               opinion: None,
               detail_patch: Detail::new(),
               expected_revision: None }
    }

    pub fn opinion(mut self, opinion: impl Into<String>) -> Self {
        self.opinion = Some(opinion.into());
        self
    }

    pub fn patch(mut self, key: impl Into<String>, val: impl Into<Value>) -> Self {
        self.detail_patch.insert(key.into(), val.into());
        self
    }

    pub fn expect_revision(mut self, revision: u32) -> Self {
        self.expected_revision = Some(revision);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResubmitRequest {
    pub key: InstanceKey,
    pub submitter_user_id: UserId,
    pub opinion: Option<String>,
    pub detail_patch: Detail,
    pub expected_revision: Option<u32>,
}

impl ResubmitRequest {
    pub fn new(key: InstanceKey, submitter_user_id: UserId) -> Self {
        Self { key,
               submitter_user_id,
               opinion: None,
               detail_patch: Detail::new(),
               expected_revision: None }
    }

    pub fn patch(mut self, key: impl Into<String>, val: impl Into<Value>) -> Self {
        self.detail_patch.insert(key.into(), val.into());
        self
    }

    pub fn expect_revision(mut self, revision: u32) -> Self {
        self.expected_revision = Some(revision);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub key: InstanceKey,
    pub submitter_user_id: UserId,
    /// `false` devuelve la instancia a `AwaitingResubmit`.
    pub approved: bool,
    pub opinion: Option<String>,
    /// Restringido a `submitter_confirm_edit_fields`.
    pub detail_patch: Detail,
    pub expected_revision: Option<u32>,
}

impl ConfirmRequest {
    pub fn new(key: InstanceKey, submitter_user_id: UserId, approved: bool) -> Self {
        Self { key,
               submitter_user_id,
               approved,
               opinion: None,
               detail_patch: Detail::new(),
               expected_revision: None }
    }

    pub fn patch(mut self, key: impl Into<String>, val: impl Into<Value>) -> Self {
        self.detail_patch.insert(key.into(), val.into());
        self
    }

    pub fn expect_revision(mut self, revision: u32) -> Self {
        self.expected_revision = Some(revision);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub key: InstanceKey,
    pub actor: Actor,
    pub opinion: Option<String>,
    pub expected_revision: Option<u32>,
}

impl CancelRequest {
    pub fn new(key: InstanceKey, actor: Actor) -> Self {
        Self { key,
               actor,
               opinion: None,
               expected_revision: None }
    }

    pub fn opinion(mut self, opinion: impl Into<String>) -> Self {
        self.opinion = Some(opinion.into());
        self
    }
}
