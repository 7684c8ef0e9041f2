//! Filas del ledger (`Decision`) y los enums de acción/estado.
//!
//! Rol en el flujo:
//! - Cada transición de una instancia agrega exactamente una `Decision`.
//! - La fila con mayor `revision` de una `InstanceKey` es la autoridad sobre
//!   el estado y el nivel actuales; no existe fila "instancia" aparte.
//! - `prev_detail`/`detail` son snapshots JSON de los campos del submitter
//!   antes y después de la fila.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::{Actor, DomainError, MachineId, RoleId, UserId};

/// Clave de una instancia: `(category, uuid)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub category: String,
    pub uuid: String,
}

impl InstanceKey {
    pub fn new(category: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self { category: category.into(),
               uuid: uuid.into() }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.uuid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Submit,
    Approve,
    Refuse,
    Resubmit,
    Confirm,
    Cancel,
}

impl Action {
    /// Representación estable usada en la columna `action`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Submit => "submit",
            Action::Approve => "approve",
            Action::Refuse => "refuse",
            Action::Resubmit => "resubmit",
            Action::Confirm => "confirm",
            Action::Cancel => "cancel",
        }
    }

    /// Acciones que un aprobador de nivel puede registrar.
    pub fn is_level_vote(&self) -> bool {
        matches!(self, Action::Approve | Action::Refuse)
    }
}

impl FromStr for Action {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submit" => Ok(Action::Submit),
            "approve" => Ok(Action::Approve),
            "refuse" => Ok(Action::Refuse),
            "resubmit" => Ok(Action::Resubmit),
            "confirm" => Ok(Action::Confirm),
            "cancel" => Ok(Action::Cancel),
            other => Err(DomainError::UnknownVariant { kind: "action",
                                                       value: other.to_string() }),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estado de la instancia tras aplicar una fila.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    AwaitingResubmit,
    AwaitingConfirm,
    Approved,
    /// Rechazo sin posibilidad de reenvío. Ningún flujo actual lo produce,
    /// pero se trata como terminal si aparece en el ledger.
    RefusedTerminal,
    Canceled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::AwaitingResubmit => "awaiting_resubmit",
            Status::AwaitingConfirm => "awaiting_confirm",
            Status::Approved => "approved",
            Status::RefusedTerminal => "refused_terminal",
            Status::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Approved | Status::RefusedTerminal | Status::Canceled)
    }

    /// Estados en los que el siguiente paso corresponde al submitter.
    pub fn awaits_submitter(&self) -> bool {
        matches!(self, Status::AwaitingResubmit | Status::AwaitingConfirm)
    }
}

impl FromStr for Status {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "awaiting_resubmit" => Ok(Status::AwaitingResubmit),
            "awaiting_confirm" => Ok(Status::AwaitingConfirm),
            "approved" => Ok(Status::Approved),
            "refused_terminal" => Ok(Status::RefusedTerminal),
            "canceled" => Ok(Status::Canceled),
            other => Err(DomainError::UnknownVariant { kind: "status",
                                                       value: other.to_string() }),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fila a agregar; el ledger asigna `id` y `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDecision {
    pub category: String,
    pub uuid: String,
    /// Posición dentro de la instancia (0 para el submit). Única por clave.
    pub revision: u32,
    pub machine_id: MachineId,
    /// Nivel en el que queda la instancia tras esta fila.
    pub level_index: usize,
    pub actor_role_id: Option<RoleId>,
    pub actor_user_id: Option<UserId>,
    pub action: Action,
    pub opinion: Option<String>,
    pub prev_detail: Value,
    pub detail: Value,
    pub submitter_user_id: UserId,
    pub submitter_role_id: Option<RoleId>,
    /// `levels_hash` de la máquina al momento del submit.
    #[serde(default)]
    pub levels_hash: String,
    pub status: Status,
}

impl NewDecision {
    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.category.clone(), self.uuid.clone())
    }

    pub fn into_decision(self, id: i64, created_at: DateTime<Utc>) -> Decision {
        Decision { id,
                   category: self.category,
                   uuid: self.uuid,
                   revision: self.revision,
                   machine_id: self.machine_id,
                   level_index: self.level_index,
                   actor_role_id: self.actor_role_id,
                   actor_user_id: self.actor_user_id,
                   action: self.action,
                   opinion: self.opinion,
                   prev_detail: self.prev_detail,
                   detail: self.detail,
                   submitter_user_id: self.submitter_user_id,
                   submitter_role_id: self.submitter_role_id,
                   levels_hash: self.levels_hash,
                   status: self.status,
                   created_at }
    }
}

/// Fila persistida del ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: i64,
    pub category: String,
    pub uuid: String,
    pub revision: u32,
    pub machine_id: MachineId,
    pub level_index: usize,
    pub actor_role_id: Option<RoleId>,
    pub actor_user_id: Option<UserId>,
    pub action: Action,
    pub opinion: Option<String>,
    pub prev_detail: Value,
    pub detail: Value,
    pub submitter_user_id: UserId,
    pub submitter_role_id: Option<RoleId>,
    #[serde(default)]
    pub levels_hash: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
}

impl Decision {
    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.category.clone(), self.uuid.clone())
    }

    pub fn actor(&self) -> Option<Actor> {
        Actor::from_parts(self.actor_user_id, self.actor_role_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Resumen de estado de la instancia tras esta fila.
    pub fn outcome(&self) -> Outcome {
        Outcome { key: self.key(),
                  status: self.status,
                  level_index: self.level_index,
                  revision: self.revision,
                  end: self.status.is_terminal(),
                  confirm: self.status == Status::AwaitingConfirm,
                  resubmit: self.status == Status::AwaitingResubmit,
                  cancel: self.status == Status::Canceled }
    }
}

/// Snapshot devuelto por cada operación mutante.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub key: InstanceKey,
    pub status: Status,
    pub level_index: usize,
    pub revision: u32,
    pub end: bool,
    pub confirm: bool,
    pub resubmit: bool,
    pub cancel: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(status: Status) -> Decision {
        NewDecision { category: "leave".into(),
                      uuid: "u1".into(),
                      revision: 3,
                      machine_id: 1,
                      level_index: 2,
                      actor_role_id: Some(5),
                      actor_user_id: None,
                      action: Action::Approve,
                      opinion: Some("ok".into()),
                      prev_detail: json!({}),
                      detail: json!({"name": "x"}),
                      submitter_user_id: 123,
                      submitter_role_id: None,
                      levels_hash: "abc".into(),
                      status }.into_decision(10, Utc::now())
    }

    #[test]
    fn action_and_status_parse_back() {
        for a in [Action::Submit, Action::Approve, Action::Refuse, Action::Resubmit, Action::Confirm, Action::Cancel] {
            assert_eq!(a.as_str().parse::<Action>().unwrap(), a);
        }
        for s in [Status::Pending,
                  Status::AwaitingResubmit,
                  Status::AwaitingConfirm,
                  Status::Approved,
                  Status::RefusedTerminal,
                  Status::Canceled]
        {
            assert_eq!(s.as_str().parse::<Status>().unwrap(), s);
        }
        assert!("nope".parse::<Status>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(Status::Approved.is_terminal());
        assert!(Status::Canceled.is_terminal());
        assert!(Status::RefusedTerminal.is_terminal());
        assert!(!Status::Pending.is_terminal());
        assert!(!Status::AwaitingConfirm.is_terminal());
    }

    #[test]
    fn outcome_flags_follow_status() {
        let o = row(Status::AwaitingConfirm).outcome();
        assert!(o.confirm && !o.end && !o.resubmit && !o.cancel);
        let o = row(Status::Canceled).outcome();
        assert!(o.cancel && o.end);
        assert_eq!(o.key.to_string(), "leave/u1");
    }

    #[test]
    fn actor_is_rebuilt_from_columns() {
        assert_eq!(row(Status::Pending).actor(), Some(Actor::Role(5)));
    }
}
