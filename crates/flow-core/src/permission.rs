//! Evaluación de permisos sobre una instancia.
//!
//! El conjunto efectivo de aprobadores de un nivel es la unión de sus
//! usuarios explícitos y los miembros de sus roles, resuelto contra el
//! directorio en cada evaluación (la pertenencia a roles puede cambiar entre
//! llamadas).

use std::collections::BTreeSet;

use flow_domain::{Action, Decision, Identity, Level, Machine, RoleId, Status, UserId};

use crate::errors::FlowError;
use crate::identity::IdentityResolver;

/// Aprobadores resueltos de un nivel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveApprovers {
    /// Usuarios explícitos ∪ miembros de `roles`.
    pub users: BTreeSet<UserId>,
    /// Roles configurados en el nivel (un actor que se presenta con uno de
    /// estos roles es elegible aunque no indique usuario).
    pub roles: BTreeSet<RoleId>,
}

impl EffectiveApprovers {
    pub fn admits(&self, identity: &Identity) -> bool {
        identity.matches(&self.users, &self.roles)
    }
}

pub struct PermissionEvaluator<'a, I: IdentityResolver + ?Sized> {
    resolver: &'a I,
}

impl<'a, I: IdentityResolver + ?Sized> PermissionEvaluator<'a, I> {
    pub fn new(resolver: &'a I) -> Self {
        Self { resolver }
    }

    pub fn effective_approvers(&self, level: &Level) -> Result<EffectiveApprovers, FlowError> {
        let mut users = if level.approver_role_ids.is_empty() {
            BTreeSet::new()
        } else {
            self.resolver.members(&level.approver_role_ids)?
        };
        users.extend(level.approver_user_ids.iter().copied());
        Ok(EffectiveApprovers { users,
                                roles: level.approver_role_ids.clone() })
    }

    /// true si `identity` está entre los aprobadores del nivel `index`.
    pub fn is_level_approver(&self, identity: &Identity, machine: &Machine, index: usize) -> Result<bool, FlowError> {
        match machine.level(index) {
            Some(level) => Ok(self.effective_approvers(level)?.admits(identity)),
            None => Ok(false),
        }
    }

    /// ¿Puede `identity` realizar la siguiente acción sobre la instancia cuya
    /// última fila es `latest`?
    ///
    /// - `Pending`: debe estar entre los aprobadores del nivel actual.
    /// - `AwaitingConfirm` / `AwaitingResubmit`: debe ser el usuario submitter.
    /// - Terminal: nadie.
    pub fn can_act(&self, identity: &Identity, machine: &Machine, latest: &Decision) -> Result<bool, FlowError> {
        match latest.status {
            Status::Pending => self.is_level_approver(identity, machine, latest.level_index),
            Status::AwaitingConfirm | Status::AwaitingResubmit => Ok(identity.user == Some(latest.submitter_user_id)),
            Status::Approved | Status::RefusedTerminal | Status::Canceled => Ok(false),
        }
    }
}

/// true si alguna fila del ciclo actual (desde el último submit/resubmit)
/// registra un voto de nivel acreditado a `identity`.
pub fn has_acted(identity: &Identity, rows: &[Decision]) -> bool {
    rows.iter()
        .rev()
        .take_while(|d| !matches!(d.action, Action::Submit | Action::Resubmit))
        .filter(|d| d.action.is_level_vote())
        .filter_map(Decision::actor)
        .any(|actor| identity.credits(&actor))
}
