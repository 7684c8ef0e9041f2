//! Identidad de quien actúa sobre una instancia.
//!
//! Un actor puede presentarse sólo como usuario, sólo como rol, o como
//! usuario dentro de un rol. Modelarlo como enum obliga a que cada chequeo
//! de elegibilidad cubra todas las variantes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub type UserId = u64;
pub type RoleId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    User(UserId),
    Role(RoleId),
    Member { user: UserId, role: RoleId },
}

impl Actor {
    /// Construye un actor a partir de los dos opcionales que suele traer una
    /// petición. `None` si ambos faltan.
    pub fn from_parts(user: Option<UserId>, role: Option<RoleId>) -> Option<Self> {
        match (user, role) {
            (Some(user), Some(role)) => Some(Actor::Member { user, role }),
            (Some(user), None) => Some(Actor::User(user)),
            (None, Some(role)) => Some(Actor::Role(role)),
            (None, None) => None,
        }
    }

    pub fn user(&self) -> Option<UserId> {
        match *self {
            Actor::User(u) | Actor::Member { user: u, .. } => Some(u),
            Actor::Role(_) => None,
        }
    }

    pub fn role(&self) -> Option<RoleId> {
        match *self {
            Actor::Role(r) | Actor::Member { role: r, .. } => Some(r),
            Actor::User(_) => None,
        }
    }

    /// true si el actor es el submitter registrado (por usuario o, si lo
    /// hubo, por rol del submitter).
    pub fn is_submitter(&self, submitter_user: UserId, submitter_role: Option<RoleId>) -> bool {
        let by_user = self.user() == Some(submitter_user);
        let by_role = matches!((self.role(), submitter_role), (Some(a), Some(b)) if a == b);
        by_user || by_role
    }
}

/// Identidad evaluada por los chequeos de permiso: un usuario opcional más
/// el conjunto de roles que ostenta.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user: Option<UserId>,
    pub roles: BTreeSet<RoleId>,
}

impl Identity {
    pub fn new<I: IntoIterator<Item = RoleId>>(user: Option<UserId>, roles: I) -> Self {
        Self { user,
               roles: roles.into_iter().collect() }
    }

    pub fn user(user: UserId) -> Self {
        Self::new(Some(user), std::iter::empty())
    }

    pub fn with_role(mut self, role: RoleId) -> Self {
        self.roles.insert(role);
        self
    }

    /// true si el usuario está en `users` o alguno de los roles en `roles`.
    pub fn matches(&self, users: &BTreeSet<UserId>, roles: &BTreeSet<RoleId>) -> bool {
        let by_user = self.user.map(|u| users.contains(&u)).unwrap_or(false);
        by_user || !self.roles.is_disjoint(roles)
    }

    /// true si un actor registrado en el ledger corresponde a esta identidad.
    pub fn credits(&self, actor: &Actor) -> bool {
        let by_user = actor.user().is_some() && actor.user() == self.user;
        let by_role = actor.role().map(|r| self.roles.contains(&r)).unwrap_or(false);
        by_user || by_role
    }
}

impl From<Actor> for Identity {
    fn from(actor: Actor) -> Self {
        Identity::new(actor.user(), actor.role())
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::User(u) => write!(f, "user:{u}"),
            Actor::Role(r) => write!(f, "role:{r}"),
            Actor::Member { user, role } => write!(f, "user:{user}@role:{role}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_parts_covers_all_shapes() {
        assert_eq!(Actor::from_parts(Some(1), None), Some(Actor::User(1)));
        assert_eq!(Actor::from_parts(None, Some(2)), Some(Actor::Role(2)));
        assert_eq!(Actor::from_parts(Some(1), Some(2)), Some(Actor::Member { user: 1, role: 2 }));
        assert_eq!(Actor::from_parts(None, None), None);
    }

    #[test]
    fn identity_matches_by_user_or_role() {
        let users: BTreeSet<UserId> = [8].into_iter().collect();
        let roles: BTreeSet<RoleId> = [4].into_iter().collect();
        assert!(Identity::from(Actor::User(8)).matches(&users, &roles));
        assert!(Identity::from(Actor::Role(4)).matches(&users, &roles));
        assert!(Identity::new(Some(99), [1, 4]).matches(&users, &roles));
        assert!(!Identity::user(4).matches(&users, &roles));
        assert!(!Identity::from(Actor::Role(8)).matches(&users, &roles));
    }

    #[test]
    fn credits_recorded_actor() {
        let me = Identity::new(Some(5), [4]);
        assert!(me.credits(&Actor::User(5)));
        assert!(me.credits(&Actor::Role(4)));
        assert!(!me.credits(&Actor::User(6)));
        assert!(!Identity::new(None, [1]).credits(&Actor::User(5)));
    }

    #[test]
    fn submitter_match_by_role_requires_recorded_role() {
        assert!(Actor::User(234).is_submitter(234, None));
        assert!(Actor::Role(567).is_submitter(456, Some(567)));
        assert!(!Actor::Role(567).is_submitter(456, None));
        assert!(!Actor::User(5).is_submitter(234, None));
    }
}
