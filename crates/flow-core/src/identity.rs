//! Resolución rol → usuarios contra el directorio externo.

use std::collections::{BTreeSet, HashMap};

use flow_domain::{RoleId, UserId};
use thiserror::Error;

use crate::errors::FlowError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct IdentityError(pub String);

impl From<IdentityError> for FlowError {
    fn from(e: IdentityError) -> Self {
        FlowError::IdentityResolutionFailed(e.0)
    }
}

/// Colaborador de identidad. Se invoca dentro de la transacción de la
/// transición; el resultado no se cachea entre llamadas.
pub trait IdentityResolver: Send + Sync {
    fn members(&self, role_ids: &BTreeSet<RoleId>) -> Result<BTreeSet<UserId>, IdentityError>;
}

impl<T: IdentityResolver + ?Sized> IdentityResolver for &T {
    fn members(&self, role_ids: &BTreeSet<RoleId>) -> Result<BTreeSet<UserId>, IdentityError> {
        (**self).members(role_ids)
    }
}

/// Directorio estático en memoria (tests, demo, despliegues sin servicio de
/// directorio). Un rol desconocido no tiene miembros.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    roles: HashMap<RoleId, BTreeSet<UserId>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role<I: IntoIterator<Item = UserId>>(mut self, role: RoleId, users: I) -> Self {
        self.roles.entry(role).or_default().extend(users);
        self
    }
}

impl IdentityResolver for StaticDirectory {
    fn members(&self, role_ids: &BTreeSet<RoleId>) -> Result<BTreeSet<UserId>, IdentityError> {
        Ok(role_ids.iter()
                   .filter_map(|r| self.roles.get(r))
                   .flat_map(|users| users.iter().copied())
                   .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_of_role_members() {
        let dir = StaticDirectory::new().role(4, [10, 11]).role(5, [11, 12]);
        let roles: BTreeSet<RoleId> = [4, 5, 99].into_iter().collect();
        let members = dir.members(&roles).unwrap();
        assert_eq!(members.into_iter().collect::<Vec<_>>(), vec![10, 11, 12]);
    }

    #[test]
    fn identity_error_maps_to_resolution_failed() {
        let e: FlowError = IdentityError("directory down".into()).into();
        assert_eq!(e, FlowError::IdentityResolutionFailed("directory down".into()));
    }
}
