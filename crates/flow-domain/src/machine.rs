//! Plantillas de workflow (`Machine`) y sus niveles de aprobación.
//!
//! Un `Machine` es inmutable en su estructura de niveles mientras existan
//! instancias en curso: el fingerprint `levels_hash` permite detectar si un
//! patch alteraría los niveles contra los que se evalúan esas instancias.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::hashing::hash_value;
use crate::{DomainError, FieldSet, RoleId, UserId};

pub type MachineId = u64;

/// Una etapa de aprobación.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub name: String,
    /// Si el aprobador de este nivel puede modificar campos del submitter
    /// antes de decidir.
    #[serde(default)]
    pub editable: bool,
    /// Campos modificables; sólo se consideran si `editable`.
    #[serde(default)]
    pub edit_fields: FieldSet,
    #[serde(default)]
    pub approver_role_ids: BTreeSet<RoleId>,
    #[serde(default)]
    pub approver_user_ids: BTreeSet<UserId>,
}

impl Level {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(),
               editable: false,
               edit_fields: FieldSet::new(),
               approver_role_ids: BTreeSet::new(),
               approver_user_ids: BTreeSet::new() }
    }

    pub fn with_roles<I: IntoIterator<Item = RoleId>>(mut self, roles: I) -> Self {
        self.approver_role_ids.extend(roles);
        self
    }

    pub fn with_users<I: IntoIterator<Item = UserId>>(mut self, users: I) -> Self {
        self.approver_user_ids.extend(users);
        self
    }

    /// Marca el nivel como editable sobre los campos indicados.
    pub fn editable_on(mut self, fields: FieldSet) -> Self {
        self.editable = true;
        self.edit_fields = fields;
        self
    }

    pub fn has_approvers(&self) -> bool {
        !self.approver_role_ids.is_empty() || !self.approver_user_ids.is_empty()
    }

    /// Campos que un aprobador de este nivel puede tocar (vacío si el nivel
    /// no es editable).
    pub fn permitted_fields(&self) -> FieldSet {
        if self.editable {
            self.edit_fields.clone()
        } else {
            FieldSet::new()
        }
    }
}

/// Definición entrante para `CreateMachine`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineDraft {
    pub category: String,
    pub name: String,
    pub submitter_name: String,
    #[serde(default)]
    pub submitter_edit_fields: FieldSet,
    #[serde(default)]
    pub submitter_confirm_required: bool,
    #[serde(default)]
    pub submitter_confirm_edit_fields: FieldSet,
    pub levels: Vec<Level>,
}

impl MachineDraft {
    pub fn new(category: impl Into<String>, name: impl Into<String>, submitter_name: impl Into<String>) -> Self {
        Self { category: category.into(),
               name: name.into(),
               submitter_name: submitter_name.into(),
               submitter_edit_fields: FieldSet::new(),
               submitter_confirm_required: false,
               submitter_confirm_edit_fields: FieldSet::new(),
               levels: Vec::new() }
    }

    pub fn submitter_edit_fields(mut self, fields: FieldSet) -> Self {
        self.submitter_edit_fields = fields;
        self
    }

    pub fn confirm_required(mut self, edit_fields: FieldSet) -> Self {
        self.submitter_confirm_required = true;
        self.submitter_confirm_edit_fields = edit_fields;
        self
    }

    pub fn level(mut self, level: Level) -> Self {
        self.levels.push(level);
        self
    }

    /// Valida la definición.
    ///
    /// # Errores
    /// `DomainError::InvalidDefinition` si falta categoría o nombre, si no
    /// hay niveles o si algún nivel carece de aprobadores.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.category.trim().is_empty() {
            return Err(DomainError::InvalidDefinition("category must not be empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(DomainError::InvalidDefinition("name must not be empty".into()));
        }
        validate_levels(&self.levels)
    }

    /// Valida y materializa el `Machine` con el id asignado por el store.
    pub fn into_machine(self, id: MachineId, now: DateTime<Utc>) -> Result<Machine, DomainError> {
        self.validate()?;
        let levels_hash = Machine::compute_levels_hash(&self.levels);
        Ok(Machine { id,
                     category: self.category,
                     name: self.name,
                     submitter_name: self.submitter_name,
                     submitter_edit_fields: self.submitter_edit_fields,
                     submitter_confirm_required: self.submitter_confirm_required,
                     submitter_confirm_edit_fields: self.submitter_confirm_edit_fields,
                     levels: self.levels,
                     levels_hash,
                     created_at: now,
                     updated_at: now })
    }
}

fn validate_levels(levels: &[Level]) -> Result<(), DomainError> {
    if levels.is_empty() {
        return Err(DomainError::InvalidDefinition("levels must not be empty".into()));
    }
    for (i, level) in levels.iter().enumerate() {
        if level.name.trim().is_empty() {
            return Err(DomainError::InvalidDefinition(format!("level {i} has no name")));
        }
        if !level.has_approvers() {
            return Err(DomainError::InvalidDefinition(format!("level {i} ({}) has no approver role or user",
                                                              level.name)));
        }
    }
    Ok(())
}

/// Cambios administrativos sobre un `Machine`. `None` deja el valor actual.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachinePatch {
    pub name: Option<String>,
    pub submitter_name: Option<String>,
    pub submitter_edit_fields: Option<FieldSet>,
    pub submitter_confirm_required: Option<bool>,
    pub submitter_confirm_edit_fields: Option<FieldSet>,
    pub levels: Option<Vec<Level>>,
}

/// Plantilla persistida.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub id: MachineId,
    pub category: String,
    pub name: String,
    pub submitter_name: String,
    pub submitter_edit_fields: FieldSet,
    pub submitter_confirm_required: bool,
    pub submitter_confirm_edit_fields: FieldSet,
    pub levels: Vec<Level>,
    /// SHA-256 del canonical JSON de `levels`.
    pub levels_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Machine {
    pub fn compute_levels_hash(levels: &[Level]) -> String {
        // Level sólo contiene strings, bools y sets: la serialización no falla.
        let value = serde_json::to_value(levels).unwrap_or(serde_json::Value::Null);
        hash_value(&value)
    }

    pub fn level(&self, index: usize) -> Option<&Level> {
        self.levels.get(index)
    }

    pub fn last_level_index(&self) -> usize {
        self.levels.len().saturating_sub(1)
    }

    pub fn is_last_level(&self, index: usize) -> bool {
        index == self.last_level_index()
    }

    /// true si aplicar `patch` cambiaría la estructura de niveles.
    pub fn patch_changes_levels(&self, patch: &MachinePatch) -> bool {
        patch.levels
             .as_ref()
             .map(|levels| Self::compute_levels_hash(levels) != self.levels_hash)
             .unwrap_or(false)
    }

    /// Devuelve una nueva versión con el patch aplicado y revalidada.
    pub fn patched(&self, patch: MachinePatch, now: DateTime<Utc>) -> Result<Machine, DomainError> {
        let mut next = self.clone();
        if let Some(name) = patch.name {
            next.name = name;
        }
        if let Some(submitter_name) = patch.submitter_name {
            next.submitter_name = submitter_name;
        }
        if let Some(fields) = patch.submitter_edit_fields {
            next.submitter_edit_fields = fields;
        }
        if let Some(required) = patch.submitter_confirm_required {
            next.submitter_confirm_required = required;
        }
        if let Some(fields) = patch.submitter_confirm_edit_fields {
            next.submitter_confirm_edit_fields = fields;
        }
        if let Some(levels) = patch.levels {
            validate_levels(&levels)?;
            next.levels_hash = Self::compute_levels_hash(&levels);
            next.levels = levels;
        }
        if next.name.trim().is_empty() {
            return Err(DomainError::InvalidDefinition("name must not be empty".into()));
        }
        next.updated_at = now;
        Ok(next)
    }
}
