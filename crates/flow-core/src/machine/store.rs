use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::Utc;
use flow_domain::{Machine, MachineDraft, MachineId};
use serde::{Deserialize, Serialize};

use crate::errors::FlowError;

/// Filtro de búsqueda; los campos `None` no restringen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineFilter {
    pub category: Option<String>,
    /// Coincidencia por subcadena sobre `name`.
    pub name: Option<String>,
    pub submitter_confirm_required: Option<bool>,
}

impl MachineFilter {
    pub fn category(category: impl Into<String>) -> Self {
        Self { category: Some(category.into()),
               ..Default::default() }
    }

    pub fn accepts(&self, m: &Machine) -> bool {
        self.category.as_ref().map(|c| *c == m.category).unwrap_or(true)
        && self.name.as_ref().map(|n| m.name.contains(n.as_str())).unwrap_or(true)
        && self.submitter_confirm_required
               .map(|c| c == m.submitter_confirm_required)
               .unwrap_or(true)
    }
}

/// Persistencia de plantillas. Las reglas de uso (instancias abiertas,
/// validación) viven en el motor; el store sólo guarda y lee.
pub trait MachineStore: Send + Sync {
    /// Valida el borrador, asigna id y lo persiste.
    fn insert(&self, draft: MachineDraft) -> Result<Machine, FlowError>;

    fn get(&self, id: MachineId) -> Result<Option<Machine>, FlowError>;

    fn find(&self, filter: &MachineFilter) -> Result<Vec<Machine>, FlowError>;

    /// Reemplaza una plantilla existente (mismo id).
    fn replace(&self, machine: &Machine) -> Result<(), FlowError>;

    /// Elimina las plantillas indicadas; devuelve cuántas existían.
    fn delete(&self, ids: &[MachineId]) -> Result<usize, FlowError>;
}

#[derive(Debug, Default)]
pub struct InMemoryMachineStore {
    inner: RwLock<BTreeMap<MachineId, Machine>>,
    next_id: AtomicU64,
}

impl InMemoryMachineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> FlowError {
    FlowError::Storage("machine store lock poisoned".into())
}

impl MachineStore for InMemoryMachineStore {
    fn insert(&self, draft: MachineDraft) -> Result<Machine, FlowError> {
        draft.validate()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let machine = draft.into_machine(id, Utc::now())?;
        self.inner.write().map_err(|_| poisoned())?.insert(id, machine.clone());
        Ok(machine)
    }

    fn get(&self, id: MachineId) -> Result<Option<Machine>, FlowError> {
        Ok(self.inner.read().map_err(|_| poisoned())?.get(&id).cloned())
    }

    fn find(&self, filter: &MachineFilter) -> Result<Vec<Machine>, FlowError> {
        Ok(self.inner
               .read()
               .map_err(|_| poisoned())?
               .values()
               .filter(|m| filter.accepts(m))
               .cloned()
               .collect())
    }

    fn replace(&self, machine: &Machine) -> Result<(), FlowError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        match inner.get_mut(&machine.id) {
            Some(slot) => {
                *slot = machine.clone();
                Ok(())
            }
            None => Err(FlowError::UnknownMachine(machine.id)),
        }
    }

    fn delete(&self, ids: &[MachineId]) -> Result<usize, FlowError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        Ok(ids.iter().filter(|id| inner.remove(*id).is_some()).count())
    }
}
