use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use flow_domain::{Decision, InstanceKey, MachineId, NewDecision};
use log::debug;

use crate::errors::FlowError;

/// Callback de validación de un compare-and-append: recibe las filas
/// (bloqueadas) de la instancia en orden ascendente y devuelve la fila a
/// agregar, o un error que aborta la transacción. Puede invocarse más de una
/// vez si el backend reintenta la transacción.
pub type Decide<'a> = dyn FnMut(&[Decision]) -> Result<NewDecision, FlowError> + 'a;

/// Almacenamiento de decisiones append-only.
///
/// Contrato:
/// - `append_with` lee las filas de `key` con lock exclusivo, invoca
///   `decide` sobre ese snapshot y agrega el resultado en la misma
///   transacción. Si `decide` falla no se escribe nada.
/// - La fila agregada debe tener `revision = última + 1` (0 si no hay filas);
///   en otro caso el append falla con `StaleState` (o `DuplicateInstance`
///   para la revisión 0).
/// - `list` devuelve las filas de una instancia en orden ascendente.
pub trait LedgerStore: Send + Sync {
    fn append_with(&self, key: &InstanceKey, decide: &mut Decide<'_>) -> Result<Decision, FlowError>;

    fn list(&self, key: &InstanceKey) -> Result<Vec<Decision>, FlowError>;

    /// Última fila de `key` sin lock (lectura de snapshot).
    fn last(&self, key: &InstanceKey) -> Result<Option<Decision>, FlowError> {
        Ok(self.list(key)?.pop())
    }

    /// Última fila de cada instancia, opcionalmente de una sola categoría.
    fn latest(&self, category: Option<&str>) -> Result<Vec<Decision>, FlowError>;

    /// Cantidad de instancias no terminales que referencian `machine_id`.
    fn open_instances_of(&self, machine_id: MachineId) -> Result<usize, FlowError> {
        Ok(self.latest(None)?
               .iter()
               .filter(|d| d.machine_id == machine_id && !d.is_terminal())
               .count())
    }
}

/// Verifica que `next` encadene con `latest` (misma clave, revisión
/// contigua).
pub fn check_chain(key: &InstanceKey, latest: Option<&Decision>, next: &NewDecision) -> Result<(), FlowError> {
    if next.category != key.category || next.uuid != key.uuid {
        return Err(FlowError::Storage(format!("decision for {} appended under {key}", next.key())));
    }
    match latest {
        None if next.revision == 0 => Ok(()),
        None => Err(FlowError::StaleState(format!("{key}: revision {} without history", next.revision))),
        Some(_) if next.revision == 0 => Err(FlowError::DuplicateInstance(key.clone())),
        Some(prev) if next.revision == prev.revision + 1 => Ok(()),
        Some(prev) => Err(FlowError::StaleState(format!("{key}: expected revision {}, got {}",
                                                        prev.revision + 1,
                                                        next.revision))),
    }
}

/// Ledger en memoria. Cada instancia tiene su propio mutex: las
/// transiciones de una misma clave se linealizan y las de claves distintas
/// avanzan en paralelo.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    instances: DashMap<InstanceKey, Arc<Mutex<Vec<Decision>>>>,
    next_id: AtomicI64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &InstanceKey) -> Arc<Mutex<Vec<Decision>>> {
        // El guard del shard se libera al final de la sentencia; sólo se
        // retiene el mutex de la instancia.
        self.instances.entry(key.clone()).or_default().value().clone()
    }
}

fn poisoned(key: &InstanceKey) -> FlowError {
    FlowError::Storage(format!("instance lock poisoned: {key}"))
}

impl LedgerStore for InMemoryLedger {
    fn append_with(&self, key: &InstanceKey, decide: &mut Decide<'_>) -> Result<Decision, FlowError> {
        let slot = self.slot(key);
        let mut rows = slot.lock().map_err(|_| poisoned(key))?;
        debug!("append_with:start key={key} rows={}", rows.len());
        let next = decide(rows.as_slice())?;
        check_chain(key, rows.last(), &next)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let decision = next.into_decision(id, Utc::now());
        rows.push(decision.clone());
        debug!("append_with:done key={key} id={id} revision={} status={}",
               decision.revision,
               decision.status);
        Ok(decision)
    }

    fn list(&self, key: &InstanceKey) -> Result<Vec<Decision>, FlowError> {
        match self.instances.get(key) {
            Some(slot) => Ok(slot.lock().map_err(|_| poisoned(key))?.clone()),
            None => Ok(Vec::new()),
        }
    }

    fn last(&self, key: &InstanceKey) -> Result<Option<Decision>, FlowError> {
        match self.instances.get(key) {
            Some(slot) => Ok(slot.lock().map_err(|_| poisoned(key))?.last().cloned()),
            None => Ok(None),
        }
    }

    fn latest(&self, category: Option<&str>) -> Result<Vec<Decision>, FlowError> {
        let mut out = Vec::new();
        for entry in self.instances.iter() {
            if category.map(|c| c != entry.key().category).unwrap_or(false) {
                continue;
            }
            let rows = entry.value().lock().map_err(|_| poisoned(entry.key()))?;
            if let Some(last) = rows.last() {
                out.push(last.clone());
            }
        }
        out.sort_by_key(|d| d.id);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_domain::{Action, Status};
    use serde_json::json;

    fn new_row(key: &InstanceKey, revision: u32, status: Status) -> NewDecision {
        NewDecision { category: key.category.clone(),
                      uuid: key.uuid.clone(),
                      revision,
                      machine_id: 1,
                      level_index: 0,
                      actor_role_id: None,
                      actor_user_id: None,
                      action: if revision == 0 { Action::Submit } else { Action::Approve },
                      opinion: None,
                      prev_detail: json!({}),
                      detail: json!({}),
                      submitter_user_id: 1,
                      submitter_role_id: None,
                      levels_hash: "h".into(),
                      status }
    }

    #[test]
    fn ids_are_monotonic_and_list_is_ordered() {
        let ledger = InMemoryLedger::new();
        let key = InstanceKey::new("c", "a");
        for rev in 0..4u32 {
            ledger.append_with(&key, &mut |_| Ok(new_row(&key, rev, Status::Pending))).unwrap();
        }
        let rows = ledger.list(&key).unwrap();
        let ids: Vec<i64> = rows.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(rows.last().map(|d| d.revision), Some(3));
    }

    #[test]
    fn failed_decide_writes_nothing() {
        let ledger = InMemoryLedger::new();
        let key = InstanceKey::new("c", "a");
        let err = ledger.append_with(&key, &mut |_| Err(FlowError::PermissionDenied("no".into())))
                        .unwrap_err();
        assert!(matches!(err, FlowError::PermissionDenied(_)));
        assert!(ledger.list(&key).unwrap().is_empty());
        assert!(ledger.latest(None).unwrap().is_empty());
    }

    #[test]
    fn broken_chain_is_rejected() {
        let ledger = InMemoryLedger::new();
        let key = InstanceKey::new("c", "a");
        ledger.append_with(&key, &mut |_| Ok(new_row(&key, 0, Status::Pending))).unwrap();
        let dup = ledger.append_with(&key, &mut |_| Ok(new_row(&key, 0, Status::Pending)));
        assert_eq!(dup.unwrap_err(), FlowError::DuplicateInstance(key.clone()));
        let gap = ledger.append_with(&key, &mut |_| Ok(new_row(&key, 5, Status::Pending)));
        assert!(matches!(gap, Err(FlowError::StaleState(_))));
        assert_eq!(ledger.list(&key).unwrap().len(), 1);
    }

    #[test]
    fn latest_filters_by_category_and_counts_open() {
        let ledger = InMemoryLedger::new();
        let a = InstanceKey::new("leave", "a");
        let b = InstanceKey::new("leave", "b");
        let c = InstanceKey::new("purchase", "c");
        for k in [&a, &b, &c] {
            ledger.append_with(k, &mut |_| Ok(new_row(k, 0, Status::Pending))).unwrap();
        }
        ledger.append_with(&b, &mut |_| Ok(new_row(&b, 1, Status::Canceled))).unwrap();
        assert_eq!(ledger.latest(Some("leave")).unwrap().len(), 2);
        assert_eq!(ledger.latest(None).unwrap().len(), 3);
        assert_eq!(ledger.open_instances_of(1).unwrap(), 2);
    }

    #[test]
    fn decide_sees_every_row_of_the_instance() {
        let ledger = InMemoryLedger::new();
        let key = InstanceKey::new("c", "a");
        for rev in 0..3u32 {
            ledger.append_with(&key, &mut |_| Ok(new_row(&key, rev, Status::Pending))).unwrap();
        }
        let mut seen = Vec::new();
        ledger.append_with(&key, &mut |rows| {
                  seen = rows.iter().map(|d| d.revision).collect();
                  Ok(new_row(&key, 3, Status::Pending))
              })
              .unwrap();
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
