use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use log::debug;
use serde_json::Value;

use flow_core::{FlowError, MachineFilter, MachineStore};
use flow_domain::{Machine, MachineDraft, MachineId};

use super::{from_bigint, to_bigint, with_retry, ConnectionProvider};
use crate::error::PersistenceError;
use crate::schema::flow_machines;

/// Fila de `flow_machines`. Las listas de campos y los niveles viajan como
/// JSONB.
#[derive(Queryable, Debug, Clone)]
pub struct MachineRow {
    pub id: i64,
    pub category: String,
    pub name: String,
    pub submitter_name: String,
    pub submitter_edit_fields: Value,
    pub submitter_confirm_required: bool,
    pub submitter_confirm_edit_fields: Value,
    pub levels: Value,
    pub levels_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<MachineRow> for Machine {
    type Error = PersistenceError;

    fn try_from(row: MachineRow) -> Result<Self, Self::Error> {
        Ok(Machine { id: from_bigint("machine id", row.id)?,
                     category: row.category,
                     name: row.name,
                     submitter_name: row.submitter_name,
                     submitter_edit_fields: serde_json::from_value(row.submitter_edit_fields)?,
                     submitter_confirm_required: row.submitter_confirm_required,
                     submitter_confirm_edit_fields: serde_json::from_value(row.submitter_confirm_edit_fields)?,
                     levels: serde_json::from_value(row.levels)?,
                     levels_hash: row.levels_hash,
                     created_at: row.created_at,
                     updated_at: row.updated_at })
    }
}

/// Columnas escribibles (todas salvo `id`).
#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = flow_machines)]
struct MachineValues<'a> {
    category: &'a str,
    name: &'a str,
    submitter_name: &'a str,
    submitter_edit_fields: Value,
    submitter_confirm_required: bool,
    submitter_confirm_edit_fields: Value,
    levels: Value,
    levels_hash: &'a str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'a> MachineValues<'a> {
    fn of(m: &'a Machine) -> Result<Self, PersistenceError> {
        Ok(Self { category: &m.category,
                  name: &m.name,
                  submitter_name: &m.submitter_name,
                  submitter_edit_fields: serde_json::to_value(&m.submitter_edit_fields)?,
                  submitter_confirm_required: m.submitter_confirm_required,
                  submitter_confirm_edit_fields: serde_json::to_value(&m.submitter_confirm_edit_fields)?,
                  levels: serde_json::to_value(&m.levels)?,
                  levels_hash: &m.levels_hash,
                  created_at: m.created_at,
                  updated_at: m.updated_at })
    }
}

pub struct PgMachineStore<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgMachineStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: ConnectionProvider> MachineStore for PgMachineStore<P> {
    fn insert(&self, draft: MachineDraft) -> Result<Machine, FlowError> {
        // El id real lo asigna BIGSERIAL; se materializa con 0 para validar y
        // calcular el hash de niveles.
        let mut machine = draft.into_machine(0, Utc::now())?;
        let values = MachineValues::of(&machine)?;
        let id: i64 = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(flow_machines::table).values(&values)
                                                     .returning(flow_machines::id)
                                                     .get_result(&mut conn)
                                                     .map_err(PersistenceError::from)
        })?;
        machine.id = from_bigint("machine id", id)?;
        debug!("machine insert id={id} category={}", machine.category);
        Ok(machine)
    }

    fn get(&self, id: MachineId) -> Result<Option<Machine>, FlowError> {
        let id = to_bigint("machine id", id)?;
        let row: Option<MachineRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            flow_machines::table.find(id)
                                .first(&mut conn)
                                .optional()
                                .map_err(PersistenceError::from)
        })?;
        Ok(row.map(Machine::try_from).transpose()?)
    }

    fn find(&self, filter: &MachineFilter) -> Result<Vec<Machine>, FlowError> {
        let rows: Vec<MachineRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            let mut query = flow_machines::table.order(flow_machines::id.asc()).into_boxed::<Pg>();
            if let Some(category) = &filter.category {
                query = query.filter(flow_machines::category.eq(category.clone()));
            }
            if let Some(name) = &filter.name {
                query = query.filter(flow_machines::name.like(format!("%{name}%")));
            }
            if let Some(required) = filter.submitter_confirm_required {
                query = query.filter(flow_machines::submitter_confirm_required.eq(required));
            }
            query.load(&mut conn).map_err(PersistenceError::from)
        })?;
        let machines = rows.into_iter()
                           .map(Machine::try_from)
                           .collect::<Result<Vec<_>, _>>()?;
        Ok(machines)
    }

    fn replace(&self, machine: &Machine) -> Result<(), FlowError> {
        let values = MachineValues::of(machine)?;
        let id = to_bigint("machine id", machine.id)?;
        let updated = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::update(flow_machines::table.find(id)).set(&values)
                                                          .execute(&mut conn)
                                                          .map_err(PersistenceError::from)
        })?;
        if updated == 0 {
            return Err(FlowError::UnknownMachine(machine.id));
        }
        Ok(())
    }

    fn delete(&self, ids: &[MachineId]) -> Result<usize, FlowError> {
        let ids = ids.iter()
                     .map(|id| to_bigint("machine id", *id))
                     .collect::<Result<Vec<i64>, _>>()?;
        let removed = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::delete(flow_machines::table.filter(flow_machines::id.eq_any(ids.clone()))).execute(&mut conn)
                                                                                       .map_err(PersistenceError::from)
        })?;
        Ok(removed)
    }
}
