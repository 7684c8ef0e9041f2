use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Nullable, Text};
use log::debug;
use serde_json::Value;

use flow_core::{check_chain, Decide, FlowError, LedgerStore};
use flow_domain::{Decision, InstanceKey, MachineId, NewDecision};

use super::{from_bigint, from_bigint_opt, to_bigint, to_bigint_opt, with_retry, ConnectionProvider};
use crate::error::PersistenceError;
use crate::schema::flow_decisions;

/// Fila de `flow_decisions` (orden de columnas del esquema).
#[derive(Queryable, QueryableByName, Debug, Clone)]
#[diesel(table_name = flow_decisions)]
pub struct DecisionRow {
    pub id: i64,
    pub category: String,
    pub uuid: String,
    pub revision: i32,
    pub machine_id: i64,
    pub level_index: i32,
    pub actor_role_id: Option<i64>,
    pub actor_user_id: Option<i64>,
    pub action: String,
    pub opinion: Option<String>,
    pub prev_detail: Value,
    pub detail: Value,
    pub submitter_user_id: i64,
    pub submitter_role_id: Option<i64>,
    pub levels_hash: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DecisionRow> for Decision {
    type Error = PersistenceError;

    fn try_from(row: DecisionRow) -> Result<Self, Self::Error> {
        let invalid = |e: flow_domain::DomainError| PersistenceError::InvalidRow(format!("decision {}: {e}", row.id));
        Ok(Decision { id: row.id,
                      action: row.action.parse().map_err(invalid)?,
                      status: row.status.parse().map_err(invalid)?,
                      revision: row.revision as u32,
                      machine_id: from_bigint("machine_id", row.machine_id)?,
                      level_index: row.level_index as usize,
                      actor_role_id: from_bigint_opt("actor_role_id", row.actor_role_id)?,
                      actor_user_id: from_bigint_opt("actor_user_id", row.actor_user_id)?,
                      submitter_user_id: from_bigint("submitter_user_id", row.submitter_user_id)?,
                      submitter_role_id: from_bigint_opt("submitter_role_id", row.submitter_role_id)?,
                      levels_hash: row.levels_hash,
                      category: row.category,
                      uuid: row.uuid,
                      opinion: row.opinion,
                      prev_detail: row.prev_detail,
                      detail: row.detail,
                      created_at: row.created_at })
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = flow_decisions)]
struct NewDecisionRow<'a> {
    category: &'a str,
    uuid: &'a str,
    revision: i32,
    machine_id: i64,
    level_index: i32,
    actor_role_id: Option<i64>,
    actor_user_id: Option<i64>,
    action: &'a str,
    opinion: Option<&'a str>,
    prev_detail: &'a Value,
    detail: &'a Value,
    submitter_user_id: i64,
    submitter_role_id: Option<i64>,
    levels_hash: &'a str,
    status: &'a str,
}

impl<'a> TryFrom<&'a NewDecision> for NewDecisionRow<'a> {
    type Error = PersistenceError;

    fn try_from(d: &'a NewDecision) -> Result<Self, Self::Error> {
        let revision = i32::try_from(d.revision).map_err(|_| {
                           PersistenceError::InvalidRow(format!("revision={} does not fit in INTEGER", d.revision))
                       })?;
        let level_index = i32::try_from(d.level_index).map_err(|_| {
                              PersistenceError::InvalidRow(format!("level_index={} does not fit in INTEGER",
                                                                   d.level_index))
                          })?;
        Ok(Self { category: &d.category,
                  uuid: &d.uuid,
                  revision,
                  machine_id: to_bigint("machine_id", d.machine_id)?,
                  level_index,
                  actor_role_id: to_bigint_opt("actor_role_id", d.actor_role_id)?,
                  actor_user_id: to_bigint_opt("actor_user_id", d.actor_user_id)?,
                  action: d.action.as_str(),
                  opinion: d.opinion.as_deref(),
                  prev_detail: &d.prev_detail,
                  detail: &d.detail,
                  submitter_user_id: to_bigint("submitter_user_id", d.submitter_user_id)?,
                  submitter_role_id: to_bigint_opt("submitter_role_id", d.submitter_role_id)?,
                  levels_hash: &d.levels_hash,
                  status: d.status.as_str() })
    }
}

const LATEST_SQL: &str = "SELECT DISTINCT ON (category, uuid) * FROM flow_decisions \
                          WHERE ($1::text IS NULL OR category = $1) \
                          AND ($2::bigint IS NULL OR machine_id = $2) \
                          ORDER BY category, uuid, revision DESC";

fn into_decisions(rows: Vec<DecisionRow>) -> Result<Vec<Decision>, PersistenceError> {
    rows.into_iter().map(Decision::try_from).collect()
}

/// Ledger Postgres.
///
/// `append_with` corre dentro de `build_transaction().read_write()`: bloquea
/// las filas de la instancia con `FOR UPDATE`, invoca `decide` y agrega la
/// fila resultante. Si otro escritor confirmó primero la misma revisión,
/// el índice único lo detecta y la transacción se reintenta completa: `decide`
/// vuelve a evaluarse contra la fila recién confirmada.
pub struct PgLedger<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgLedger<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    fn load_latest(&self, category: Option<&str>, machine_id: Option<MachineId>) -> Result<Vec<Decision>, FlowError> {
        let machine_id = to_bigint_opt("machine_id", machine_id)?;
        let rows: Vec<DecisionRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::sql_query(LATEST_SQL).bind::<Nullable<Text>, _>(category)
                                         .bind::<Nullable<BigInt>, _>(machine_id)
                                         .load(&mut conn)
                                         .map_err(PersistenceError::from)
        })?;
        let mut out = into_decisions(rows)?;
        out.sort_by_key(|d| d.id);
        Ok(out)
    }
}

impl<P: ConnectionProvider> LedgerStore for PgLedger<P> {
    fn append_with(&self, key: &InstanceKey, decide: &mut Decide<'_>) -> Result<Decision, FlowError> {
        debug!("append_with:start key={key}");
        let row: DecisionRow = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction().read_write().run(|tx| {
                let locked = flow_decisions::table.filter(flow_decisions::category.eq(&key.category))
                                                  .filter(flow_decisions::uuid.eq(&key.uuid))
                                                  .order(flow_decisions::revision.asc())
                                                  .for_update()
                                                  .load::<DecisionRow>(tx)?;
                let history = into_decisions(locked)?;
                let next = decide(history.as_slice()).map_err(PersistenceError::Rejected)?;
                check_chain(key, history.last(), &next).map_err(PersistenceError::Rejected)?;
                diesel::insert_into(flow_decisions::table).values(NewDecisionRow::try_from(&next)?)
                                                          .get_result::<DecisionRow>(tx)
                                                          .map_err(|e| match PersistenceError::from(e) {
                                                              PersistenceError::UniqueViolation(_) => {
                                                                  PersistenceError::RevisionConflict(next.revision)
                                                              }
                                                              other => other,
                                                          })
            })
        }).map_err(|e| match e {
              PersistenceError::RevisionConflict(0) => FlowError::DuplicateInstance(key.clone()),
              other => FlowError::from(other),
          })?;
        let decision = Decision::try_from(row)?;
        debug!("append_with:done key={key} id={} revision={} status={}",
               decision.id,
               decision.revision,
               decision.status);
        Ok(decision)
    }

    fn list(&self, key: &InstanceKey) -> Result<Vec<Decision>, FlowError> {
        debug!("list:start key={key}");
        let rows: Vec<DecisionRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            flow_decisions::table.filter(flow_decisions::category.eq(&key.category))
                                 .filter(flow_decisions::uuid.eq(&key.uuid))
                                 .order(flow_decisions::revision.asc())
                                 .load(&mut conn)
                                 .map_err(PersistenceError::from)
        })?;
        let out = into_decisions(rows)?;
        debug!("list:done key={key} count={}", out.len());
        Ok(out)
    }

    fn last(&self, key: &InstanceKey) -> Result<Option<Decision>, FlowError> {
        let row: Option<DecisionRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            flow_decisions::table.filter(flow_decisions::category.eq(&key.category))
                                 .filter(flow_decisions::uuid.eq(&key.uuid))
                                 .order(flow_decisions::revision.desc())
                                 .first(&mut conn)
                                 .optional()
                                 .map_err(PersistenceError::from)
        })?;
        Ok(row.map(Decision::try_from).transpose()?)
    }

    fn latest(&self, category: Option<&str>) -> Result<Vec<Decision>, FlowError> {
        self.load_latest(category, None)
    }

    fn open_instances_of(&self, machine_id: MachineId) -> Result<usize, FlowError> {
        Ok(self.load_latest(None, Some(machine_id))?
               .iter()
               .filter(|d| !d.is_terminal())
               .count())
    }
}
