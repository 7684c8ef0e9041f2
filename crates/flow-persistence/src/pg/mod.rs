//! Implementaciones Postgres (Diesel) de los stores del motor.
//!
//! - `PgLedger`: ledger append-only con compare-and-append bajo
//!   `SELECT … FOR UPDATE` sobre las filas de la instancia y un índice
//!   único `(category, uuid, revision)` como red para la primera fila.
//! - `PgMachineStore`: plantillas con `levels` y listas de campos en JSONB.
//!
//! Ambos comparten `ConnectionProvider` y el mismo reintento con backoff ante
//! errores transitorios.

mod ledger;
mod machines;

pub use ledger::{DecisionRow, PgLedger};
pub use machines::{MachineRow, PgMachineStore};

use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use log::warn;

use crate::error::{is_retryable, PersistenceError};
use crate::migrations::run_pending_migrations;

/// Id del dominio (`u64`) como `BIGINT`; falla en lugar de truncar.
pub(crate) fn to_bigint(field: &str, value: u64) -> Result<i64, PersistenceError> {
    i64::try_from(value).map_err(|_| PersistenceError::InvalidRow(format!("{field}={value} does not fit in BIGINT")))
}

pub(crate) fn to_bigint_opt(field: &str, value: Option<u64>) -> Result<Option<i64>, PersistenceError> {
    value.map(|v| to_bigint(field, v)).transpose()
}

/// `BIGINT` leído de la base como id del dominio.
pub(crate) fn from_bigint(field: &str, value: i64) -> Result<u64, PersistenceError> {
    u64::try_from(value).map_err(|_| PersistenceError::InvalidRow(format!("{field}={value} is negative")))
}

pub(crate) fn from_bigint_opt(field: &str, value: Option<i64>) -> Result<Option<u64>, PersistenceError> {
    value.map(|v| from_bigint(field, v)).transpose()
}

/// Alias de tipo para el pool r2d2 de conexiones Postgres.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub type PgPooledConnection = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones.
///
/// Contrato:
/// - Debe devolver una conexión válida o `PersistenceError::TransientIo` en
///   caso de error.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError>;
}

/// Implementación concreta de `ConnectionProvider` respaldada por un `PgPool`.
#[derive(Clone)]
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Retry simple con backoff lineal (hasta 3 reintentos: 15ms, 30ms, 45ms).
/// Emite `warn!` por intento; no altera la semántica de la unidad de trabajo.
pub(crate) fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {:?} -> sleeping {}ms",
                      attempts + 1,
                      e,
                      delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

/// Construye un pool Postgres r2d2 y ejecuta las migraciones pendientes.
///
/// Si `min_size > max_size` se usa `min_size = max_size`; tamaños 0 se elevan
/// a 1.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = min_size.max(1);
    let validated_max = max_size.max(1);
    if validated_min > validated_max {
        warn!("min_size > max_size ({validated_min} > {validated_max}), ajustando min=max");
    }
    let final_min = validated_min.min(validated_max);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(final_min))
                                    .max_size(validated_max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Carga `.env`, lee `DbConfig` y construye un pool ya migrado.
pub fn build_pool_from_env() -> Result<PgPool, PersistenceError> {
    let cfg = crate::config::DbConfig::from_env()?;
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}
