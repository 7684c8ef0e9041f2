//! flow-persistence
//!
//! Backend Postgres (Diesel + r2d2) del motor de aprobaciones: implementa
//! `LedgerStore` y `MachineStore` de `flow-core` con la misma semántica que
//! los stores en memoria.
//!
//! Módulos:
//! - `pg`: stores, pool y reintentos.
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: carga de configuración desde .env.
//! - `schema`: tablas Diesel declaradas para compilar queries.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use pg::{build_pool, build_pool_from_env, ConnectionProvider, PgLedger, PgMachineStore, PgPool, PoolProvider};
