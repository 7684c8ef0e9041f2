//! approvalflow
//!
//! Motor de aprobaciones multinivel:
//! - `flow_domain`: plantillas, niveles, filas del ledger.
//! - `flow_core`: stores, permisos, historial y el motor de transiciones.
//! - `flow_persistence`: backend Postgres.
//!
//! Este crate agrega la configuración de la aplicación y recorridos de
//! referencia usados por el binario de demo.

pub mod config;
pub mod scenarios;

pub use flow_core::{FlowEngine, FlowError, OpCtx, StaticDirectory};
pub use flow_domain::{Action, Actor, Decision, Identity, InstanceKey, Machine, Status};
