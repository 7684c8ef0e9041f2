//! Configuración central de la aplicación.
//! Carga variables de entorno (.env) una sola vez y expone una estructura
//! inmutable (`CONFIG`).
use std::env;
use std::time::Duration;

use flow_core::OpCtx;
use flow_persistence::config::{DEFAULT_MAX_CONNECTIONS, DEFAULT_MIN_CONNECTIONS};
use once_cell::sync::Lazy;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: '{value}'")]
    InvalidVar { name: &'static str, value: String },
}

/// Configuración global de la aplicación.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    /// `None` si `DATABASE_URL` no está definido (sólo backend en memoria).
    pub database: Option<DatabaseConfig>,
    /// Deadline por operación mutante (`FLOW_DEFAULT_DEADLINE_MS`).
    pub default_deadline: Option<Duration>,
}

/// Parámetros de conexión a la base de datos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

/// Instancia global perezosa de configuración, evaluada una sola vez. Un
/// valor inválido deja la configuración por defecto.
pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    let _ = dotenvy::dotenv();
    AppConfig::from_env().unwrap_or_else(|e| {
                             eprintln!("[config] {e}; usando valores por defecto");
                             AppConfig::default()
                         })
});

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Igual que `from_env` pero leyendo de `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
        where F: Fn(&str) -> Option<String>
    {
        let number = |name: &'static str, default: Option<u64>| -> Result<Option<u64>, ConfigError> {
            match lookup(name) {
                Some(v) => v.trim()
                            .parse()
                            .map(Some)
                            .map_err(|_| ConfigError::InvalidVar { name, value: v }),
                None => Ok(default),
            }
        };
        let database = match lookup("DATABASE_URL") {
            Some(url) => {
                let min = number("DATABASE_MIN_CONNECTIONS", Some(DEFAULT_MIN_CONNECTIONS as u64))?;
                let max = number("DATABASE_MAX_CONNECTIONS", Some(DEFAULT_MAX_CONNECTIONS as u64))?;
                Some(DatabaseConfig { url,
                                      min_connections: min.unwrap_or_default() as u32,
                                      max_connections: max.unwrap_or_default() as u32 })
            }
            None => None,
        };
        let default_deadline = number("FLOW_DEFAULT_DEADLINE_MS", None)?.map(Duration::from_millis);
        Ok(Self { database,
                  default_deadline })
    }

    /// Contexto para una operación nueva según `default_deadline`.
    pub fn op_ctx(&self) -> OpCtx {
        match self.default_deadline {
            Some(d) => OpCtx::with_timeout(d),
            None => OpCtx::background(),
        }
    }
}
