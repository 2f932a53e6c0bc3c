//! Implementaciones Postgres (Diesel) de los stores del core.
//!
//! - Cada entidad se guarda completa como JSONB (`body`/`payload`), más las
//!   columnas necesarias para filtrar y ordenar. El mapeo dominio ↔ filas
//!   queda aislado aquí.
//! - Los stores son síncronos, igual que los traits de `flow-core`; el
//!   dispatcher y el manager los llaman desde sus tareas.
//! - Los errores transitorios se reintentan con un backoff corto
//!   (`with_retry`) y al final se convierten a `StorageError`.

mod catalog;
mod events;
mod registry;
mod services;

use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use log::warn;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;

pub use catalog::PgArtifactCatalog;
pub use events::PgEventStore;
pub use registry::PgRegistryStore;
pub use services::PgServiceStore;

/// Pool r2d2 de conexiones Postgres (`min_idle` / `max_size`).
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub type PgPooledConnection = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones.
///
/// Permite inyectar un pool real o uno construido a medida en tests. Debe
/// devolver una conexión válida o `PersistenceError::TransientIo`.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError>;
}

/// `ConnectionProvider` respaldado por un `PgPool`.
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

const RETRY_ATTEMPTS: u32 = 3;

/// Retry con backoff lineal corto (15ms, 30ms, 45ms) para errores
/// transitorios. Sólo repite la unidad de trabajo provista por `f`.
pub(crate) fn with_retry<F, T>(op: &str, f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    with_retry_if(op, PersistenceError::is_transient, f)
}

pub(crate) fn with_retry_if<F, T, R>(op: &str, retryable: R, mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>,
          R: Fn(&PersistenceError) -> bool
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if retryable(&e) && attempts < RETRY_ATTEMPTS => {
                let delay_ms = 15 * u64::from(attempts + 1);
                warn!("{op}: retryable error (attempt {}): {e} -> sleeping {delay_ms}ms", attempts + 1);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

pub(crate) fn decode<T: DeserializeOwned>(body: Value) -> Result<T, PersistenceError> {
    Ok(serde_json::from_value(body)?)
}

/// Construye un pool a partir de la URL y corre las migraciones pendientes
/// una sola vez.
///
/// Tamaños en cero se ajustan a 1 y `min > max` se recorta a `max`.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let max = max_size.max(1);
    let min = min_size.max(1);
    if min > max {
        warn!("min_size > max_size ({min} > {max}), using min = max");
    }
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(min.min(max)))
                                    .max_size(max)
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
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    let cfg = crate::config::DbConfig::from_env()?;
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}
