//! flow-persistence
//!
//! Implementaciones Postgres (Diesel + r2d2) de los stores síncronos de
//! `flow-core`: registry de componentes/stacks, catálogo de artifacts, log de
//! eventos de run y registros de servicios de deployment.
//!
//! Módulos:
//! - `pg`: stores sobre Postgres y construcción del pool.
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: carga de configuración desde `.env`.
//! - `schema`: tablas Diesel declaradas a mano.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgArtifactCatalog, PgEventStore, PgPool,
             PgRegistryStore, PgServiceStore, PoolProvider};
