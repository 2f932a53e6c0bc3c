//! Eventos de run (log append-only) y su almacenamiento.

pub mod store;
pub mod types;

pub use store::{EventStore, InMemoryEventStore};
pub use types::{RunEvent, RunEventKind};
