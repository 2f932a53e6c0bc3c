//! stackflow
//!
//! Librería fachada del workspace:
//! - `core`: registry de componentes y stacks, materializers, dispatcher de
//!   steps y manager de servicios de deployment.
//! - `adapters`: backends concretos y la tabla de flavors integrados.
//! - `persistence`: stores durables sobre Postgres.
//!
//! `local_context` arma el contexto que usan el binario demo y los tests de
//! integración.

use std::sync::Arc;

pub use flow_adapters as adapters;
pub use flow_core as core;
pub use flow_persistence as persistence;

use flow_core::stack::{InMemoryRegistryStore, RegistryStore};
use flow_core::{ComponentRegistry, ConfigurationError, FlowConfig, FlowContext, MaterializerRegistry};

/// Contexto con los flavors integrados y el stack `default` activo, sobre el
/// store de registry indicado.
pub fn context_with_store(store: Arc<dyn RegistryStore>, cfg: &FlowConfig) -> Result<FlowContext, ConfigurationError> {
    let mut registry = ComponentRegistry::new(store);
    let default = flow_adapters::bootstrap(&mut registry, cfg)?;
    FlowContext::initialize(registry, MaterializerRegistry::with_builtins(), &default.name)
}

/// Igual que `context_with_store`, con un registry en memoria.
pub fn local_context(cfg: &FlowConfig) -> Result<FlowContext, ConfigurationError> {
    context_with_store(Arc::new(InMemoryRegistryStore::new()), cfg)
}
