//! Contexto de proceso: registry de componentes, registry de materializers y
//! stack activo.
//!
//! Sustituye a los singletons globales: se inicializa explícitamente y se
//! pasa por referencia al dispatcher y al deployment manager. El stack activo
//! se sustituye atómicamente (`Arc`), así que un run en curso conserva el
//! stack con el que arrancó.
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{info, warn};

use super::{ActiveStack, ComponentRegistry, Stack};
use crate::errors::ConfigurationError;
use crate::materializer::{Materializer, MaterializerRegistry};

pub struct FlowContext {
    registry: RwLock<ComponentRegistry>,
    materializers: RwLock<Arc<MaterializerRegistry>>,
    active: RwLock<Arc<ActiveStack>>,
    default_stack: String,
}

impl FlowContext {
    /// Activa el stack persistido como activo si sigue siendo instanciable;
    /// en otro caso el stack `default_stack`, que debe existir.
    pub fn initialize(registry: ComponentRegistry,
                      materializers: MaterializerRegistry,
                      default_stack: &str)
                      -> Result<Self, ConfigurationError> {
        let fallback = registry.stack_by_name(default_stack)
                               .cloned()
                               .ok_or_else(|| ConfigurationError::UnknownStack(default_stack.to_string()))?;
        let persisted = registry.store()
                                .active_stack()?
                                .and_then(|id| registry.stack(id).cloned());
        let active = match persisted {
            Some(stack) => match registry.instantiate(&stack) {
                Ok(active) => active,
                Err(e) => {
                    warn!("persisted active stack `{}` is unusable ({e}); falling back to `{}`",
                          stack.name, default_stack);
                    registry.instantiate(&fallback)?
                }
            },
            None => registry.instantiate(&fallback)?,
        };
        info!("flow context initialized with stack `{}`", active.name());
        Ok(Self { registry: RwLock::new(registry),
                  materializers: RwLock::new(Arc::new(materializers)),
                  active: RwLock::new(Arc::new(active)),
                  default_stack: default_stack.to_string() })
    }

    pub fn registry(&self) -> RwLockReadGuard<'_, ComponentRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn registry_mut(&self) -> RwLockWriteGuard<'_, ComponentRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn default_stack_name(&self) -> &str {
        &self.default_stack
    }

    /// Instancia y activa `stack`, persistiendo la elección.
    pub fn activate(&self, stack: &Stack) -> Result<Arc<ActiveStack>, ConfigurationError> {
        let registry = self.registry();
        let active = Arc::new(registry.instantiate(stack)?);
        registry.store().set_active_stack(Some(stack.id))?;
        drop(registry);
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = active.clone();
        info!("activated stack `{}` ({})", stack.name, stack.id);
        Ok(active)
    }

    pub fn activate_named(&self, name: &str) -> Result<Arc<ActiveStack>, ConfigurationError> {
        let stack = self.registry()
                        .stack_by_name(name)
                        .cloned()
                        .ok_or_else(|| ConfigurationError::UnknownStack(name.to_string()))?;
        self.activate(&stack)
    }

    /// Vuelve al stack local por defecto.
    pub fn disconnect(&self) -> Result<Arc<ActiveStack>, ConfigurationError> {
        let active = self.activate_named(&self.default_stack)?;
        info!("disconnected; reverted to stack `{}`", self.default_stack);
        Ok(active)
    }

    pub fn active_stack(&self) -> Arc<ActiveStack> {
        self.active.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Snapshot inmutable del registry de materializers.
    pub fn materializers(&self) -> Arc<MaterializerRegistry> {
        self.materializers.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Copy-on-write: los runs en curso siguen viendo su snapshot.
    pub fn register_materializer(&self, materializer: Arc<dyn Materializer>) {
        let mut guard = self.materializers.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = MaterializerRegistry::clone(&guard);
        next.register(materializer);
        *guard = Arc::new(next);
    }
}
