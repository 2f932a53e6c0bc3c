//! Persistencia de componentes, stacks y stack activo.
use std::sync::Mutex;

use dashmap::DashMap;
use uuid::Uuid;

use super::{Stack, StackComponent};
use crate::errors::StorageError;

pub trait RegistryStore: Send + Sync {
    fn save_component(&self, component: &StackComponent) -> Result<(), StorageError>;
    fn load_components(&self) -> Result<Vec<StackComponent>, StorageError>;
    fn save_stack(&self, stack: &Stack) -> Result<(), StorageError>;
    fn load_stacks(&self) -> Result<Vec<Stack>, StorageError>;
    fn set_active_stack(&self, stack_id: Option<Uuid>) -> Result<(), StorageError>;
    fn active_stack(&self) -> Result<Option<Uuid>, StorageError>;
}

#[derive(Default)]
pub struct InMemoryRegistryStore {
    components: DashMap<Uuid, StackComponent>,
    stacks: DashMap<Uuid, Stack>,
    active: Mutex<Option<Uuid>>,
}

impl InMemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistryStore for InMemoryRegistryStore {
    fn save_component(&self, component: &StackComponent) -> Result<(), StorageError> {
        self.components.insert(component.id, component.clone());
        Ok(())
    }

    fn load_components(&self) -> Result<Vec<StackComponent>, StorageError> {
        let mut out: Vec<StackComponent> = self.components.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|c| c.created_at);
        Ok(out)
    }

    fn save_stack(&self, stack: &Stack) -> Result<(), StorageError> {
        self.stacks.insert(stack.id, stack.clone());
        Ok(())
    }

    fn load_stacks(&self) -> Result<Vec<Stack>, StorageError> {
        let mut out: Vec<Stack> = self.stacks.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    fn set_active_stack(&self, stack_id: Option<Uuid>) -> Result<(), StorageError> {
        *self.active.lock().map_err(|e| StorageError::Backend(e.to_string()))? = stack_id;
        Ok(())
    }

    fn active_stack(&self) -> Result<Option<Uuid>, StorageError> {
        Ok(*self.active.lock().map_err(|e| StorageError::Backend(e.to_string()))?)
    }
}
