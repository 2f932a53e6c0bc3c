use dashmap::DashMap;
use uuid::Uuid;

use super::{DeploymentService, ServiceIdentity};
use crate::errors::StorageError;

/// Persistencia de registros de servicio. Los servicios borrados se
/// conservan (estado `DELETED`) como historial.
pub trait ServiceStore: Send + Sync {
    fn insert(&self, service: &DeploymentService) -> Result<(), StorageError>;
    fn update(&self, service: &DeploymentService) -> Result<(), StorageError>;
    fn get(&self, id: Uuid) -> Result<Option<DeploymentService>, StorageError>;
    /// Servicio no borrado con esa identidad, si existe.
    fn find_active(&self, identity: &ServiceIdentity) -> Result<Option<DeploymentService>, StorageError>;
    /// Todos los servicios ordenados por creación.
    fn list(&self) -> Result<Vec<DeploymentService>, StorageError>;
}

#[derive(Default)]
pub struct InMemoryServiceStore {
    inner: DashMap<Uuid, DeploymentService>,
}

impl InMemoryServiceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ServiceStore for InMemoryServiceStore {
    fn insert(&self, service: &DeploymentService) -> Result<(), StorageError> {
        if self.inner.contains_key(&service.id) {
            return Err(StorageError::AlreadyExists(service.id.to_string()));
        }
        self.inner.insert(service.id, service.clone());
        Ok(())
    }

    fn update(&self, service: &DeploymentService) -> Result<(), StorageError> {
        match self.inner.get_mut(&service.id) {
            Some(mut slot) => {
                *slot = service.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(service.id.to_string())),
        }
    }

    fn get(&self, id: Uuid) -> Result<Option<DeploymentService>, StorageError> {
        Ok(self.inner.get(&id).map(|s| s.value().clone()))
    }

    fn find_active(&self, identity: &ServiceIdentity) -> Result<Option<DeploymentService>, StorageError> {
        Ok(self.inner
               .iter()
               .filter(|s| &s.identity == identity && !s.is_deleted())
               .max_by_key(|s| s.created_at)
               .map(|s| s.value().clone()))
    }

    fn list(&self) -> Result<Vec<DeploymentService>, StorageError> {
        let mut out: Vec<DeploymentService> = self.inner.iter().map(|s| s.value().clone()).collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }
}
