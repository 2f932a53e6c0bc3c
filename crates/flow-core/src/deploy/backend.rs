use async_trait::async_trait;

use super::{BackendServiceStatus, EndpointDescriptor, ServiceIdentity};
use crate::errors::BackendError;
use crate::model::ArtifactVersion;

/// Contrato de un backend de model serving.
#[async_trait]
pub trait ModelDeployerBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn create(&self, model: &ArtifactVersion, identity: &ServiceIdentity)
                    -> Result<EndpointDescriptor, BackendError>;
    /// Sustituye el modelo servido conservando la URL del endpoint.
    async fn update(&self,
                    existing: &EndpointDescriptor,
                    model: &ArtifactVersion)
                    -> Result<EndpointDescriptor, BackendError>;
    async fn status(&self, identity: &ServiceIdentity) -> Result<BackendServiceStatus, BackendError>;
    async fn delete(&self, identity: &ServiceIdentity) -> Result<(), BackendError>;
}
