//! Servicios de model serving: ciclo de vida, contrato de backend, store y
//! manager con cola por identidad.

pub mod backend;
pub mod manager;
pub mod service;
pub mod state;
pub mod store;

pub use backend::ModelDeployerBackend;
pub use manager::{DeployConfig, DeploymentServiceManager};
pub use service::{BackendServiceStatus, DeploymentService, EndpointDescriptor, ServiceFilter, ServiceIdentity};
pub use state::ServiceState;
pub use store::{InMemoryServiceStore, ServiceStore};
