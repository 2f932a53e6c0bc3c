//! flow-adapters: backends concretos detrás de los contratos del núcleo
//! (artifact stores, execution backends, model deployer) y la tabla de
//! flavors integrados.

pub mod deployer;
pub mod executor;
pub mod manifest;
pub mod store;

pub use deployer::SimulatedModelDeployer;
pub use executor::{InProcessBackend, JobServiceSettings, JobTable, SimulatedJobService};
pub use manifest::{bootstrap, builtin_flavors, register_builtin_flavors};
pub use store::{BucketArtifactStore, LocalArtifactStore};
