//! flow-core: registry de componentes y stacks, materializers, dispatcher de
//! steps y manager de servicios de deployment.
pub mod config;
pub mod constants;
pub mod deploy;
pub mod dispatch;
pub mod errors;
pub mod event;
pub mod hashing;
pub mod lineage;
pub mod materializer;
pub mod model;
pub mod stack;
pub mod step;

pub use config::FlowConfig;
pub use deploy::{DeployConfig, DeploymentService, DeploymentServiceManager, ModelDeployerBackend, ServiceFilter,
                 ServiceIdentity, ServiceState};
pub use dispatch::{cancellation, DispatchConfig, ExecutionBackend, RunOptions, RunReport, StepDispatcher};
pub use errors::{ConfigurationError, DeploymentError, ExecutionError, FlowError, MaterializationError, StorageError};
pub use event::{EventStore, InMemoryEventStore, RunEvent, RunEventKind};
pub use lineage::LineageGraph;
pub use materializer::{Materializer, MaterializerRegistry};
pub use model::{ArtifactCatalog, ArtifactStore, ArtifactValue, ArtifactVersion, DataType, TypedValue};
pub use stack::{ActiveStack, ComponentCategory, ComponentRegistry, FlowContext, Stack, StackComponent};
pub use step::{Pipeline, StepContext, StepSpec, StepStatus};
