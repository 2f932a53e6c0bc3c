//! Taxonomía de errores del núcleo.
//!
//! - `ConfigurationError`: setup inválido de componentes/stacks/pipelines. Se
//!   reporta de inmediato y nunca se reintenta.
//! - `ExecutionError`: fallo de submit/poll/ejecución de un step. Incluye
//!   `TimeoutExceeded` y los fallos de materialización del step.
//! - `MaterializationError`: tipo incompatible o fallo de serialización.
//! - `DeploymentError`: operaciones sobre servicios de inferencia.
//! - `StorageError`: contratos de almacenamiento (bytes, catálogo, stores).
//!
//! Los errores que viajan dentro de eventos de run son serializables y sólo
//! llevan causas en texto.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::deploy::ServiceState;
use crate::stack::ComponentCategory;

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigurationError {
    #[error("flavor `{category}:{name}` is already registered")]
    DuplicateFlavor { category: ComponentCategory, name: String },
    #[error("unknown flavor `{0}`")]
    UnknownFlavor(String),
    #[error("invalid configuration for flavor `{flavor}`, offending fields: {fields:?}")]
    InvalidConfiguration { flavor: String, fields: Vec<String> },
    #[error("component name `{0}` is already registered")]
    DuplicateComponent(String),
    #[error("unknown component `{0}`")]
    UnknownComponent(String),
    #[error("stack `{stack}` declares more than one {category} component")]
    DuplicateCategory { stack: String, category: ComponentCategory },
    #[error("stack `{stack}` is missing required categories {missing:?}")]
    IncompleteStack { stack: String, missing: Vec<ComponentCategory> },
    #[error("stack `{stack}` has incompatible components: {reason}")]
    IncompatibleComponents { stack: String, reason: String },
    #[error("unknown stack `{0}`")]
    UnknownStack(String),
    #[error("flavor `{flavor}` cannot provide a {category} backend")]
    MissingBackend { flavor: String, category: ComponentCategory },
    #[error("active stack has no {0} component")]
    MissingCategory(ComponentCategory),
    #[error("invalid pipeline `{pipeline}`: {reason}")]
    InvalidPipeline { pipeline: String, reason: String },
    #[error("step `{step}` requests execution backend `{backend}`, which is not part of the active stack")]
    UnknownExecutionBackend { step: String, backend: String },
    #[error("registry store failure: {0}")]
    Store(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists (write-once): {0}")]
    AlreadyExists(String),
    #[error("location `{0}` escapes its artifact scope")]
    OutOfScope(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<StorageError> for ConfigurationError {
    fn from(err: StorageError) -> Self {
        Self::Store(err.to_string())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterializationError {
    #[error("materializer `{materializer}` does not handle type `{data_type}`")]
    TypeMismatch { materializer: String, data_type: String },
    #[error("unknown materializer `{0}`")]
    UnknownMaterializer(String),
    #[error("materializer `{materializer}` cannot handle a `{found}` value")]
    UnsupportedValue { materializer: String, found: String },
    #[error("serialization failure in `{materializer}`: {cause}")]
    Serialization { materializer: String, cause: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionError {
    #[error("step `{step}`: submission to `{backend}` failed: {cause}")]
    Submission { step: String, backend: String, cause: String },
    #[error("step `{step}`: polling `{backend}` failed: {cause}")]
    Poll { step: String, backend: String, cause: String },
    #[error("step `{step}` failed on `{backend}`: {cause}")]
    StepFailed { step: String, backend: String, cause: String },
    #[error("step `{step}` exceeded its timeout of {timeout_ms} ms")]
    TimeoutExceeded { step: String, timeout_ms: u64 },
    #[error("step `{step}` was cancelled")]
    Cancelled { step: String },
    #[error("step `{step}`: {source}")]
    Materialization {
        step: String,
        #[source]
        source: MaterializationError,
    },
    #[error("step `{step}` task aborted: {cause}")]
    Aborted { step: String, cause: String },
}

impl ExecutionError {
    /// Step propietario del error.
    pub fn step(&self) -> &str {
        match self {
            Self::Submission { step, .. }
            | Self::Poll { step, .. }
            | Self::StepFailed { step, .. }
            | Self::TimeoutExceeded { step, .. }
            | Self::Cancelled { step }
            | Self::Materialization { step, .. }
            | Self::Aborted { step, .. } => step,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutExceeded { .. })
    }
}

/// Fallos reportados por adaptadores de backend (ejecución y deployers).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Fallo de lectura transitorio; el llamador puede reintentar.
    #[error("transient backend failure: {0}")]
    Transient(String),
    #[error("backend failure: {0}")]
    Permanent(String),
    #[error("unknown backend reference `{0}`")]
    NotFound(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeploymentError {
    #[error("deployment service `{0}` not found")]
    ServiceNotFound(Uuid),
    #[error("deployment backend error for `{identity}`: {cause}")]
    Backend { identity: String, cause: String },
    #[error("artifact `{artifact}` of type `{data_type}` is not a model")]
    NotAModel { artifact: Uuid, data_type: String },
    #[error("service `{identity}` did not reach RUNNING within {timeout_ms} ms")]
    StartupTimeout { identity: String, timeout_ms: u64 },
    #[error("service `{identity}`: invalid transition {from} -> {to}")]
    InvalidTransition { identity: String, from: ServiceState, to: ServiceState },
    #[error("service `{0}` has no endpoint yet")]
    NoEndpoint(Uuid),
    #[error(transparent)]
    Store(#[from] StorageError),
}

/// Error paraguas para APIs que cruzan subsistemas.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Materialization(#[from] MaterializationError),
    #[error(transparent)]
    Deployment(#[from] DeploymentError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
