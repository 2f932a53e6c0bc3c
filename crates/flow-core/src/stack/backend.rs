//! Backends instanciados a partir de los componentes de un stack.
//!
//! Cada flavor puede registrar una factory que, dado un componente, produce
//! el adaptador concreto. Las categorías consumidas fuera del núcleo
//! (container registry, image builder) devuelven `BackendHandle::Passive`.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use super::{ComponentCategory, Stack, StackComponent};
use crate::deploy::ModelDeployerBackend;
use crate::dispatch::ExecutionBackend;
use crate::errors::ConfigurationError;
use crate::model::ArtifactStore;

#[derive(Clone)]
pub enum BackendHandle {
    ArtifactStore(Arc<dyn ArtifactStore>),
    Executor(Arc<dyn ExecutionBackend>),
    ModelDeployer(Arc<dyn ModelDeployerBackend>),
    Passive,
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ArtifactStore(s) => format!("ArtifactStore({})", s.root()),
            Self::Executor(e) => format!("Executor({})", e.name()),
            Self::ModelDeployer(d) => format!("ModelDeployer({})", d.name()),
            Self::Passive => "Passive".to_string(),
        };
        f.write_str(&s)
    }
}

pub type FlavorFactory = Arc<dyn Fn(&StackComponent) -> Result<BackendHandle, ConfigurationError> + Send + Sync>;

/// Stack activo: el `Stack` más los backends ya construidos.
pub struct ActiveStack {
    pub stack: Stack,
    pub components: BTreeMap<ComponentCategory, StackComponent>,
    pub artifact_store: Arc<dyn ArtifactStore>,
    pub orchestrator: Arc<dyn ExecutionBackend>,
    pub step_operator: Option<Arc<dyn ExecutionBackend>>,
    pub model_deployer: Option<Arc<dyn ModelDeployerBackend>>,
}

impl ActiveStack {
    pub fn name(&self) -> &str {
        &self.stack.name
    }

    pub fn component(&self, category: ComponentCategory) -> Option<&StackComponent> {
        self.components.get(&category)
    }

    /// Id del componente artifact store; acota el alcance de la cache.
    pub fn artifact_store_id(&self) -> Uuid {
        self.stack.component_id(ComponentCategory::ArtifactStore).unwrap_or_else(Uuid::nil)
    }

    /// Backend que ejecuta un step: el orquestador, salvo que el step pida
    /// un execution backend concreto (por nombre de componente).
    pub fn executor_for(&self,
                        step: &str,
                        requested: Option<&str>)
                        -> Result<Arc<dyn ExecutionBackend>, ConfigurationError> {
        let Some(requested) = requested else {
            return Ok(self.orchestrator.clone());
        };
        let component = self.component(ComponentCategory::ExecutionBackend);
        match (component, &self.step_operator) {
            (Some(c), Some(backend)) if c.name == requested => Ok(backend.clone()),
            _ => Err(ConfigurationError::UnknownExecutionBackend { step: step.to_string(),
                                                                  backend: requested.to_string() }),
        }
    }

    pub fn model_deployer(&self) -> Result<Arc<dyn ModelDeployerBackend>, ConfigurationError> {
        self.model_deployer
            .clone()
            .ok_or(ConfigurationError::MissingCategory(ComponentCategory::ModelDeployer))
    }
}

impl fmt::Debug for ActiveStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveStack")
         .field("stack", &self.stack.name)
         .field("artifact_store", &self.artifact_store.root())
         .field("orchestrator", &self.orchestrator.name())
         .finish()
    }
}
