//! Contrato de execution backend y entorno de ejecución de un step.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{BackendError, MaterializationError};
use crate::materializer::MaterializerRegistry;
use crate::model::{ArtifactStore, ArtifactValue, ArtifactVersion, DataType, ScopedStore, TypedValue};
use crate::step::{StepContext, StepOutputs, StepSpec};

/// Referencia opaca a una ejecución enviada a un backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunHandle {
    pub id: String,
    pub backend: String,
    pub step: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Succeeded,
    Failed(String),
}

/// Input ya resuelto: la `ArtifactVersion` que lo alimenta y el tipo que
/// declara el step consumidor.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInput {
    pub name: String,
    pub data_type: DataType,
    pub artifact: ArtifactVersion,
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn submit(&self,
                    step: Arc<StepSpec>,
                    inputs: Vec<ResolvedInput>,
                    env: ExecutionEnvironment)
                    -> Result<RunHandle, BackendError>;
    async fn poll(&self, handle: &RunHandle) -> Result<JobStatus, BackendError>;
    async fn fetch_logs(&self, handle: &RunHandle) -> Result<Vec<String>, BackendError>;
    async fn cancel(&self, handle: &RunHandle) -> Result<(), BackendError>;
    /// Valores producidos por una ejecución en `SUCCEEDED`.
    async fn collect_outputs(&self, handle: &RunHandle) -> Result<StepOutputs, BackendError>;
    /// El dispatcher ya no va a consultar este job: el backend puede olvidar
    /// su estado. Se llama una vez por handle, con el job en estado terminal
    /// o cancelado.
    async fn release(&self, _handle: &RunHandle) {}
}

/// Fallo del código de usuario, con los logs emitidos hasta ese punto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub cause: String,
    pub logs: Vec<String>,
}

impl StepFailure {
    fn new(cause: impl Into<String>) -> Self {
        Self { cause: cause.into(),
               logs: Vec::new() }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cause)
    }
}

/// Todo lo que un backend necesita para ejecutar un step: acceso al artifact
/// store del stack, snapshot de materializers y las ubicaciones reservadas
/// para outputs no materializados.
#[derive(Clone)]
pub struct ExecutionEnvironment {
    pub run_id: Uuid,
    pub step_name: String,
    pub artifact_store: Arc<dyn ArtifactStore>,
    pub materializers: Arc<MaterializerRegistry>,
    pub raw_output_uris: BTreeMap<String, String>,
    pub params: Value,
}

impl ExecutionEnvironment {
    /// Carga los valores de los inputs. Los artifacts sin materializer llegan
    /// como handle crudo.
    pub fn load_inputs(&self, inputs: &[ResolvedInput]) -> Result<BTreeMap<String, TypedValue>, MaterializationError> {
        let mut out = BTreeMap::new();
        for input in inputs {
            let value = match &input.artifact.materializer {
                None => ArtifactValue::Handle(input.artifact.uri.clone()),
                Some(name) => {
                    let m = self.materializers
                                .get(name)
                                .ok_or_else(|| MaterializationError::UnknownMaterializer(name.clone()))?;
                    let scope = ScopedStore::new(self.artifact_store.as_ref(), input.artifact.uri.clone());
                    m.load(&scope, &input.data_type)?
                }
            };
            out.insert(input.name.clone(), TypedValue { data_type: input.data_type.clone(),
                                                        value });
        }
        Ok(out)
    }

    /// Ejecuta el entrypoint del step en el hilo actual.
    pub fn execute(&self, step: &StepSpec, inputs: &[ResolvedInput]) -> Result<StepOutputs, StepFailure> {
        let values = self.load_inputs(inputs)
                         .map_err(|e| StepFailure::new(format!("failed to load inputs: {e}")))?;
        let mut ctx = StepContext::new(self.run_id,
                                       &self.step_name,
                                       self.params.clone(),
                                       values,
                                       self.raw_output_uris.clone(),
                                       self.artifact_store.clone());
        match step.entrypoint().run(&mut ctx) {
            Ok(()) => Ok(ctx.into_outputs()),
            Err(cause) => Err(StepFailure { cause,
                                            logs: ctx.into_outputs().logs }),
        }
    }
}
