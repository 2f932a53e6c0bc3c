//! Definición inmutable de un step: inputs/outputs tipados, parámetros,
//! settings y entrypoint.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::StepContext;
use crate::model::DataType;

/// Input con nombre, alimentado por el output `from_output` del step
/// `from_step`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub data_type: DataType,
    pub from_step: String,
    pub from_output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    pub data_type: DataType,
    /// Materializer explícito; si es `None` se resuelve por tipo.
    pub materializer: Option<String>,
    /// `false`: se pasa aguas abajo como handle crudo, sin serialización.
    pub materialize: bool,
}

impl OutputSpec {
    pub fn new(name: impl Into<String>, data_type: impl Into<DataType>) -> Self {
        Self { name: name.into(),
               data_type: data_type.into(),
               materializer: None,
               materialize: true }
    }

    pub fn unmaterialized(name: impl Into<String>, data_type: impl Into<DataType>) -> Self {
        Self { materialize: false,
               ..Self::new(name, data_type) }
    }

    pub fn with_materializer(mut self, name: impl Into<String>) -> Self {
        self.materializer = Some(name.into());
        self
    }
}

/// Settings opcionales; `None` hereda del pipeline (y éste del default).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSettings {
    pub enable_cache: Option<bool>,
    pub enable_artifact_metadata: Option<bool>,
    pub enable_artifact_visualization: Option<bool>,
    pub timeout: Option<Duration>,
    /// Nombre del componente execution-backend que ejecuta este step en
    /// lugar del orquestador.
    pub execution_backend: Option<String>,
}

/// Código de usuario de un step. Debe ser determinista respecto a inputs y
/// parámetros para que la cache sea válida.
pub trait StepEntrypoint: Send + Sync {
    /// Versión del código; forma parte de la clave de cache.
    fn code_version(&self) -> String {
        "0".to_string()
    }

    fn run(&self, ctx: &mut StepContext) -> Result<(), String>;
}

struct FnEntrypoint<F> {
    version: String,
    f: F,
}

impl<F> StepEntrypoint for FnEntrypoint<F> where F: Fn(&mut StepContext) -> Result<(), String> + Send + Sync
{
    fn code_version(&self) -> String {
        self.version.clone()
    }

    fn run(&self, ctx: &mut StepContext) -> Result<(), String> {
        (self.f)(ctx)
    }
}

/// Entrypoint a partir de un closure.
pub fn step_fn<F>(code_version: impl Into<String>, f: F) -> Arc<dyn StepEntrypoint>
    where F: Fn(&mut StepContext) -> Result<(), String> + Send + Sync + 'static
{
    Arc::new(FnEntrypoint { version: code_version.into(),
                            f })
}

#[derive(Clone)]
pub struct StepSpec {
    pub name: String,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
    pub params: Value,
    pub settings: StepSettings,
    entrypoint: Arc<dyn StepEntrypoint>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, entrypoint: Arc<dyn StepEntrypoint>) -> Self {
        Self { name: name.into(),
               inputs: Vec::new(),
               outputs: Vec::new(),
               params: json!({}),
               settings: StepSettings::default(),
               entrypoint }
    }

    pub fn input(mut self,
                 name: impl Into<String>,
                 data_type: impl Into<DataType>,
                 from_step: impl Into<String>,
                 from_output: impl Into<String>)
                 -> Self {
        self.inputs.push(InputSpec { name: name.into(),
                                     data_type: data_type.into(),
                                     from_step: from_step.into(),
                                     from_output: from_output.into() });
        self
    }

    pub fn output(mut self, output: OutputSpec) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn settings(mut self, settings: StepSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn enable_cache(mut self, enabled: bool) -> Self {
        self.settings.enable_cache = Some(enabled);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = Some(timeout);
        self
    }

    pub fn on_execution_backend(mut self, component: impl Into<String>) -> Self {
        self.settings.execution_backend = Some(component.into());
        self
    }

    pub fn entrypoint(&self) -> &Arc<dyn StepEntrypoint> {
        &self.entrypoint
    }

    pub fn code_version(&self) -> String {
        self.entrypoint.code_version()
    }

    pub fn output_spec(&self, name: &str) -> Option<&OutputSpec> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// Steps de los que depende directamente, sin duplicados.
    pub fn upstream_steps(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for i in &self.inputs {
            if !out.contains(&i.from_step.as_str()) {
                out.push(&i.from_step);
            }
        }
        out
    }

    /// Descripción canónica (sin entrypoint) usada en hashes de definición.
    pub fn describe(&self) -> Value {
        json!({
            "name": self.name,
            "inputs": self.inputs,
            "outputs": self.outputs,
            "params": self.params,
            "code_version": self.code_version(),
        })
    }
}

impl fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepSpec")
         .field("name", &self.name)
         .field("inputs", &self.inputs)
         .field("outputs", &self.outputs)
         .field("params", &self.params)
         .field("settings", &self.settings)
         .finish()
    }
}
