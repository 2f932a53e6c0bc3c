//! Contexto que recibe el entrypoint de un step durante su ejecución.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::model::{ArtifactStore, ArtifactValue, TypedValue};

pub struct StepContext {
    pub run_id: Uuid,
    pub step_name: String,
    params: Value,
    inputs: BTreeMap<String, TypedValue>,
    outputs: BTreeMap<String, ArtifactValue>,
    raw_output_uris: BTreeMap<String, String>,
    artifact_store: Arc<dyn ArtifactStore>,
    logs: Vec<String>,
}

impl StepContext {
    pub fn new(run_id: Uuid,
               step_name: impl Into<String>,
               params: Value,
               inputs: BTreeMap<String, TypedValue>,
               raw_output_uris: BTreeMap<String, String>,
               artifact_store: Arc<dyn ArtifactStore>)
               -> Self {
        Self { run_id,
               step_name: step_name.into(),
               params,
               inputs,
               outputs: BTreeMap::new(),
               raw_output_uris,
               artifact_store,
               logs: Vec::new() }
    }

    pub fn input(&self, name: &str) -> Result<&ArtifactValue, String> {
        self.inputs
            .get(name)
            .map(|t| &t.value)
            .ok_or_else(|| format!("missing input `{name}`"))
    }

    pub fn typed_input(&self, name: &str) -> Option<&TypedValue> {
        self.inputs.get(name)
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn set_output(&mut self, name: impl Into<String>, value: ArtifactValue) {
        self.outputs.insert(name.into(), value);
    }

    /// Escribe bytes crudos en la ubicación reservada para un output no
    /// materializado y lo publica como handle.
    pub fn write_raw_output(&mut self, name: &str, bytes: &[u8]) -> Result<String, String> {
        let uri = self.raw_output_uris
                      .get(name)
                      .cloned()
                      .ok_or_else(|| format!("output `{name}` is not declared unmaterialized"))?;
        self.artifact_store.write(&uri, bytes).map_err(|e| e.to_string())?;
        self.outputs.insert(name.to_string(), ArtifactValue::Handle(uri.clone()));
        Ok(uri)
    }

    /// Lee el contenido de un input no materializado (handle crudo).
    pub fn read_raw_input(&self, name: &str) -> Result<Vec<u8>, String> {
        let uri = self.input(name)?
                      .as_handle()
                      .ok_or_else(|| format!("input `{name}` is not a raw handle"))?;
        self.artifact_store.read(uri).map_err(|e| e.to_string())
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    pub fn into_outputs(self) -> StepOutputs {
        StepOutputs { values: self.outputs,
                      logs: self.logs }
    }
}

/// Resultado de la ejecución de un step, tal como lo entrega el backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutputs {
    pub values: BTreeMap<String, ArtifactValue>,
    pub logs: Vec<String>,
}
