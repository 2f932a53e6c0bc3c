//! Pipeline: DAG de steps conectados output -> input.
//!
//! `PipelineBuilder::build` valida nombres únicos, referencias de inputs,
//! compatibilidad de tipos y ausencia de ciclos, y fija un orden topológico
//! determinista (Kahn, desempatando por orden de declaración).
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::StepSpec;
use crate::errors::ConfigurationError;
use crate::hashing::hash_value;

/// Toggles a nivel de pipeline; `None` deja el default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub enable_cache: Option<bool>,
    pub enable_artifact_metadata: Option<bool>,
    pub enable_artifact_visualization: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    pub name: String,
    pub settings: PipelineSettings,
    steps: IndexMap<String, Arc<StepSpec>>,
    order: Vec<String>,
    definition_hash: String,
}

impl Pipeline {
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    pub fn step(&self, name: &str) -> Option<&Arc<StepSpec>> {
        self.steps.get(name)
    }

    /// Steps en orden de declaración.
    pub fn steps(&self) -> impl Iterator<Item = &Arc<StepSpec>> {
        self.steps.values()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// blake3 sobre la descripción canónica de todos los steps.
    pub fn definition_hash(&self) -> &str {
        &self.definition_hash
    }

    pub fn downstream(&self, name: &str) -> Vec<&str> {
        self.steps
            .values()
            .filter(|s| s.inputs.iter().any(|i| i.from_step == name))
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Cierre transitivo aguas abajo de `name` (sin incluirlo).
    pub fn downstream_closure(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([name]);
        while let Some(cur) = queue.pop_front() {
            for next in self.downstream(cur) {
                if seen.insert(next.to_string()) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }
}

pub struct PipelineBuilder {
    name: String,
    settings: PipelineSettings,
    steps: Vec<StepSpec>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(),
               settings: PipelineSettings::default(),
               steps: Vec::new() }
    }

    pub fn step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    pub fn enable_cache(mut self, enabled: bool) -> Self {
        self.settings.enable_cache = Some(enabled);
        self
    }

    pub fn enable_artifact_metadata(mut self, enabled: bool) -> Self {
        self.settings.enable_artifact_metadata = Some(enabled);
        self
    }

    pub fn enable_artifact_visualization(mut self, enabled: bool) -> Self {
        self.settings.enable_artifact_visualization = Some(enabled);
        self
    }

    pub fn build(self) -> Result<Pipeline, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidPipeline { pipeline: self.name.clone(),
                                                                             reason };
        if self.steps.is_empty() {
            return Err(invalid("pipeline has no steps".to_string()));
        }
        let mut steps: IndexMap<String, Arc<StepSpec>> = IndexMap::new();
        for step in &self.steps {
            if steps.insert(step.name.clone(), Arc::new(step.clone())).is_some() {
                return Err(invalid(format!("duplicate step `{}`", step.name)));
            }
            let mut outputs = BTreeSet::new();
            for o in &step.outputs {
                if !outputs.insert(o.name.as_str()) {
                    return Err(invalid(format!("step `{}` declares output `{}` twice", step.name, o.name)));
                }
            }
            let mut inputs = BTreeSet::new();
            for i in &step.inputs {
                if !inputs.insert(i.name.as_str()) {
                    return Err(invalid(format!("step `{}` declares input `{}` twice", step.name, i.name)));
                }
            }
        }
        for step in steps.values() {
            for input in &step.inputs {
                let Some(producer) = steps.get(&input.from_step) else {
                    return Err(invalid(format!("step `{}` reads from unknown step `{}`", step.name, input.from_step)));
                };
                let Some(output) = producer.output_spec(&input.from_output) else {
                    return Err(invalid(format!("step `{}` reads unknown output `{}.{}`",
                                               step.name, input.from_step, input.from_output)));
                };
                if !output.data_type.is_subtype_of(&input.data_type) {
                    return Err(invalid(format!("type mismatch on `{}.{}`: `{}.{}` produces `{}`, expected `{}`",
                                               step.name,
                                               input.name,
                                               input.from_step,
                                               input.from_output,
                                               output.data_type,
                                               input.data_type)));
                }
            }
        }

        let order = topological_order(&steps).ok_or_else(|| invalid("pipeline graph contains a cycle".to_string()))?;
        let description: Vec<_> = steps.values().map(|s| s.describe()).collect();
        let definition_hash = hash_value(&json!({ "pipeline": self.name, "steps": description }));
        Ok(Pipeline { name: self.name.clone(),
                      settings: self.settings.clone(),
                      steps,
                      order,
                      definition_hash })
    }
}

fn topological_order(steps: &IndexMap<String, Arc<StepSpec>>) -> Option<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> =
        steps.values().map(|s| (s.name.as_str(), s.upstream_steps().len())).collect();
    let mut ready: VecDeque<&str> = steps.values()
                                         .filter(|s| in_degree.get(s.name.as_str()) == Some(&0))
                                         .map(|s| s.name.as_str())
                                         .collect();
    let mut order = Vec::with_capacity(steps.len());
    while let Some(cur) = ready.pop_front() {
        order.push(cur.to_string());
        for step in steps.values() {
            if step.upstream_steps().contains(&cur) {
                if let Some(d) = in_degree.get_mut(step.name.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(step.name.as_str());
                    }
                }
            }
        }
    }
    (order.len() == steps.len()).then_some(order)
}
