use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use uuid::Uuid;

use crate::errors::ExecutionError;
use crate::model::ArtifactVersion;
use crate::step::{RunStatus, StepStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub backend: Option<String>,
    pub artifacts: Vec<ArtifactVersion>,
    pub cache_key: Option<String>,
    pub error: Option<ExecutionError>,
}

impl StepRecord {
    pub(crate) fn pending(name: &str) -> Self {
        Self { name: name.to_string(),
               status: StepStatus::Pending,
               backend: None,
               artifacts: Vec::new(),
               cache_key: None,
               error: None }
    }

    pub fn artifact(&self, output: &str) -> Option<&ArtifactVersion> {
        self.artifacts.iter().find(|a| a.output_name == output)
    }
}

/// Resultado de un run: estado global y registro por step en orden
/// topológico.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: String,
    pub stack: String,
    pub status: RunStatus,
    pub steps: IndexMap<String, StepRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.get(name)
    }

    pub fn status_of(&self, name: &str) -> Option<StepStatus> {
        self.steps.get(name).map(|s| s.status)
    }

    pub fn artifact(&self, step: &str, output: &str) -> Option<&ArtifactVersion> {
        self.steps.get(step).and_then(|s| s.artifact(output))
    }

    pub fn artifacts(&self) -> Vec<&ArtifactVersion> {
        self.steps.values().flat_map(|s| s.artifacts.iter()).collect()
    }

    pub fn failures(&self) -> Vec<&ExecutionError> {
        self.steps.values().filter_map(|s| s.error.as_ref()).collect()
    }
}
