use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ExecutionError;
use crate::step::RunStatus;

/// Evento append-only del log de un Run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub seq: u64,
    pub run_id: Uuid,
    pub kind: RunEventKind,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEventKind {
    RunStarted {
        pipeline: String,
        stack: String,
        definition_hash: String,
    },
    StepSubmitted {
        step: String,
        backend: String,
    },
    StepSucceeded {
        step: String,
        inputs: Vec<Uuid>,
        artifacts: Vec<Uuid>,
    },
    StepCached {
        step: String,
        cache_key: String,
        inputs: Vec<Uuid>,
        artifacts: Vec<Uuid>,
    },
    StepFailed {
        step: String,
        error: ExecutionError,
    },
    StepSkipped {
        step: String,
        failed_upstream: String,
    },
    StepCancelled {
        step: String,
    },
    StepLogs {
        step: String,
        lines: Vec<String>,
    },
    RunFinished {
        status: RunStatus,
    },
}

impl RunEventKind {
    /// Step al que se refiere el evento (`None` para eventos de run).
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::RunStarted { .. } | Self::RunFinished { .. } => None,
            Self::StepSubmitted { step, .. }
            | Self::StepSucceeded { step, .. }
            | Self::StepCached { step, .. }
            | Self::StepFailed { step, .. }
            | Self::StepSkipped { step, .. }
            | Self::StepCancelled { step }
            | Self::StepLogs { step, .. } => Some(step),
        }
    }
}
