//! Tabla de jobs compartida por los executors en proceso.
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use flow_core::dispatch::{JobStatus, StepFailure};
use flow_core::errors::BackendError;
use flow_core::step::StepOutputs;
use log::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed(String),
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_) | Self::Cancelled)
    }
}

#[derive(Debug)]
struct JobEntry {
    state: JobState,
    outputs: Option<StepOutputs>,
    logs: Vec<String>,
}

#[derive(Debug)]
pub struct JobTable {
    prefix: String,
    next: AtomicU64,
    jobs: DashMap<String, JobEntry>,
}

impl JobTable {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(),
               next: AtomicU64::new(1),
               jobs: DashMap::new() }
    }

    /// Reserva un id nuevo en estado `Queued`.
    pub fn allocate(&self, step: &str) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let id = format!("{}-{step}-{n}", self.prefix);
        self.jobs.insert(id.clone(),
                         JobEntry { state: JobState::Queued,
                                    outputs: None,
                                    logs: Vec::new() });
        id
    }

    pub fn state(&self, id: &str) -> Option<JobState> {
        self.jobs.get(id).map(|j| j.state.clone())
    }

    /// Marca `Running` salvo que el job ya haya terminado (p. ej. cancelado).
    pub fn start(&self, id: &str) -> bool {
        match self.jobs.get_mut(id) {
            Some(mut job) if job.state == JobState::Queued => {
                job.state = JobState::Running;
                true
            }
            _ => false,
        }
    }

    /// Registra el resultado. Un job cancelado descarta lo que llegue tarde.
    pub fn complete(&self, id: &str, result: Result<StepOutputs, StepFailure>) {
        let Some(mut job) = self.jobs.get_mut(id) else { return };
        if job.state.is_terminal() {
            debug!("job {id}: late result discarded ({:?})", job.state);
            return;
        }
        match result {
            Ok(outputs) => {
                job.logs = outputs.logs.clone();
                job.outputs = Some(outputs);
                job.state = JobState::Succeeded;
            }
            Err(failure) => {
                job.logs = failure.logs;
                job.state = JobState::Failed(failure.cause);
            }
        }
    }

    pub fn cancel(&self, id: &str) -> Result<(), BackendError> {
        let mut job = self.jobs.get_mut(id).ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        if !job.state.is_terminal() {
            job.state = JobState::Cancelled;
        }
        Ok(())
    }

    pub fn status(&self, id: &str) -> Result<JobStatus, BackendError> {
        let job = self.jobs.get(id).ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        Ok(match &job.state {
            JobState::Queued | JobState::Running => JobStatus::Running,
            JobState::Succeeded => JobStatus::Succeeded,
            JobState::Failed(cause) => JobStatus::Failed(cause.clone()),
            JobState::Cancelled => JobStatus::Failed("cancelled".to_string()),
        })
    }

    pub fn logs(&self, id: &str) -> Result<Vec<String>, BackendError> {
        self.jobs
            .get(id)
            .map(|j| j.logs.clone())
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }

    /// Olvida un job. Un resultado que llegue después se descarta.
    pub fn release(&self, id: &str) {
        if self.jobs.remove(id).is_some() {
            debug!("job {id}: released");
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn outputs(&self, id: &str) -> Result<StepOutputs, BackendError> {
        let job = self.jobs.get(id).ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        job.outputs
           .clone()
           .ok_or_else(|| BackendError::Permanent(format!("job {id} has no outputs ({:?})", job.state)))
    }
}
