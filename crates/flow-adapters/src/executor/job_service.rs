//! Servicio de jobs remoto simulado.
//!
//! Se comporta como un execution backend remoto: los jobs esperan en cola
//! `startup_delay` antes de arrancar y, opcionalmente, una de cada
//! `flaky_every` consultas de estado falla de forma transitoria.
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flow_core::dispatch::{ExecutionBackend, ExecutionEnvironment, JobStatus, ResolvedInput, RunHandle, StepFailure};
use flow_core::errors::BackendError;
use flow_core::step::{StepOutputs, StepSpec};
use log::{debug, info};

use super::JobTable;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobServiceSettings {
    pub startup_delay: Duration,
    /// Cada cuántas consultas de estado se simula un fallo transitorio.
    pub flaky_every: Option<u32>,
    pub region: Option<String>,
}

pub struct SimulatedJobService {
    name: String,
    settings: JobServiceSettings,
    table: Arc<JobTable>,
    polls: AtomicU32,
}

impl SimulatedJobService {
    pub fn new(name: impl Into<String>, settings: JobServiceSettings) -> Self {
        let name = name.into();
        Self { table: Arc::new(JobTable::new(name.clone())),
               name,
               settings,
               polls: AtomicU32::new(0) }
    }

    pub fn settings(&self) -> &JobServiceSettings {
        &self.settings
    }
}

#[async_trait]
impl ExecutionBackend for SimulatedJobService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self,
                    step: Arc<StepSpec>,
                    inputs: Vec<ResolvedInput>,
                    env: ExecutionEnvironment)
                    -> Result<RunHandle, BackendError> {
        let id = self.table.allocate(&step.name);
        info!("{}: job {id} queued (region {})",
              self.name,
              self.settings.region.as_deref().unwrap_or("default"));
        let handle = RunHandle { id: id.clone(),
                                 backend: self.name.clone(),
                                 step: step.name.clone() };
        let table = self.table.clone();
        let delay = self.settings.startup_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !table.start(&id) {
                debug!("job {id} cancelled before start");
                return;
            }
            let result = match tokio::task::spawn_blocking(move || env.execute(&step, &inputs)).await {
                Ok(result) => result,
                Err(e) => Err(StepFailure { cause: format!("job crashed: {e}"),
                                            logs: Vec::new() }),
            };
            table.complete(&id, result);
        });
        Ok(handle)
    }

    async fn poll(&self, handle: &RunHandle) -> Result<JobStatus, BackendError> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(every) = self.settings.flaky_every.filter(|e| *e > 0) {
            if n % every == 0 {
                return Err(BackendError::Transient(format!("status endpoint unavailable (poll {n})")));
            }
        }
        self.table.status(&handle.id)
    }

    async fn fetch_logs(&self, handle: &RunHandle) -> Result<Vec<String>, BackendError> {
        self.table.logs(&handle.id)
    }

    async fn cancel(&self, handle: &RunHandle) -> Result<(), BackendError> {
        info!("{}: cancelling job {}", self.name, handle.id);
        self.table.cancel(&handle.id)
    }

    async fn collect_outputs(&self, handle: &RunHandle) -> Result<StepOutputs, BackendError> {
        self.table.outputs(&handle.id)
    }

    async fn release(&self, handle: &RunHandle) {
        self.table.release(&handle.id);
    }
}
