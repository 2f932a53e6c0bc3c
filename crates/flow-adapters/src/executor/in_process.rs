//! Executor local: corre el entrypoint en el pool bloqueante de tokio.
use std::sync::Arc;

use async_trait::async_trait;
use flow_core::dispatch::{ExecutionBackend, ExecutionEnvironment, JobStatus, ResolvedInput, RunHandle, StepFailure};
use flow_core::errors::BackendError;
use flow_core::step::{StepOutputs, StepSpec};
use log::debug;

use super::JobTable;

pub struct InProcessBackend {
    name: String,
    table: Arc<JobTable>,
}

impl InProcessBackend {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self { table: Arc::new(JobTable::new(name.clone())),
               name }
    }
}

#[async_trait]
impl ExecutionBackend for InProcessBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self,
                    step: Arc<StepSpec>,
                    inputs: Vec<ResolvedInput>,
                    env: ExecutionEnvironment)
                    -> Result<RunHandle, BackendError> {
        let id = self.table.allocate(&step.name);
        let handle = RunHandle { id: id.clone(),
                                 backend: self.name.clone(),
                                 step: step.name.clone() };
        let table = self.table.clone();
        tokio::spawn(async move {
            if !table.start(&id) {
                return;
            }
            let result = match tokio::task::spawn_blocking(move || env.execute(&step, &inputs)).await {
                Ok(result) => result,
                Err(e) => Err(StepFailure { cause: format!("step panicked: {e}"),
                                            logs: Vec::new() }),
            };
            table.complete(&id, result);
        });
        debug!("{}: submitted {}", self.name, handle.id);
        Ok(handle)
    }

    async fn poll(&self, handle: &RunHandle) -> Result<JobStatus, BackendError> {
        self.table.status(&handle.id)
    }

    async fn fetch_logs(&self, handle: &RunHandle) -> Result<Vec<String>, BackendError> {
        self.table.logs(&handle.id)
    }

    async fn cancel(&self, handle: &RunHandle) -> Result<(), BackendError> {
        self.table.cancel(&handle.id)
    }

    async fn collect_outputs(&self, handle: &RunHandle) -> Result<StepOutputs, BackendError> {
        self.table.outputs(&handle.id)
    }

    async fn release(&self, handle: &RunHandle) {
        self.table.release(&handle.id);
    }
}
