//! Step dispatcher.
//!
//! Procesa el DAG de un pipeline contra el stack activo: lanza los steps
//! listos (todos sus inputs existen y están completos) como tareas
//! independientes, cada una con su propio loop de polling contra su backend,
//! y materializa los outputs de los steps que terminan en `SUCCEEDED`.
//!
//! Garantías:
//! - un step sólo arranca cuando todas sus `ArtifactVersion` de entrada
//!   están registradas;
//! - las filas de un step se registran sólo después de que todos sus outputs
//!   se guardaron; si alguno falla se borra lo escrito y no se registra nada;
//! - un fallo marca todo el cierre aguas abajo como
//!   `SKIPPED_UPSTREAM_FAILURE`;
//! - un step cancelado no materializa outputs;
//! - una tarea que termina sin reportar resultado (panic del backend) deja
//!   su step en `FAILED`, nunca en `RUNNING`.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use super::{cache_key, resolve_toggle, Backoff, CancelSignal, DispatchConfig, ExecutionBackend, ExecutionEnvironment,
            JobStatus, ResolvedInput, RunHandle, RunOptions, RunReport, StepRecord};
use crate::errors::{ExecutionError, FlowError, MaterializationError};
use crate::event::{EventStore, RunEventKind};
use crate::hashing::sha256_hex;
use crate::materializer::MaterializerRegistry;
use crate::model::{ArtifactCatalog, ArtifactStore, ArtifactValue, ArtifactVersion, ScopedStore};
use crate::stack::FlowContext;
use crate::step::{OutputSpec, Pipeline, RunStatus, StepOutputs, StepSpec, StepStatus};

/// Líneas de log que se anexan a la causa de un fallo.
const LOG_TAIL_LINES: usize = 5;

pub struct StepDispatcher<'a> {
    ctx: &'a FlowContext,
    catalog: Arc<dyn ArtifactCatalog>,
    events: Arc<dyn EventStore>,
    config: DispatchConfig,
}

enum StepOutcome {
    Succeeded {
        artifacts: Vec<ArtifactVersion>,
        cache_key: Option<String>,
    },
    Cached {
        artifacts: Vec<ArtifactVersion>,
        cache_key: String,
    },
    Failed(ExecutionError),
}

impl<'a> StepDispatcher<'a> {
    pub fn new(ctx: &'a FlowContext,
               catalog: Arc<dyn ArtifactCatalog>,
               events: Arc<dyn EventStore>,
               config: DispatchConfig)
               -> Self {
        Self { ctx,
               catalog,
               events,
               config }
    }

    pub async fn run(&self, pipeline: &Pipeline, options: RunOptions) -> Result<RunReport, FlowError> {
        self.run_with_cancel(pipeline, options, CancelSignal::never()).await
    }

    /// Ejecuta un run completo. Sólo devuelve `Err` por errores de
    /// configuración detectados antes de arrancar; los fallos de steps quedan
    /// en el `RunReport`.
    pub async fn run_with_cancel(&self,
                                 pipeline: &Pipeline,
                                 options: RunOptions,
                                 cancel: CancelSignal)
                                 -> Result<RunReport, FlowError> {
        let stack = self.ctx.active_stack();
        let materializers = self.ctx.materializers();

        // Validación previa: todo step debe tener backend en el stack activo.
        let mut executors: HashMap<String, Arc<dyn ExecutionBackend>> = HashMap::new();
        for step in pipeline.steps() {
            let executor = stack.executor_for(&step.name, step.settings.execution_backend.as_deref())?;
            executors.insert(step.name.clone(), executor);
        }

        let run_id = options.run_id.unwrap_or_else(Uuid::new_v4);
        let started_at = Utc::now();
        info!("run {run_id}: pipeline `{}` on stack `{}`", pipeline.name, stack.name());
        self.emit(run_id,
                  RunEventKind::RunStarted { pipeline: pipeline.name.clone(),
                                             stack: stack.name().to_string(),
                                             definition_hash: pipeline.definition_hash().to_string() });

        let mut records: IndexMap<String, StepRecord> =
            pipeline.topological_order().iter().map(|n| (n.clone(), StepRecord::pending(n))).collect();
        let mut produced: HashMap<(String, String), ArtifactVersion> = HashMap::new();
        let mut tasks: JoinSet<(String, StepOutcome)> = JoinSet::new();
        let mut in_flight: BTreeSet<String> = BTreeSet::new();
        let mut lost_causes: Vec<String> = Vec::new();
        let artifact_store_id = stack.artifact_store_id();

        loop {
            if !cancel.is_cancelled() {
                for name in pipeline.topological_order() {
                    if tasks.len() >= self.config.max_parallel {
                        break;
                    }
                    let Some(step) = pipeline.step(name) else { continue };
                    if !self.is_ready(step, &records) {
                        continue;
                    }
                    let Some(executor) = executors.get(name).cloned() else { continue };
                    let inputs = resolve_inputs(step, &produced);
                    let job = StepJob { run_id,
                                        step: step.clone(),
                                        inputs,
                                        executor: executor.clone(),
                                        artifact_store: stack.artifact_store.clone(),
                                        artifact_store_id,
                                        materializers: materializers.clone(),
                                        catalog: self.catalog.clone(),
                                        events: self.events.clone(),
                                        config: self.config.clone(),
                                        cancel: cancel.clone(),
                                        cache: resolve_toggle(options.enable_cache,
                                                              step.settings.enable_cache,
                                                              pipeline.settings.enable_cache,
                                                              false),
                                        metadata: resolve_toggle(options.enable_artifact_metadata,
                                                                 step.settings.enable_artifact_metadata,
                                                                 pipeline.settings.enable_artifact_metadata,
                                                                 true),
                                        visualization: resolve_toggle(options.enable_artifact_visualization,
                                                                      step.settings.enable_artifact_visualization,
                                                                      pipeline.settings.enable_artifact_visualization,
                                                                      true) };
                    if let Some(record) = records.get_mut(name) {
                        record.status = StepStatus::Running;
                        record.backend = Some(executor.name().to_string());
                    }
                    in_flight.insert(name.clone());
                    let step_name = name.clone();
                    tasks.spawn(async move { (step_name, job.run().await) });
                    debug!("run {run_id}: launched step `{name}` on `{}`", executor.name());
                }
            }

            let Some(joined) = tasks.join_next().await else {
                if in_flight.is_empty() {
                    break;
                }
                // Sin tareas vivas, lo que sigue en vuelo es lo que se perdió.
                let cause = lost_causes.join("; ");
                lost_causes.clear();
                for name in std::mem::take(&mut in_flight) {
                    let outcome = StepOutcome::Failed(ExecutionError::Aborted { step: name.clone(),
                                                                                cause: cause.clone() });
                    self.apply_outcome(run_id, pipeline, &name, outcome, &mut records, &mut produced);
                }
                continue;
            };
            match joined {
                Ok((name, outcome)) => {
                    in_flight.remove(&name);
                    self.apply_outcome(run_id, pipeline, &name, outcome, &mut records, &mut produced);
                }
                Err(e) => {
                    error!("run {run_id}: step task ended without an outcome: {e}");
                    lost_causes.push(e.to_string());
                }
            }
        }

        // Lo que no llegó a lanzarse en un run cancelado queda cancelado.
        for record in records.values_mut().filter(|r| r.status == StepStatus::Pending) {
            record.status = StepStatus::Cancelled;
            self.emit(run_id, RunEventKind::StepCancelled { step: record.name.clone() });
        }

        let status = if records.values().any(|r| r.status == StepStatus::Failed) {
            RunStatus::Failed
        } else if records.values().any(|r| r.status == StepStatus::Cancelled) {
            RunStatus::Cancelled
        } else {
            RunStatus::Succeeded
        };
        self.emit(run_id, RunEventKind::RunFinished { status });
        match status {
            RunStatus::Failed => error!("run {run_id}: pipeline `{}` FAILED", pipeline.name),
            _ => info!("run {run_id}: pipeline `{}` {status}", pipeline.name),
        }
        Ok(RunReport { run_id,
                       pipeline: pipeline.name.clone(),
                       stack: stack.name().to_string(),
                       status,
                       steps: records,
                       started_at,
                       finished_at: Utc::now() })
    }

    fn is_ready(&self, step: &StepSpec, records: &IndexMap<String, StepRecord>) -> bool {
        let pending = records.get(&step.name).map(|r| r.status) == Some(StepStatus::Pending);
        pending
        && step.upstream_steps()
               .iter()
               .all(|up| records.get(*up).map(|r| r.status.produced_outputs()).unwrap_or(false))
    }

    fn apply_outcome(&self,
                     run_id: Uuid,
                     pipeline: &Pipeline,
                     name: &str,
                     outcome: StepOutcome,
                     records: &mut IndexMap<String, StepRecord>,
                     produced: &mut HashMap<(String, String), ArtifactVersion>) {
        let inputs: Vec<Uuid> = pipeline.step(name)
                                        .map(|s| {
                                            s.inputs
                                             .iter()
                                             .filter_map(|i| {
                                                 produced.get(&(i.from_step.clone(), i.from_output.clone()))
                                                         .map(|a| a.id)
                                             })
                                             .collect()
                                        })
                                        .unwrap_or_default();
        let Some(record) = records.get_mut(name) else {
            warn!("run {run_id}: outcome for unknown step `{name}`");
            return;
        };
        match outcome {
            StepOutcome::Succeeded { artifacts, cache_key } => {
                info!("run {run_id}: step `{name}` SUCCEEDED ({} artifacts)", artifacts.len());
                self.emit(run_id,
                          RunEventKind::StepSucceeded { step: name.to_string(),
                                                        inputs,
                                                        artifacts: artifacts.iter().map(|a| a.id).collect() });
                for a in &artifacts {
                    produced.insert((name.to_string(), a.output_name.clone()), a.clone());
                }
                record.status = StepStatus::Succeeded;
                record.artifacts = artifacts;
                record.cache_key = cache_key;
            }
            StepOutcome::Cached { artifacts, cache_key } => {
                info!("run {run_id}: step `{name}` CACHED");
                self.emit(run_id,
                          RunEventKind::StepCached { step: name.to_string(),
                                                     cache_key: cache_key.clone(),
                                                     inputs,
                                                     artifacts: artifacts.iter().map(|a| a.id).collect() });
                for a in &artifacts {
                    produced.insert((name.to_string(), a.output_name.clone()), a.clone());
                }
                record.status = StepStatus::Cached;
                record.backend = None;
                record.artifacts = artifacts;
                record.cache_key = Some(cache_key);
            }
            StepOutcome::Failed(ExecutionError::Cancelled { step }) => {
                info!("run {run_id}: step `{step}` CANCELLED");
                self.emit(run_id, RunEventKind::StepCancelled { step: step.clone() });
                record.status = StepStatus::Cancelled;
                record.error = Some(ExecutionError::Cancelled { step });
            }
            StepOutcome::Failed(err) => {
                error!("run {run_id}: {err}");
                self.emit(run_id,
                          RunEventKind::StepFailed { step: name.to_string(),
                                                     error: err.clone() });
                record.status = StepStatus::Failed;
                record.error = Some(err);
                for downstream in pipeline.downstream_closure(name) {
                    if let Some(r) = records.get_mut(&downstream) {
                        if r.status == StepStatus::Pending {
                            r.status = StepStatus::SkippedUpstreamFailure;
                            self.emit(run_id,
                                      RunEventKind::StepSkipped { step: downstream.clone(),
                                                                  failed_upstream: name.to_string() });
                        }
                    }
                }
            }
        }
    }

    fn emit(&self, run_id: Uuid, kind: RunEventKind) {
        emit(self.events.as_ref(), run_id, kind);
    }
}

fn emit(events: &dyn EventStore, run_id: Uuid, kind: RunEventKind) {
    if let Err(e) = events.append(run_id, kind) {
        warn!("run {run_id}: failed to append event: {e}");
    }
}

fn resolve_inputs(step: &StepSpec, produced: &HashMap<(String, String), ArtifactVersion>) -> Vec<ResolvedInput> {
    step.inputs
        .iter()
        .filter_map(|i| {
            produced.get(&(i.from_step.clone(), i.from_output.clone()))
                    .map(|artifact| ResolvedInput { name: i.name.clone(),
                                                    data_type: i.data_type.clone(),
                                                    artifact: artifact.clone() })
        })
        .collect()
}

/// Trabajo de un step, autocontenido para poder moverse a una tarea.
struct StepJob {
    run_id: Uuid,
    step: Arc<StepSpec>,
    inputs: Vec<ResolvedInput>,
    executor: Arc<dyn ExecutionBackend>,
    artifact_store: Arc<dyn ArtifactStore>,
    artifact_store_id: Uuid,
    materializers: Arc<MaterializerRegistry>,
    catalog: Arc<dyn ArtifactCatalog>,
    events: Arc<dyn EventStore>,
    config: DispatchConfig,
    cancel: CancelSignal,
    cache: bool,
    metadata: bool,
    visualization: bool,
}

impl StepJob {
    async fn run(mut self) -> StepOutcome {
        let step_name = self.step.name.clone();
        if self.inputs.len() != self.step.inputs.len() {
            return StepOutcome::Failed(self.failed("missing upstream artifacts for declared inputs"));
        }

        let key = if self.cache { cache_key(&self.step, &self.inputs, self.artifact_store_id) } else { None };
        if self.cache && key.is_none() {
            debug!("step `{step_name}` consumes raw handles; cache lookup skipped");
        }
        if let Some(k) = &key {
            if let Some(artifacts) = self.cached_outputs(k) {
                return StepOutcome::Cached { artifacts,
                                             cache_key: k.clone() };
            }
        }
        if self.cancel.is_cancelled() {
            return StepOutcome::Failed(ExecutionError::Cancelled { step: step_name });
        }

        let uris: BTreeMap<String, String> =
            self.step
                .outputs
                .iter()
                .map(|o| (o.name.clone(), format!("{}/{}/{}/{}", self.run_id, step_name, o.name, Uuid::new_v4())))
                .collect();
        let raw_output_uris = self.step
                                  .outputs
                                  .iter()
                                  .filter(|o| !o.materialize)
                                  .filter_map(|o| uris.get(&o.name).map(|u| (o.name.clone(), u.clone())))
                                  .collect();
        let env = ExecutionEnvironment { run_id: self.run_id,
                                         step_name: step_name.clone(),
                                         artifact_store: self.artifact_store.clone(),
                                         materializers: self.materializers.clone(),
                                         raw_output_uris,
                                         params: self.step.params.clone() };

        let backend = self.executor.name().to_string();
        let handle = match self.executor.submit(self.step.clone(), self.inputs.clone(), env).await {
            Ok(h) => h,
            Err(e) => {
                return StepOutcome::Failed(ExecutionError::Submission { step: step_name,
                                                                        backend,
                                                                        cause: e.to_string() })
            }
        };
        emit(self.events.as_ref(),
             self.run_id,
             RunEventKind::StepSubmitted { step: step_name.clone(),
                                           backend: backend.clone() });

        let outcome = self.settle(&handle, &uris, key).await;
        self.executor.release(&handle).await;
        outcome
    }

    /// Espera el estado terminal del job y materializa sus outputs.
    async fn settle(&mut self,
                    handle: &RunHandle,
                    uris: &BTreeMap<String, String>,
                    key: Option<String>)
                    -> StepOutcome {
        let step_name = self.step.name.clone();
        if let Err(err) = self.await_completion(handle).await {
            self.cleanup(uris);
            return StepOutcome::Failed(err);
        }
        // Un step cancelado nunca materializa outputs, aunque haya terminado.
        if self.cancel.is_cancelled() {
            self.cleanup(uris);
            return StepOutcome::Failed(ExecutionError::Cancelled { step: step_name });
        }
        let outputs = match self.executor.collect_outputs(handle).await {
            Ok(o) => o,
            Err(e) => {
                self.cleanup(uris);
                return StepOutcome::Failed(self.failed(format!("could not collect outputs: {e}")));
            }
        };
        match self.materialize(&outputs, uris, key.as_deref()) {
            Ok(artifacts) => StepOutcome::Succeeded { artifacts,
                                                      cache_key: key },
            Err(err) => {
                self.cleanup(uris);
                StepOutcome::Failed(err)
            }
        }
    }

    fn failed(&self, cause: impl Into<String>) -> ExecutionError {
        ExecutionError::StepFailed { step: self.step.name.clone(),
                                     backend: self.executor.name().to_string(),
                                     cause: cause.into() }
    }

    fn cached_outputs(&self, key: &str) -> Option<Vec<ArtifactVersion>> {
        let hits = match self.catalog.find_by_cache_key(key) {
            Ok(hits) => hits,
            Err(e) => {
                warn!("step `{}`: cache lookup failed, executing instead: {e}", self.step.name);
                return None;
            }
        };
        let complete = self.step
                           .outputs
                           .iter()
                           .all(|o| hits.iter().any(|h| h.output_name == o.name && h.step_name == self.step.name));
        if hits.is_empty() || !complete {
            return None;
        }
        debug!("step `{}`: cache hit for key {key}", self.step.name);
        Some(hits)
    }

    /// Poll con backoff acotado hasta estado terminal, timeout o cancelación.
    async fn await_completion(&mut self, handle: &RunHandle) -> Result<(), ExecutionError> {
        let step = self.step.name.clone();
        let backend = self.executor.name().to_string();
        let timeout = self.step.settings.timeout.unwrap_or(self.config.step_timeout);
        let deadline = Instant::now() + timeout;
        let mut backoff = Backoff::new(self.config.poll_initial, self.config.poll_max, self.config.poll_factor);
        let mut failures = 0u32;
        loop {
            match self.executor.poll(handle).await {
                Ok(JobStatus::Succeeded) => return Ok(()),
                Ok(JobStatus::Running) => failures = 0,
                Ok(JobStatus::Failed(cause)) => {
                    let logs = self.collect_logs(handle).await;
                    let cause = with_log_tail(cause, &logs);
                    return Err(ExecutionError::StepFailed { step, backend, cause });
                }
                Err(e) if e.is_transient() && failures < self.config.max_poll_failures => {
                    failures += 1;
                    warn!("step `{step}`: transient poll failure {failures}/{}: {e}", self.config.max_poll_failures);
                }
                Err(e) => {
                    self.cancel_backend(handle).await;
                    return Err(ExecutionError::Poll { step,
                                                      backend,
                                                      cause: e.to_string() });
                }
            }
            let now = Instant::now();
            if now >= deadline {
                self.cancel_backend(handle).await;
                return Err(ExecutionError::TimeoutExceeded { step,
                                                             timeout_ms: timeout.as_millis() as u64 });
            }
            let delay = backoff.next_delay().min(deadline - now);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    self.cancel_backend(handle).await;
                    return Err(ExecutionError::Cancelled { step });
                }
            }
        }
    }

    async fn collect_logs(&self, handle: &RunHandle) -> Vec<String> {
        match self.executor.fetch_logs(handle).await {
            Ok(lines) => {
                if !lines.is_empty() {
                    emit(self.events.as_ref(),
                         self.run_id,
                         RunEventKind::StepLogs { step: self.step.name.clone(),
                                                  lines: lines.clone() });
                }
                lines
            }
            Err(e) => {
                warn!("step `{}`: could not fetch logs: {e}", self.step.name);
                Vec::new()
            }
        }
    }

    async fn cancel_backend(&self, handle: &RunHandle) {
        if let Err(e) = self.executor.cancel(handle).await {
            warn!("step `{}`: backend cancel failed: {e}", self.step.name);
        }
    }

    /// Guarda todos los outputs y sólo entonces registra sus filas.
    fn materialize(&self,
                   outputs: &StepOutputs,
                   uris: &BTreeMap<String, String>,
                   cache_key: Option<&str>)
                   -> Result<Vec<ArtifactVersion>, ExecutionError> {
        let mut versions = Vec::with_capacity(self.step.outputs.len());
        for spec in &self.step.outputs {
            let value = outputs.values
                               .get(&spec.name)
                               .ok_or_else(|| self.failed(format!("step did not produce output `{}`", spec.name)))?;
            let uri = uris.get(&spec.name)
                          .ok_or_else(|| self.failed(format!("no location allocated for output `{}`", spec.name)))?;
            let mut version = if spec.materialize {
                self.save_output(spec, value, uri)
                    .map_err(|source| ExecutionError::Materialization { step: self.step.name.clone(),
                                                                        source })?
            } else {
                self.raw_output(spec, value, uri)?
            };
            version.cache_key = cache_key.map(str::to_string);
            versions.push(version);
        }
        self.catalog
            .record_all(&versions)
            .map_err(|e| ExecutionError::Materialization { step: self.step.name.clone(),
                                                           source: e.into() })?;
        Ok(versions)
    }

    fn new_version(&self, spec: &OutputSpec, uri: &str) -> ArtifactVersion {
        ArtifactVersion { id: Uuid::new_v4(),
                          run_id: self.run_id,
                          step_name: self.step.name.clone(),
                          output_name: spec.name.clone(),
                          data_type: spec.data_type.clone(),
                          uri: uri.to_string(),
                          materializer: None,
                          metadata: BTreeMap::new(),
                          visualizations: Vec::new(),
                          content_hash: String::new(),
                          cache_key: None,
                          created_at: Utc::now() }
    }

    fn save_output(&self,
                   spec: &OutputSpec,
                   value: &ArtifactValue,
                   uri: &str)
                   -> Result<ArtifactVersion, MaterializationError> {
        let resolution = self.materializers.resolve(&spec.data_type, spec.materializer.as_deref())?;
        let materializer = resolution.materializer;
        let scope = ScopedStore::new(self.artifact_store.as_ref(), uri);
        materializer.save(&scope, value)?;
        let (size, sha256) = scope.digest().unwrap_or_else(|| (0, sha256_hex(b"")));

        let mut version = self.new_version(spec, uri);
        version.materializer = Some(materializer.name().to_string());
        version.content_hash = sha256.clone();
        if self.metadata {
            let mut metadata: BTreeMap<String, Value> = materializer.extract_metadata(value)?;
            metadata.insert("size".to_string(), json!(size));
            metadata.insert("sha256".to_string(), json!(sha256));
            if !materializer.is_portable() {
                metadata.insert("portable".to_string(), json!(false));
            }
            version.metadata = metadata;
        }
        if self.visualization {
            version.visualizations = materializer.produce_visualizations(&scope, &spec.data_type, value)?;
        }
        Ok(version)
    }

    fn raw_output(&self, spec: &OutputSpec, value: &ArtifactValue, uri: &str) -> Result<ArtifactVersion, ExecutionError> {
        match value.as_handle() {
            Some(handle) if handle == uri => {
                let mut version = self.new_version(spec, uri);
                version.content_hash = sha256_hex(uri.as_bytes());
                Ok(version)
            }
            Some(other) => Err(self.failed(format!("raw output `{}` points to `{other}`, expected `{uri}`",
                                                   spec.name))),
            None => Err(self.failed(format!("output `{}` is unmaterialized but the step returned a `{}` value",
                                            spec.name,
                                            value.variant_name()))),
        }
    }

    /// Borra lo escrito bajo las ubicaciones del step (best effort).
    fn cleanup(&self, uris: &BTreeMap<String, String>) {
        for uri in uris.values() {
            if let Err(e) = ScopedStore::new(self.artifact_store.as_ref(), uri.clone()).purge() {
                warn!("step `{}`: cleanup of `{uri}` failed: {e}", self.step.name);
            }
        }
    }
}

fn with_log_tail(cause: String, logs: &[String]) -> String {
    if logs.is_empty() {
        return cause;
    }
    let tail = &logs[logs.len().saturating_sub(LOG_TAIL_LINES)..];
    format!("{cause} (last log lines: {})", tail.join(" | "))
}
