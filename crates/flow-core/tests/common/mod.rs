//! Arnés compartido: stack en memoria con dos executors guionizados.
#![allow(dead_code)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use flow_core::dispatch::{ExecutionEnvironment, JobStatus, ResolvedInput, RunHandle, StepFailure};
use flow_core::errors::BackendError;
use flow_core::model::{InMemoryArtifactCatalog, InMemoryArtifactStore};
use flow_core::stack::{BackendHandle, ComponentFlavor, FlavorKey, InMemoryRegistryStore, Locality, StackComponent};
use flow_core::step::{StepOutputs, StepSpec};
use flow_core::{ComponentCategory, ComponentRegistry, DispatchConfig, ExecutionBackend, FlowContext,
                InMemoryEventStore, MaterializerRegistry, StepDispatcher};
use serde_json::json;

struct Job {
    ready_at: Instant,
    result: Result<StepOutputs, StepFailure>,
    cancelled: bool,
}

/// Ejecuta el entrypoint al hacer submit y reporta `Running` hasta que pasa
/// `delay`.
pub struct ScriptedBackend {
    name: String,
    delay: Duration,
    jobs: DashMap<String, Job>,
    pub submissions: AtomicUsize,
    pub cancels: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self { name: name.to_string(),
               delay,
               jobs: DashMap::new(),
               submissions: AtomicUsize::new(0),
               cancels: AtomicUsize::new(0) }
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// Jobs que el dispatcher todavía no liberó.
    pub fn tracked_jobs(&self) -> usize {
        self.jobs.len()
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self,
                    step: Arc<StepSpec>,
                    inputs: Vec<ResolvedInput>,
                    env: ExecutionEnvironment)
                    -> Result<RunHandle, BackendError> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst);
        let result = env.execute(&step, &inputs);
        let id = format!("{}-{n}", self.name);
        self.jobs.insert(id.clone(),
                         Job { ready_at: Instant::now() + self.delay,
                               result,
                               cancelled: false });
        Ok(RunHandle { id,
                       backend: self.name.clone(),
                       step: step.name.clone() })
    }

    async fn poll(&self, handle: &RunHandle) -> Result<JobStatus, BackendError> {
        let job = self.jobs.get(&handle.id).ok_or_else(|| BackendError::NotFound(handle.id.clone()))?;
        if job.cancelled {
            return Ok(JobStatus::Failed("cancelled".into()));
        }
        if Instant::now() < job.ready_at {
            return Ok(JobStatus::Running);
        }
        Ok(match &job.result {
            Ok(_) => JobStatus::Succeeded,
            Err(f) => JobStatus::Failed(f.cause.clone()),
        })
    }

    async fn fetch_logs(&self, handle: &RunHandle) -> Result<Vec<String>, BackendError> {
        let job = self.jobs.get(&handle.id).ok_or_else(|| BackendError::NotFound(handle.id.clone()))?;
        Ok(match &job.result {
            Ok(o) => o.logs.clone(),
            Err(f) => f.logs.clone(),
        })
    }

    async fn cancel(&self, handle: &RunHandle) -> Result<(), BackendError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if let Some(mut job) = self.jobs.get_mut(&handle.id) {
            job.cancelled = true;
        }
        Ok(())
    }

    async fn collect_outputs(&self, handle: &RunHandle) -> Result<StepOutputs, BackendError> {
        let job = self.jobs.get(&handle.id).ok_or_else(|| BackendError::NotFound(handle.id.clone()))?;
        job.result.clone().map_err(|f| BackendError::Permanent(f.cause))
    }

    async fn release(&self, handle: &RunHandle) {
        self.jobs.remove(&handle.id);
    }
}

pub struct Harness {
    pub ctx: FlowContext,
    pub store: Arc<InMemoryArtifactStore>,
    pub local: Arc<ScriptedBackend>,
    pub jobs: Arc<ScriptedBackend>,
    pub catalog: Arc<InMemoryArtifactCatalog>,
    pub events: Arc<InMemoryEventStore>,
}

impl Harness {
    /// Stack `default`: orquestador local inmediato, store en memoria y un
    /// execution backend `jobs` lento (300 ms).
    pub fn new() -> Self {
        let store = Arc::new(InMemoryArtifactStore::new());
        let local = Arc::new(ScriptedBackend::new("local", Duration::ZERO));
        let jobs = Arc::new(ScriptedBackend::new("jobs", Duration::from_millis(300)));

        let mut registry = ComponentRegistry::new(Arc::new(InMemoryRegistryStore::new()));
        let s = store.clone();
        registry.register_flavor_with_factory(ComponentFlavor::new(ComponentCategory::ArtifactStore,
                                                                   "memory",
                                                                   Locality::Local),
                                              Arc::new(move |_: &StackComponent| Ok(BackendHandle::ArtifactStore(s.clone()))))
                .unwrap();
        let l = local.clone();
        registry.register_flavor_with_factory(ComponentFlavor::new(ComponentCategory::Orchestrator,
                                                                   "local",
                                                                   Locality::Local),
                                              Arc::new(move |_: &StackComponent| Ok(BackendHandle::Executor(l.clone()))))
                .unwrap();
        let j = jobs.clone();
        registry.register_flavor_with_factory(ComponentFlavor::new(ComponentCategory::ExecutionBackend,
                                                                   "scripted",
                                                                   Locality::Local),
                                              Arc::new(move |_: &StackComponent| Ok(BackendHandle::Executor(j.clone()))))
                .unwrap();

        let mem = registry.register_component("mem",
                                              &FlavorKey::new(ComponentCategory::ArtifactStore, "memory"),
                                              json!({}))
                          .unwrap();
        let orch = registry.register_component("orch",
                                               &FlavorKey::new(ComponentCategory::Orchestrator, "local"),
                                               json!(null))
                           .unwrap();
        let exec = registry.register_component("jobs",
                                               &FlavorKey::new(ComponentCategory::ExecutionBackend, "scripted"),
                                               json!({}))
                           .unwrap();
        registry.compose_stack("default", &[orch.id, mem.id, exec.id]).unwrap();

        let ctx = FlowContext::initialize(registry, MaterializerRegistry::with_builtins(), "default").unwrap();
        Self { ctx,
               store,
               local,
               jobs,
               catalog: Arc::new(InMemoryArtifactCatalog::new()),
               events: Arc::new(InMemoryEventStore::new()) }
    }

    /// Registra un segundo store en memoria, compone el stack `other` con él
    /// y los mismos executors, y lo activa.
    pub fn activate_second_store(&self) -> Arc<InMemoryArtifactStore> {
        let store = Arc::new(InMemoryArtifactStore::new());
        let s = store.clone();
        let stack = {
            let mut registry = self.ctx.registry_mut();
            registry.register_flavor_with_factory(ComponentFlavor::new(ComponentCategory::ArtifactStore,
                                                                       "memory-b",
                                                                       Locality::Local),
                                                  Arc::new(move |_: &StackComponent| {
                                                      Ok(BackendHandle::ArtifactStore(s.clone()))
                                                  }))
                    .unwrap();
            let mem_b = registry.register_component("mem-b",
                                                    &FlavorKey::new(ComponentCategory::ArtifactStore, "memory-b"),
                                                    json!({}))
                                .unwrap();
            let orch = registry.component_by_name("orch").unwrap().id;
            let exec = registry.component_by_name("jobs").unwrap().id;
            registry.compose_stack("other", &[orch, mem_b.id, exec]).unwrap()
        };
        self.ctx.activate(&stack).unwrap();
        store
    }

    pub fn dispatcher(&self) -> StepDispatcher<'_> {
        StepDispatcher::new(&self.ctx, self.catalog.clone(), self.events.clone(), fast_config())
    }
}

pub fn fast_config() -> DispatchConfig {
    DispatchConfig { poll_initial: Duration::from_millis(1),
                     poll_max: Duration::from_millis(5),
                     poll_factor: 2.0,
                     step_timeout: Duration::from_secs(5),
                     max_poll_failures: 3,
                     max_parallel: 4 }
}
