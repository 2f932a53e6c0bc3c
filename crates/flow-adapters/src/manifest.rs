//! Tabla de flavors integrados y arranque del stack `default`.
//!
//! Cada flavor se registra con una factory que construye su backend a partir
//! del componente configurado. Las factories memorizan el backend por id de
//! componente: reactivar un stack reutiliza los mismos adaptadores (y su
//! estado en memoria).
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use flow_core::constants::DEFAULT_STACK_NAME;
use flow_core::errors::ConfigurationError;
use flow_core::stack::{BackendHandle, ComponentFlavor, ConfigField, FieldKind, FlavorFactory, FlavorKey, Locality,
                       Requirement, StackComponent, LOCAL_FLAG};
use flow_core::{ComponentCategory, ComponentRegistry, FlowConfig, Stack};
use log::info;
use serde_json::json;
use uuid::Uuid;

use crate::deployer::SimulatedModelDeployer;
use crate::executor::{InProcessBackend, JobServiceSettings, SimulatedJobService};
use crate::store::{BucketArtifactStore, LocalArtifactStore};

pub const DEFAULT_ORCHESTRATOR: &str = "default-orchestrator";
pub const DEFAULT_ARTIFACT_STORE: &str = "default-artifact-store";

fn memoized<F>(build: F) -> FlavorFactory
    where F: Fn(&StackComponent) -> Result<BackendHandle, ConfigurationError> + Send + Sync + 'static
{
    let cache: Arc<DashMap<Uuid, BackendHandle>> = Arc::new(DashMap::new());
    Arc::new(move |component: &StackComponent| {
        if let Some(handle) = cache.get(&component.id) {
            return Ok(handle.clone());
        }
        let handle = build(component)?;
        cache.insert(component.id, handle.clone());
        Ok(handle)
    })
}

fn passive() -> FlavorFactory {
    Arc::new(|_: &StackComponent| Ok(BackendHandle::Passive))
}

fn millis(component: &StackComponent, key: &str) -> Duration {
    Duration::from_millis(component.config_u64(key).unwrap_or(0))
}

fn job_service(component: &StackComponent) -> SimulatedJobService {
    let settings = JobServiceSettings { startup_delay: millis(component, "startup_delay_ms"),
                                        flaky_every: component.config_u64("flaky_every")
                                                              .and_then(|n| u32::try_from(n).ok()),
                                        region: component.config_str("region").map(str::to_string) };
    SimulatedJobService::new(component.name.clone(), settings)
}

/// Flavors integrados con sus factories.
pub fn builtin_flavors(cfg: &FlowConfig) -> Vec<(ComponentFlavor, FlavorFactory)> {
    use ComponentCategory::*;
    let artifact_root = cfg.artifact_root.clone();
    vec![(ComponentFlavor::new(Orchestrator, "local", Locality::Local)
              .with_description("Runs every step in the control-plane process"),
          memoized(|c| Ok(BackendHandle::Executor(Arc::new(InProcessBackend::new(c.name.clone())))))),
         (ComponentFlavor::new(Orchestrator, "kubernetes", Locality::Remote)
              .with_description("Submits each step as a pod on a Kubernetes cluster")
              .with_field(ConfigField::required("context", FieldKind::String).describe("kubeconfig context"))
              .with_field(ConfigField::optional("namespace", FieldKind::String, Some(json!("default"))))
              .with_field(ConfigField::optional(LOCAL_FLAG, FieldKind::Boolean, Some(json!(false)))
                  .describe("cluster runs on this machine (e.g. k3d)"))
              .with_field(ConfigField::optional("startup_delay_ms", FieldKind::Number, Some(json!(0))))
              .with_requirement(Requirement::Category(ContainerRegistry)),
          memoized(|c| Ok(BackendHandle::Executor(Arc::new(job_service(c)))))),
         (ComponentFlavor::new(ArtifactStore, "local", Locality::Local)
              .with_description("Directory on the local filesystem")
              .with_field(ConfigField::optional("path", FieldKind::String, Some(json!(artifact_root)))),
          memoized(|c| {
              let path = c.config_str("path").unwrap_or(".").to_string();
              Ok(BackendHandle::ArtifactStore(Arc::new(LocalArtifactStore::open(path)?)))
          })),
         (ComponentFlavor::new(ArtifactStore, "bucket", Locality::Remote)
              .with_description("Object storage bucket")
              .with_field(ConfigField::required("bucket", FieldKind::String)),
          memoized(|c| {
              let bucket = c.config_str("bucket").unwrap_or_default();
              Ok(BackendHandle::ArtifactStore(Arc::new(BucketArtifactStore::new(bucket))))
          })),
         (ComponentFlavor::new(ContainerRegistry, "default", Locality::Remote)
              .with_field(ConfigField::required("uri", FieldKind::String)),
          passive()),
         (ComponentFlavor::new(ImageBuilder, "local", Locality::Local), passive()),
         (ComponentFlavor::new(ExecutionBackend, "local-process", Locality::Local)
              .with_description("Runs a single step in the control-plane process"),
          memoized(|c| Ok(BackendHandle::Executor(Arc::new(InProcessBackend::new(c.name.clone())))))),
         (ComponentFlavor::new(ExecutionBackend, "remote-job-service", Locality::Remote)
              .with_description("Managed training-job service")
              .with_field(ConfigField::optional("region", FieldKind::String, None))
              .with_field(ConfigField::optional("instance_type", FieldKind::String, Some(json!("standard"))))
              .with_field(ConfigField::optional("startup_delay_ms", FieldKind::Number, Some(json!(0))))
              .with_field(ConfigField::optional("flaky_every", FieldKind::Number, None)),
          memoized(|c| Ok(BackendHandle::Executor(Arc::new(job_service(c)))))),
         (ComponentFlavor::new(ModelDeployer, "local-server", Locality::Local)
              .with_description("Inference server on localhost")
              .with_field(ConfigField::optional("port", FieldKind::Number, Some(json!(8000))))
              .with_field(ConfigField::optional("startup_delay_ms", FieldKind::Number, Some(json!(0)))),
          memoized(|c| {
              let port = c.config_u64("port").and_then(|p| u16::try_from(p).ok()).unwrap_or(8000);
              Ok(BackendHandle::ModelDeployer(Arc::new(SimulatedModelDeployer::new(c.name.clone(),
                                                                                   port,
                                                                                   millis(c, "startup_delay_ms")))))
          }))]
}

pub fn register_builtin_flavors(registry: &mut ComponentRegistry, cfg: &FlowConfig) -> Result<(), ConfigurationError> {
    for (flavor, factory) in builtin_flavors(cfg) {
        registry.register_flavor_with_factory(flavor, factory)?;
    }
    Ok(())
}

/// Registra los flavors integrados, recupera lo persistido y garantiza que
/// exista el stack `default` (orquestador local + artifact store local).
pub fn bootstrap(registry: &mut ComponentRegistry, cfg: &FlowConfig) -> Result<Stack, ConfigurationError> {
    register_builtin_flavors(registry, cfg)?;
    registry.restore()?;
    if let Some(stack) = registry.stack_by_name(DEFAULT_STACK_NAME) {
        return Ok(stack.clone());
    }
    let orchestrator = ensure_component(registry,
                                        DEFAULT_ORCHESTRATOR,
                                        FlavorKey::new(ComponentCategory::Orchestrator, "local"),
                                        json!({}))?;
    let store = ensure_component(registry,
                                 DEFAULT_ARTIFACT_STORE,
                                 FlavorKey::new(ComponentCategory::ArtifactStore, "local"),
                                 json!({ "path": cfg.artifact_root }))?;
    let stack = registry.compose_stack(DEFAULT_STACK_NAME, &[orchestrator, store])?;
    info!("bootstrapped stack `{}` with artifacts under {}", stack.name, cfg.artifact_root);
    Ok(stack)
}

fn ensure_component(registry: &mut ComponentRegistry,
                    name: &str,
                    flavor: FlavorKey,
                    config: serde_json::Value)
                    -> Result<Uuid, ConfigurationError> {
    if let Some(existing) = registry.component_by_name(name) {
        return Ok(existing.id);
    }
    Ok(registry.register_component(name, &flavor, config)?.id)
}
