//! Demo de punta a punta: entrena un modelo en el stack local, reconstruye su
//! lineage y lo despliega en un servidor de inferencia local.
//!
//! `RUST_LOG=info cargo run --bin flow-demo`; con `--features pg_demo` y
//! `DATABASE_URL` los registros van a Postgres.

use std::collections::BTreeMap;
use std::sync::Arc;

use flow_adapters::manifest::{DEFAULT_ARTIFACT_STORE, DEFAULT_ORCHESTRATOR};
use flow_core::deploy::ServiceStore;
use flow_core::model::ModelPayload;
use flow_core::stack::{FlavorKey, RegistryStore};
use flow_core::step::{step_fn, OutputSpec};
use flow_core::{ArtifactCatalog, ArtifactValue, ComponentCategory, DeployConfig, DeploymentServiceManager,
                DispatchConfig, EventStore, FlowConfig, FlowContext, FlowError, LineageGraph, Pipeline, RunOptions,
                ServiceFilter, ServiceIdentity, StepDispatcher, StepSpec};
use log::{error, info};
use serde_json::json;

const SERVING_STACK: &str = "local-serving";
const DEPLOYER: &str = "local-inference";

struct Stores {
    registry: Arc<dyn RegistryStore>,
    catalog: Arc<dyn ArtifactCatalog>,
    events: Arc<dyn EventStore>,
    services: Arc<dyn ServiceStore>,
}

#[cfg(not(feature = "pg_demo"))]
fn stores() -> Result<Stores, FlowError> {
    use flow_core::deploy::InMemoryServiceStore;
    use flow_core::model::InMemoryArtifactCatalog;
    use flow_core::stack::InMemoryRegistryStore;
    use flow_core::InMemoryEventStore;

    Ok(Stores { registry: Arc::new(InMemoryRegistryStore::new()),
                catalog: Arc::new(InMemoryArtifactCatalog::new()),
                events: Arc::new(InMemoryEventStore::new()),
                services: Arc::new(InMemoryServiceStore::new()) })
}

#[cfg(feature = "pg_demo")]
fn stores() -> Result<Stores, FlowError> {
    use flow_core::StorageError;
    use flow_persistence::{build_dev_pool_from_env, PgArtifactCatalog, PgEventStore, PgRegistryStore,
                           PgServiceStore, PoolProvider};

    let pool = build_dev_pool_from_env().map_err(StorageError::from)?;
    let provider = PoolProvider { pool };
    Ok(Stores { registry: Arc::new(PgRegistryStore::new(provider.clone())),
                catalog: Arc::new(PgArtifactCatalog::new(provider.clone())),
                events: Arc::new(PgEventStore::new(provider.clone())),
                services: Arc::new(PgServiceStore::new(provider)) })
}

fn training_pipeline() -> Result<Pipeline, FlowError> {
    let load = StepSpec::new("load",
                             step_fn("1", |ctx| {
                                 ctx.set_output("rows", ArtifactValue::Text("x,y\n1,2\n2,4\n3,6\n".into()));
                                 Ok(())
                             })).output(OutputSpec::new("rows", "text.csv"));
    let train = StepSpec::new("train",
                              step_fn("1", |ctx| {
                                  let ArtifactValue::Text(csv) = ctx.input("rows")? else {
                                      return Err("rows must be text".into());
                                  };
                                  let samples = csv.lines().skip(1).count();
                                  ctx.log(format!("fitting on {samples} rows"));
                                  let payload =
                                      ModelPayload { name: "doubler".into(),
                                                     framework: "sklearn".into(),
                                                     hyperparameters: BTreeMap::from([("alpha".to_string(),
                                                                                       json!(0.1))]),
                                                     weights: vec![2.0] };
                                  ctx.set_output("model", ArtifactValue::Model(payload));
                                  ctx.set_output("samples", ArtifactValue::Integer(samples as i64));
                                  Ok(())
                              })).input("rows", "text", "load", "rows")
                                 .output(OutputSpec::new("model", "model.sklearn"))
                                 .output(OutputSpec::new("samples", "primitive"));
    Ok(Pipeline::builder("training").step(load).step(train).enable_cache(true).build()?)
}

/// Stack con un model deployer local; se crea una sola vez y se reutiliza en
/// ejecuciones posteriores.
fn serving_stack(ctx: &FlowContext) -> Result<flow_core::Stack, FlowError> {
    let mut registry = ctx.registry_mut();
    if let Some(stack) = registry.stack_by_name(SERVING_STACK) {
        return Ok(stack.clone());
    }
    let deployer = match registry.component_by_name(DEPLOYER) {
        Some(c) => c.id,
        None => {
            registry.register_component(DEPLOYER,
                                        &FlavorKey::new(ComponentCategory::ModelDeployer, "local-server"),
                                        json!({"port": 8111, "startup_delay_ms": 20}))?
                    .id
        }
    };
    let mut members = Vec::new();
    for name in [DEFAULT_ORCHESTRATOR, DEFAULT_ARTIFACT_STORE] {
        let id = registry.component_by_name(name)
                         .map(|c| c.id)
                         .ok_or_else(|| flow_core::ConfigurationError::UnknownComponent(name.to_string()))?;
        members.push(id);
    }
    members.push(deployer);
    Ok(registry.compose_stack(SERVING_STACK, &members)?)
}

async fn run() -> Result<(), FlowError> {
    let cfg = FlowConfig::from_env();
    let stores = stores()?;
    let ctx = stackflow::context_with_store(stores.registry.clone(), &cfg)?;
    let stack = serving_stack(&ctx)?;
    ctx.activate(&stack)?;

    let dispatcher = StepDispatcher::new(&ctx,
                                         stores.catalog.clone(),
                                         stores.events.clone(),
                                         DispatchConfig::from_config(&cfg));
    let pipeline = training_pipeline()?;
    let report = dispatcher.run(&pipeline, RunOptions::default()).await?;
    for record in report.steps.values() {
        info!("step `{}` -> {:?} on {:?}", record.name, record.status, record.backend);
    }
    if let Some(err) = report.failures().first() {
        error!("run {} failed: {err}", report.run_id);
        return Ok(());
    }

    let mut lineage = LineageGraph::from_events(&stores.events.list(report.run_id)?);
    lineage.annotate(stores.catalog.as_ref());
    info!("lineage: {} nodes, {} edges, roots {:?}",
          lineage.nodes().count(),
          lineage.edges().count(),
          lineage.root_steps());

    let Some(model) = report.artifact("train", "model") else {
        error!("run {} produced no model", report.run_id);
        return Ok(());
    };
    let manager = DeploymentServiceManager::from_context(&ctx, stores.services.clone(), DeployConfig::from_config(&cfg))?;
    let service = manager.deploy(model, ServiceIdentity::new(&pipeline.name, "train", "model")).await?;
    info!("service {} is {} at {}",
          service.id,
          service.state,
          manager.get_prediction_url(service.id).await?);

    for svc in manager.list(&ServiceFilter::default().pipeline(&pipeline.name)).await? {
        info!("  {} rev {} [{}]", svc.identity, svc.revision, svc.state);
    }
    let deleted = manager.delete(service.id).await?;
    info!("service {} torn down ({})", deleted.id, deleted.state);

    ctx.disconnect()?;
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(e) = run().await {
        error!("flow-demo failed: {e}");
        std::process::exit(1);
    }
}
