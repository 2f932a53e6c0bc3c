mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{fast_config, Harness};
use flow_core::dispatch::{cancellation, RunOptions};
use flow_core::errors::{ConfigurationError, MaterializationError};
use flow_core::event::{EventStore, RunEventKind};
use flow_core::materializer::Materializer;
use flow_core::model::{ArtifactCatalog, ArtifactValue, ArtifactVersion, DataType, InMemoryArtifactCatalog, ScopedStore};
use flow_core::step::{step_fn, OutputSpec, Pipeline, RunStatus, StepSpec, StepStatus};
use flow_core::{ExecutionError, FlowError, LineageGraph, StepDispatcher, StorageError};
use serde_json::{json, Value};
use uuid::Uuid;

fn numbers_step() -> StepSpec {
    StepSpec::new("a",
                  step_fn("1", |ctx| {
                      ctx.set_output("numbers", ArtifactValue::Json(json!([1, 2, 3])));
                      Ok(())
                  })).output(OutputSpec::new("numbers", "json"))
}

fn failing_step() -> StepSpec {
    StepSpec::new("b",
                  step_fn("1", |ctx| {
                      ctx.input("numbers")?;
                      ctx.log("starting b");
                      Err("division by zero".to_string())
                  })).input("numbers", "json", "a", "numbers")
                     .output(OutputSpec::new("total", "primitive"))
}

fn sink_step() -> StepSpec {
    StepSpec::new("c",
                  step_fn("1", |ctx| {
                      ctx.input("total")?;
                      Ok(())
                  })).input("total", "primitive", "b", "total")
}

#[tokio::test]
async fn failure_skips_downstream_and_records_nothing_for_failed_step() {
    let h = Harness::new();
    let pipeline = Pipeline::builder("abc").step(numbers_step())
                                           .step(failing_step())
                                           .step(sink_step())
                                           .build()
                                           .unwrap();
    let report = h.dispatcher().run(&pipeline, RunOptions::default()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.status_of("a"), Some(StepStatus::Succeeded));
    assert_eq!(report.status_of("b"), Some(StepStatus::Failed));
    assert_eq!(report.status_of("c"), Some(StepStatus::SkippedUpstreamFailure));

    let rows = h.catalog.list_for_run(report.run_id).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].step_name, "a");
    assert_eq!(rows[0].materializer.as_deref(), Some("builtin.json"));

    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    match failures[0] {
        ExecutionError::StepFailed { step, cause, .. } => {
            assert_eq!(step, "b");
            assert!(cause.contains("division by zero"));
            assert!(cause.contains("starting b"));
        }
        other => panic!("unexpected failure {other:?}"),
    }

    let events = h.events.list(report.run_id).unwrap();
    assert!(events.iter()
                  .any(|e| matches!(&e.kind, RunEventKind::StepLogs { step, .. } if step == "b")));
    assert!(events.iter().any(|e| matches!(&e.kind,
                                          RunEventKind::StepSkipped { step, failed_upstream }
                                              if step == "c" && failed_upstream == "b")));
    assert!(matches!(events.last().map(|e| &e.kind),
                     Some(RunEventKind::RunFinished { status: RunStatus::Failed })));
}

#[tokio::test]
async fn successful_run_rebuilds_lineage() {
    let h = Harness::new();
    let double = StepSpec::new("double",
                               step_fn("1", |ctx| {
                                   let items = match ctx.input("numbers")? {
                                       ArtifactValue::Json(Value::Array(items)) => items.clone(),
                                       other => return Err(format!("unexpected input {other:?}")),
                                   };
                                   let sum: i64 = items.iter().filter_map(Value::as_i64).map(|n| n * 2).sum();
                                   ctx.set_output("sum", ArtifactValue::Integer(sum));
                                   Ok(())
                               })).input("numbers", "json", "a", "numbers")
                                  .output(OutputSpec::new("sum", "primitive.int"));
    let pipeline = Pipeline::builder("lineage").step(numbers_step()).step(double).build().unwrap();
    let report = h.dispatcher().run(&pipeline, RunOptions::default()).await.unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);

    let sum = report.artifact("double", "sum").unwrap();
    assert_eq!(sum.materializer.as_deref(), Some("builtin.primitive"));
    assert!(sum.metadata.contains_key("sha256"));
    let loaded = h.ctx
                  .materializers()
                  .get("builtin.primitive")
                  .unwrap()
                  .load(&ScopedStore::new(h.store.as_ref(), sum.uri.clone()), &sum.data_type)
                  .unwrap();
    assert_eq!(loaded, ArtifactValue::Integer(12));

    let graph = LineageGraph::from_events(&h.events.list(report.run_id).unwrap());
    let numbers = report.artifact("a", "numbers").unwrap();
    assert_eq!(graph.producer_of(numbers.id), Some("a"));
    assert_eq!(graph.producer_of(sum.id), Some("double"));
    assert_eq!(graph.root_steps(), vec!["a"]);
}

#[tokio::test]
async fn cached_step_skips_submission_and_reuses_artifacts() {
    let h = Harness::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let step = StepSpec::new("a",
                             step_fn("1", move |ctx| {
                                 counter.fetch_add(1, Ordering::SeqCst);
                                 ctx.set_output("numbers", ArtifactValue::Json(json!([1, 2, 3])));
                                 Ok(())
                             })).output(OutputSpec::new("numbers", "json"))
                                .enable_cache(true);
    let pipeline = Pipeline::builder("cached").step(step).build().unwrap();

    let first = h.dispatcher().run(&pipeline, RunOptions::default()).await.unwrap();
    let second = h.dispatcher().run(&pipeline, RunOptions::default()).await.unwrap();

    assert_eq!(first.status_of("a"), Some(StepStatus::Succeeded));
    assert_eq!(second.status_of("a"), Some(StepStatus::Cached));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.local.submissions(), 1);
    assert_eq!(first.artifact("a", "numbers").unwrap().id,
               second.artifact("a", "numbers").unwrap().id);
    assert!(h.catalog.list_for_run(second.run_id).unwrap().is_empty());

    // Un override de run desactiva la cache.
    let third = h.dispatcher()
                 .run(&pipeline,
                      RunOptions { enable_cache: Some(false),
                                   ..RunOptions::default() })
                 .await
                 .unwrap();
    assert_eq!(third.status_of("a"), Some(StepStatus::Succeeded));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn slow_step_times_out_and_is_cancelled_on_backend() {
    let h = Harness::new();
    let slow = StepSpec::new("slow",
                             step_fn("1", |ctx| {
                                 ctx.set_output("flag", ArtifactValue::Boolean(true));
                                 Ok(())
                             })).output(OutputSpec::new("flag", "primitive"))
                                .on_execution_backend("jobs")
                                .timeout(Duration::from_millis(30));
    let pipeline = Pipeline::builder("timeout").step(slow).build().unwrap();
    let report = h.dispatcher().run(&pipeline, RunOptions::default()).await.unwrap();

    assert_eq!(report.status_of("slow"), Some(StepStatus::Failed));
    assert!(report.failures()[0].is_timeout());
    assert_eq!(report.step("slow").unwrap().backend.as_deref(), Some("jobs"));
    assert_eq!(h.jobs.cancels(), 1);
    assert_eq!(h.local.submissions(), 0);
    assert!(h.catalog.list_for_run(report.run_id).unwrap().is_empty());
}

#[tokio::test]
async fn cancellation_stops_in_flight_and_pending_steps() {
    let h = Harness::new();
    let slow = StepSpec::new("slow",
                             step_fn("1", |ctx| {
                                 ctx.set_output("flag", ArtifactValue::Boolean(true));
                                 Ok(())
                             })).output(OutputSpec::new("flag", "primitive"))
                                .on_execution_backend("jobs");
    let after = StepSpec::new("after", step_fn("1", |_| Ok(()))).input("flag", "primitive", "slow", "flag");
    let pipeline = Pipeline::builder("cancel").step(slow).step(after).build().unwrap();

    let (handle, signal) = cancellation();
    let dispatcher = h.dispatcher();
    let (report, _) = tokio::join!(dispatcher.run_with_cancel(&pipeline, RunOptions::default(), signal),
                                   async {
                                       tokio::time::sleep(Duration::from_millis(20)).await;
                                       handle.cancel();
                                   });
    let report = report.unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.status_of("slow"), Some(StepStatus::Cancelled));
    assert_eq!(report.status_of("after"), Some(StepStatus::Cancelled));
    assert_eq!(h.jobs.cancels(), 1);
    assert!(h.catalog.list_for_run(report.run_id).unwrap().is_empty());
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn unmaterialized_output_travels_as_handle() {
    let h = Harness::new();
    let producer = StepSpec::new("produce",
                                 step_fn("1", |ctx| {
                                     ctx.write_raw_output("blob", b"raw-bytes")?;
                                     Ok(())
                                 })).output(OutputSpec::unmaterialized("blob", "bytes"));
    let consumer = StepSpec::new("consume",
                                 step_fn("1", |ctx| {
                                     let bytes = ctx.read_raw_input("blob")?;
                                     ctx.set_output("len", ArtifactValue::Integer(bytes.len() as i64));
                                     Ok(())
                                 })).input("blob", "bytes", "produce", "blob")
                                    .output(OutputSpec::new("len", "primitive"))
                                    .enable_cache(true);
    let pipeline = Pipeline::builder("raw").step(producer).step(consumer).build().unwrap();
    let report = h.dispatcher().run(&pipeline, RunOptions::default()).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    let blob = report.artifact("produce", "blob").unwrap();
    assert_eq!(blob.materializer, None);
    assert!(!blob.is_materialized());
    // Consumir un handle crudo desactiva la cache del consumidor.
    assert_eq!(report.artifact("consume", "len").unwrap().cache_key, None);
}

#[tokio::test]
async fn unknown_type_falls_back_to_opaque_storage() {
    let h = Harness::new();
    let step = StepSpec::new("frame",
                             step_fn("1", |ctx| {
                                 ctx.set_output("df", ArtifactValue::Json(json!({"cols": ["x"]})));
                                 Ok(())
                             })).output(OutputSpec::new("df", "custom.dataframe"));
    let pipeline = Pipeline::builder("opaque").step(step).build().unwrap();
    let report = h.dispatcher().run(&pipeline, RunOptions::default()).await.unwrap();

    let df = report.artifact("frame", "df").unwrap();
    assert_eq!(df.materializer.as_deref(), Some("builtin.opaque"));
    assert_eq!(df.metadata.get("portable"), Some(&json!(false)));
}

#[tokio::test]
async fn metadata_and_visualizations_follow_toggles() {
    let h = Harness::new();
    let step = StepSpec::new("report",
                             step_fn("1", |ctx| {
                                 ctx.set_output("md", ArtifactValue::Text("# title".into()));
                                 Ok(())
                             })).output(OutputSpec::new("md", "text.markdown"));
    let pipeline = Pipeline::builder("toggles").step(step).enable_artifact_metadata(false).build().unwrap();

    let report = h.dispatcher().run(&pipeline, RunOptions::default()).await.unwrap();
    let md = report.artifact("report", "md").unwrap();
    assert!(md.metadata.is_empty());
    assert_eq!(md.visualizations.len(), 1);

    let report = h.dispatcher()
                  .run(&pipeline,
                       RunOptions { enable_artifact_metadata: Some(true),
                                    enable_artifact_visualization: Some(false),
                                    ..RunOptions::default() })
                  .await
                  .unwrap();
    let md = report.artifact("report", "md").unwrap();
    assert!(md.metadata.contains_key("size"));
    assert!(md.visualizations.is_empty());
}

#[tokio::test]
async fn materialization_failure_fails_step_without_catalog_rows() {
    let h = Harness::new();
    let step = StepSpec::new("bad",
                             step_fn("1", |ctx| {
                                 ctx.set_output("ok", ArtifactValue::Json(json!(1)));
                                 ctx.set_output("wrong", ArtifactValue::Boolean(true));
                                 Ok(())
                             })).output(OutputSpec::new("ok", "json"))
                                .output(OutputSpec::new("wrong", "text"));
    let pipeline = Pipeline::builder("mat").step(step).build().unwrap();
    let report = h.dispatcher().run(&pipeline, RunOptions::default()).await.unwrap();

    assert_eq!(report.status_of("bad"), Some(StepStatus::Failed));
    assert!(matches!(report.failures()[0],
                     ExecutionError::Materialization { source: MaterializationError::UnsupportedValue { .. }, .. }));
    assert!(h.catalog.list_for_run(report.run_id).unwrap().is_empty());
    assert!(h.store.is_empty());
}

/// Catálogo que pierde la conexión en el segundo registro.
#[derive(Default)]
struct DroppingCatalog {
    inner: InMemoryArtifactCatalog,
    records: AtomicUsize,
}

impl ArtifactCatalog for DroppingCatalog {
    fn record(&self, version: &ArtifactVersion) -> Result<(), StorageError> {
        if self.records.fetch_add(1, Ordering::SeqCst) == 1 {
            return Err(StorageError::Backend("connection reset".into()));
        }
        self.inner.record(version)
    }

    fn forget(&self, id: Uuid) -> Result<(), StorageError> {
        self.inner.forget(id)
    }

    fn get(&self, id: Uuid) -> Result<Option<ArtifactVersion>, StorageError> {
        self.inner.get(id)
    }

    fn list_for_run(&self, run_id: Uuid) -> Result<Vec<ArtifactVersion>, StorageError> {
        self.inner.list_for_run(run_id)
    }

    fn find_by_cache_key(&self, cache_key: &str) -> Result<Vec<ArtifactVersion>, StorageError> {
        self.inner.find_by_cache_key(cache_key)
    }
}

#[tokio::test]
async fn catalog_failure_mid_step_leaves_no_partial_rows() {
    let h = Harness::new();
    let catalog = Arc::new(DroppingCatalog::default());
    let dispatcher = StepDispatcher::new(&h.ctx, catalog.clone(), h.events.clone(), fast_config());
    let step = StepSpec::new("pair",
                             step_fn("1", |ctx| {
                                 ctx.set_output("left", ArtifactValue::Json(json!(1)));
                                 ctx.set_output("right", ArtifactValue::Json(json!(2)));
                                 Ok(())
                             })).output(OutputSpec::new("left", "json"))
                                .output(OutputSpec::new("right", "json"));
    let pipeline = Pipeline::builder("pair").step(step).build().unwrap();
    let report = dispatcher.run(&pipeline, RunOptions::default()).await.unwrap();

    assert_eq!(report.status_of("pair"), Some(StepStatus::Failed));
    assert!(matches!(report.failures()[0], ExecutionError::Materialization { .. }));
    assert_eq!(catalog.records.load(Ordering::SeqCst), 2);
    assert!(catalog.list_for_run(report.run_id).unwrap().is_empty());
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn cache_hits_stay_within_their_artifact_store() {
    let h = Harness::new();
    let count = StepSpec::new("count",
                              step_fn("1", |ctx| {
                                  let n = match ctx.input("numbers")? {
                                      ArtifactValue::Json(Value::Array(items)) => items.len() as i64,
                                      other => return Err(format!("unexpected input {other:?}")),
                                  };
                                  ctx.set_output("n", ArtifactValue::Integer(n));
                                  Ok(())
                              })).input("numbers", "json", "a", "numbers")
                                 .output(OutputSpec::new("n", "primitive.int"))
                                 .enable_cache(true);
    let pipeline = Pipeline::builder("scoped").step(numbers_step().enable_cache(true)).step(count).build().unwrap();

    h.dispatcher().run(&pipeline, RunOptions::default()).await.unwrap();
    let warm = h.dispatcher().run(&pipeline, RunOptions::default()).await.unwrap();
    assert_eq!(warm.status_of("a"), Some(StepStatus::Cached));
    assert_eq!(warm.status_of("count"), Some(StepStatus::Cached));
    let first_store_len = h.store.len();

    let other = h.activate_second_store();
    let moved = h.dispatcher().run(&pipeline, RunOptions::default()).await.unwrap();
    assert_eq!(moved.status, RunStatus::Succeeded);
    assert_eq!(moved.status_of("a"), Some(StepStatus::Succeeded));
    assert_eq!(moved.status_of("count"), Some(StepStatus::Succeeded));
    assert_eq!(h.local.submissions(), 4);
    assert_eq!(h.store.len(), first_store_len);
    let n = moved.artifact("count", "n").unwrap();
    let loaded = h.ctx
                  .materializers()
                  .get("builtin.primitive")
                  .unwrap()
                  .load(&ScopedStore::new(other.as_ref(), n.uri.clone()), &n.data_type)
                  .unwrap();
    assert_eq!(loaded, ArtifactValue::Integer(3));
}

#[tokio::test]
async fn panicking_backend_fails_the_step_instead_of_leaving_it_running() {
    let h = Harness::new();
    let exploding = StepSpec::new("a", step_fn("1", |_| -> Result<(), String> { panic!("entrypoint blew up") }))
        .output(OutputSpec::new("numbers", "json"));
    let side = StepSpec::new("side", step_fn("1", |_| Ok(())));
    let pipeline = Pipeline::builder("panics").step(exploding)
                                              .step(failing_step())
                                              .step(side)
                                              .build()
                                              .unwrap();
    let report = h.dispatcher().run(&pipeline, RunOptions::default()).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.status_of("a"), Some(StepStatus::Failed));
    assert_eq!(report.status_of("b"), Some(StepStatus::SkippedUpstreamFailure));
    assert_eq!(report.status_of("side"), Some(StepStatus::Succeeded));
    assert!(matches!(report.failures()[0], ExecutionError::Aborted { step, .. } if step == "a"));
    assert!(report.steps.values().all(|r| r.status != StepStatus::Running));
}

#[tokio::test]
async fn finished_jobs_are_released_on_their_backend() {
    let h = Harness::new();
    let pipeline = Pipeline::builder("abc").step(numbers_step())
                                           .step(failing_step())
                                           .step(sink_step())
                                           .build()
                                           .unwrap();
    h.dispatcher().run(&pipeline, RunOptions::default()).await.unwrap();
    let slow = StepSpec::new("slow", step_fn("1", |_| Ok(()))).on_execution_backend("jobs")
                                                                .timeout(Duration::from_millis(30));
    let timeout = Pipeline::builder("timeout").step(slow).build().unwrap();
    h.dispatcher().run(&timeout, RunOptions::default()).await.unwrap();

    assert_eq!(h.local.submissions(), 2);
    assert_eq!(h.local.tracked_jobs(), 0);
    assert_eq!(h.jobs.submissions(), 1);
    assert_eq!(h.jobs.tracked_jobs(), 0);
}

#[tokio::test]
async fn unknown_execution_backend_is_rejected_before_running() {
    let h = Harness::new();
    let step = StepSpec::new("x", step_fn("1", |_| Ok(()))).on_execution_backend("gpu-cluster");
    let pipeline = Pipeline::builder("bad-backend").step(step).build().unwrap();
    let err = h.dispatcher().run(&pipeline, RunOptions::default()).await.unwrap_err();
    assert!(matches!(err,
                     FlowError::Configuration(ConfigurationError::UnknownExecutionBackend { ref backend, .. })
                         if backend == "gpu-cluster"));
    assert!(h.events.runs().unwrap().is_empty());
}

struct UpperText;

impl Materializer for UpperText {
    fn name(&self) -> &str {
        "upper-text"
    }

    fn handled_types(&self) -> Vec<DataType> {
        vec![DataType::new("text.shout")]
    }

    fn load(&self, store: &ScopedStore<'_>, _: &DataType) -> Result<ArtifactValue, MaterializationError> {
        Ok(ArtifactValue::Text(String::from_utf8_lossy(&store.read("shout.txt")?).to_string()))
    }

    fn save(&self, store: &ScopedStore<'_>, value: &ArtifactValue) -> Result<(), MaterializationError> {
        match value {
            ArtifactValue::Text(s) => Ok(store.put("shout.txt", s.to_uppercase().as_bytes())?),
            other => Err(MaterializationError::UnsupportedValue { materializer: "upper-text".into(),
                                                                  found: other.variant_name().into() }),
        }
    }

    fn extract_metadata(&self, _: &ArtifactValue) -> Result<BTreeMap<String, Value>, MaterializationError> {
        Ok(BTreeMap::from([("case".to_string(), json!("upper"))]))
    }
}

#[tokio::test]
async fn registered_materializer_takes_over_its_subtype_only() {
    let h = Harness::new();
    h.ctx.register_materializer(Arc::new(UpperText));
    let step = StepSpec::new("say",
                             step_fn("1", |ctx| {
                                 ctx.set_output("loud", ArtifactValue::Text("hey".into()));
                                 ctx.set_output("plain", ArtifactValue::Text("hey".into()));
                                 Ok(())
                             })).output(OutputSpec::new("loud", "text.shout"))
                                .output(OutputSpec::new("plain", "text"));
    let pipeline = Pipeline::builder("shout").step(step).build().unwrap();
    let report = h.dispatcher().run(&pipeline, RunOptions::default()).await.unwrap();

    let loud = report.artifact("say", "loud").unwrap();
    assert_eq!(loud.materializer.as_deref(), Some("upper-text"));
    assert_eq!(loud.metadata.get("case"), Some(&json!("upper")));
    assert_eq!(report.artifact("say", "plain").unwrap().materializer.as_deref(), Some("builtin.text"));
    let loaded = UpperText.load(&ScopedStore::new(h.store.as_ref(), loud.uri.clone()), &loud.data_type).unwrap();
    assert_eq!(loaded, ArtifactValue::Text("HEY".into()));
}
