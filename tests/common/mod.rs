use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flow_adapters::SimulatedModelDeployer;
use flow_core::deploy::InMemoryServiceStore;
use flow_core::{ArtifactVersion, DataType, DeployConfig, DeploymentServiceManager, DispatchConfig, FlowConfig};
use uuid::Uuid;

pub fn config() -> FlowConfig {
    FlowConfig { artifact_root: std::env::temp_dir().join(format!("stackflow-root-{}", Uuid::new_v4()))
                                                    .display()
                                                    .to_string(),
                 ..FlowConfig::default() }
}

pub fn dispatch_config() -> DispatchConfig {
    DispatchConfig { poll_initial: Duration::from_millis(2),
                     poll_max: Duration::from_millis(10),
                     poll_factor: 2.0,
                     step_timeout: Duration::from_secs(10),
                     max_poll_failures: 2,
                     max_parallel: 4 }
}

pub fn deploy_config() -> DeployConfig {
    DeployConfig { poll_initial: Duration::from_millis(2),
                   poll_max: Duration::from_millis(10),
                   poll_factor: 2.0,
                   startup_timeout: Duration::from_secs(5),
                   max_poll_failures: 3 }
}

/// Manager sobre un deployer simulado que el test conserva para inspeccionarlo.
pub fn manager() -> (DeploymentServiceManager, Arc<SimulatedModelDeployer>) {
    let deployer = Arc::new(SimulatedModelDeployer::new("local-inference", 8123, Duration::from_millis(15)));
    let manager = DeploymentServiceManager::new(deployer.clone(), Arc::new(InMemoryServiceStore::new()), deploy_config());
    (manager, deployer)
}

pub fn model_version(run_id: Uuid) -> ArtifactVersion {
    ArtifactVersion { id: Uuid::new_v4(),
                      run_id,
                      step_name: "train".into(),
                      output_name: "model".into(),
                      data_type: DataType::new("model.sklearn"),
                      uri: format!("memory://{run_id}/train/model"),
                      materializer: Some("builtin.model".into()),
                      metadata: BTreeMap::new(),
                      visualizations: Vec::new(),
                      content_hash: Uuid::new_v4().simple().to_string(),
                      cache_key: None,
                      created_at: Utc::now() }
}
