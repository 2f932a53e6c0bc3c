use std::time::Duration;

use uuid::Uuid;

use crate::config::FlowConfig;

/// Parámetros del dispatcher (derivados de `FlowConfig` o construidos a mano).
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    pub poll_initial: Duration,
    pub poll_max: Duration,
    pub poll_factor: f64,
    pub step_timeout: Duration,
    pub max_poll_failures: u32,
    pub max_parallel: usize,
}

impl DispatchConfig {
    pub fn from_config(cfg: &FlowConfig) -> Self {
        Self { poll_initial: cfg.poll_initial,
               poll_max: cfg.poll_max,
               poll_factor: cfg.poll_factor,
               step_timeout: cfg.step_timeout,
               max_poll_failures: cfg.max_poll_failures,
               max_parallel: cfg.max_parallel_steps.max(1) }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::from_config(&FlowConfig::default())
    }
}

/// Overrides a nivel de run; prevalecen sobre step y pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Id fijo para el run (por defecto se genera uno).
    pub run_id: Option<Uuid>,
    pub enable_cache: Option<bool>,
    pub enable_artifact_metadata: Option<bool>,
    pub enable_artifact_visualization: Option<bool>,
}

/// Precedencia run > step > pipeline > default.
pub fn resolve_toggle(run: Option<bool>, step: Option<bool>, pipeline: Option<bool>, default: bool) -> bool {
    run.or(step).or(pipeline).unwrap_or(default)
}
