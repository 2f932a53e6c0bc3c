//! Step dispatcher: contrato de execution backend, polling con backoff,
//! cancelación, cache y ejecución de runs.

pub mod backend;
pub mod backoff;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod dispatcher;
pub mod report;

pub use backend::{ExecutionBackend, ExecutionEnvironment, JobStatus, ResolvedInput, RunHandle, StepFailure};
pub use backoff::Backoff;
pub use cache::cache_key;
pub use cancel::{cancellation, CancelHandle, CancelSignal};
pub use config::{resolve_toggle, DispatchConfig, RunOptions};
pub use dispatcher::StepDispatcher;
pub use report::{RunReport, StepRecord};
