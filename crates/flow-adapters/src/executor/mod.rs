//! Execution backends.

pub mod in_process;
pub mod job_service;
pub mod jobs;

pub use in_process::InProcessBackend;
pub use job_service::{JobServiceSettings, SimulatedJobService};
pub use jobs::{JobState, JobTable};
