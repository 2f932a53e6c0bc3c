//! Steps y pipelines.
//!
//! Un step es una unidad de cómputo con inputs y outputs tipados y con
//! nombre; un pipeline es un DAG de steps. Ambos son inmutables una vez
//! construidos.

mod context;
pub mod definition;
pub mod pipeline;
mod status;

pub use context::{StepContext, StepOutputs};
pub use definition::{step_fn, InputSpec, OutputSpec, StepEntrypoint, StepSettings, StepSpec};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineSettings};
pub use status::{RunStatus, StepStatus};
