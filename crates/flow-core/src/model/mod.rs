//! Modelo de datos neutral: tipos lógicos, valores, versiones de artifact,
//! contrato de artifact store y catálogo.

pub mod artifact;
pub mod catalog;
pub mod data_type;
pub mod store;
pub mod value;

pub use artifact::{ArtifactVersion, Visualization, VisualizationKind};
pub use catalog::{latest_run_only, ArtifactCatalog, InMemoryArtifactCatalog};
pub use data_type::DataType;
pub use store::{join_uri, ArtifactStore, InMemoryArtifactStore, ScopedStore, WrittenFile};
pub use value::{ArtifactValue, ModelPayload, TypedValue};
