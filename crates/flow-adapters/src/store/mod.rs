//! Implementaciones del contrato de artifact store.

pub mod bucket;
pub mod local;

pub use bucket::BucketArtifactStore;
pub use local::LocalArtifactStore;
