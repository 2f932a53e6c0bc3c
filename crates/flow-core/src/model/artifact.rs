//! `ArtifactVersion`: un valor persistido, creado una única vez por el
//! dispatcher cuando un step produce un output y de sólo lectura después.
//!
//! - `uri` es opaca y relativa a la raíz del artifact store del stack.
//! - `materializer` es `None` para outputs no materializados (handle crudo).
//! - `content_hash` es el sha256 de los bytes guardados; para handles crudos
//!   se deriva de la propia ubicación.
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationKind {
    Image,
    Markdown,
    Html,
    Csv,
}

impl fmt::Display for VisualizationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Image => "image",
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Csv => "csv",
        };
        f.write_str(s)
    }
}

/// Visualización producida junto al artifact, bajo su propia URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visualization {
    pub uri: String,
    pub kind: VisualizationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactVersion {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_name: String,
    pub output_name: String,
    pub data_type: DataType,
    pub uri: String,
    pub materializer: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub visualizations: Vec<Visualization>,
    pub content_hash: String,
    /// Clave de cache del step que lo produjo (si el step tenía cache activa).
    pub cache_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ArtifactVersion {
    pub fn is_materialized(&self) -> bool {
        self.materializer.is_some()
    }
}
