//! Valores que cruzan la frontera entre steps.
//!
//! No se introspecciona el tipo en tiempo de ejecución: cada valor viaja
//! acompañado de su `DataType` declarado (`TypedValue`).
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::DataType;

/// Payload de un modelo entrenado. Los pesos son opacos para el núcleo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPayload {
    pub name: String,
    pub framework: String,
    #[serde(default)]
    pub hyperparameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub weights: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ArtifactValue {
    Bytes(Vec<u8>),
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Json(Value),
    Model(ModelPayload),
    /// Ubicación cruda en el artifact store (outputs no materializados).
    Handle(String),
}

impl ArtifactValue {
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::Json(_) => "json",
            Self::Model(_) => "model",
            Self::Handle(_) => "handle",
        }
    }

    pub fn as_handle(&self) -> Option<&str> {
        match self {
            Self::Handle(uri) => Some(uri),
            _ => None,
        }
    }
}

/// Valor más su tipo lógico declarado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    pub data_type: DataType,
    pub value: ArtifactValue,
}

impl TypedValue {
    pub fn new(data_type: impl Into<DataType>, value: ArtifactValue) -> Self {
        Self { data_type: data_type.into(),
               value }
    }
}
