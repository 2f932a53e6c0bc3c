//! Protocolo de materialización: cómo un valor tipado cruza la frontera
//! entre steps a través del artifact store.
//!
//! Un materializer sólo ve un `ScopedStore` limitado a la URI asignada al
//! artifact, de modo que no puede leer ni escribir fuera de ella.

pub mod builtin;
pub mod opaque;
pub mod registry;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::errors::MaterializationError;
use crate::model::{ArtifactValue, DataType, ScopedStore, Visualization};

pub use builtin::{BytesMaterializer, JsonMaterializer, ModelMaterializer, PrimitiveMaterializer, TextMaterializer};
pub use opaque::OpaqueMaterializer;
pub use registry::{MaterializerRegistry, Resolution};

pub trait Materializer: Send + Sync {
    /// Identificador estable (se guarda en cada `ArtifactVersion`).
    fn name(&self) -> &str;
    fn handled_types(&self) -> Vec<DataType>;
    fn load(&self, store: &ScopedStore<'_>, data_type: &DataType) -> Result<ArtifactValue, MaterializationError>;
    /// Debe ser idempotente: repetir el guardado del mismo valor no falla.
    fn save(&self, store: &ScopedStore<'_>, value: &ArtifactValue) -> Result<(), MaterializationError>;

    fn extract_metadata(&self, _value: &ArtifactValue) -> Result<BTreeMap<String, Value>, MaterializationError> {
        Ok(BTreeMap::new())
    }

    /// Escribe visualizaciones bajo `store` y devuelve su ubicación y tipo.
    fn produce_visualizations(&self,
                              _store: &ScopedStore<'_>,
                              _data_type: &DataType,
                              _value: &ArtifactValue)
                              -> Result<Vec<Visualization>, MaterializationError> {
        Ok(Vec::new())
    }

    /// `data_type` es igual o subtipo de algún tipo declarado.
    fn handles(&self, data_type: &DataType) -> bool {
        self.handled_types().iter().any(|t| data_type.is_subtype_of(t))
    }

    /// `false` para formatos que no garantizan compatibilidad entre versiones.
    fn is_portable(&self) -> bool {
        true
    }
}

pub(crate) fn unsupported(materializer: &str, value: &ArtifactValue) -> MaterializationError {
    MaterializationError::UnsupportedValue { materializer: materializer.to_string(),
                                             found: value.variant_name().to_string() }
}

pub(crate) fn serialization(materializer: &str, cause: impl ToString) -> MaterializationError {
    MaterializationError::Serialization { materializer: materializer.to_string(),
                                         cause: cause.to_string() }
}
