//! Materializer de último recurso.
//!
//! Produce un blob opaco (cabecera de formato + JSON etiquetado del valor).
//! No es portable entre versiones y no debe usarse para almacenamiento a
//! largo plazo: el registry avisa cada vez que lo selecciona.
use super::{serialization, Materializer};
use crate::constants::ROOT_DATA_TYPE;
use crate::errors::MaterializationError;
use crate::model::{ArtifactValue, DataType, ScopedStore};

pub const OPAQUE_MATERIALIZER: &str = "builtin.opaque";
const HEADER: &[u8] = b"stackflow-opaque/1\n";
const DATA_FILE: &str = "data.opaque";

#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueMaterializer;

impl Materializer for OpaqueMaterializer {
    fn name(&self) -> &str {
        OPAQUE_MATERIALIZER
    }

    fn handled_types(&self) -> Vec<DataType> {
        vec![DataType::new(ROOT_DATA_TYPE)]
    }

    fn load(&self, store: &ScopedStore<'_>, _data_type: &DataType) -> Result<ArtifactValue, MaterializationError> {
        let bytes = store.read(DATA_FILE)?;
        let body = bytes.strip_prefix(HEADER)
                        .ok_or_else(|| serialization(OPAQUE_MATERIALIZER, "unrecognized opaque blob header"))?;
        serde_json::from_slice(body).map_err(|e| serialization(OPAQUE_MATERIALIZER, e))
    }

    fn save(&self, store: &ScopedStore<'_>, value: &ArtifactValue) -> Result<(), MaterializationError> {
        let mut bytes = HEADER.to_vec();
        let body = serde_json::to_vec(value).map_err(|e| serialization(OPAQUE_MATERIALIZER, e))?;
        bytes.extend_from_slice(&body);
        store.put(DATA_FILE, &bytes)?;
        Ok(())
    }

    fn is_portable(&self) -> bool {
        false
    }
}
