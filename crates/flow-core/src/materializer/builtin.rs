//! Materializers incluidos por defecto.
//!
//! | nombre              | tipo raíz   | fichero      |
//! |---------------------|-------------|--------------|
//! | `builtin.bytes`     | `bytes`     | `data.bin`   |
//! | `builtin.text`      | `text`      | `data.txt`   |
//! | `builtin.json`      | `json`      | `data.json`  |
//! | `builtin.primitive` | `primitive` | `value.json` |
//! | `builtin.model`     | `model`     | `model.json` |
use std::collections::BTreeMap;

use serde_json::{json, Value};

use super::{serialization, unsupported, Materializer};
use crate::constants::{MODEL_DATA_TYPE, VISUALIZATIONS_DIR};
use crate::errors::MaterializationError;
use crate::model::{ArtifactValue, DataType, ModelPayload, ScopedStore, Visualization, VisualizationKind};

fn write_visualization(store: &ScopedStore<'_>,
                       file: &str,
                       bytes: &[u8],
                       kind: VisualizationKind)
                       -> Result<Vec<Visualization>, MaterializationError> {
    let rel = format!("{VISUALIZATIONS_DIR}/{file}");
    store.put(&rel, bytes)?;
    Ok(vec![Visualization { uri: store.uri_of(&rel)?,
                            kind }])
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BytesMaterializer;

impl Materializer for BytesMaterializer {
    fn name(&self) -> &str {
        "builtin.bytes"
    }

    fn handled_types(&self) -> Vec<DataType> {
        vec![DataType::new("bytes")]
    }

    fn load(&self, store: &ScopedStore<'_>, _data_type: &DataType) -> Result<ArtifactValue, MaterializationError> {
        Ok(ArtifactValue::Bytes(store.read("data.bin")?))
    }

    fn save(&self, store: &ScopedStore<'_>, value: &ArtifactValue) -> Result<(), MaterializationError> {
        match value {
            ArtifactValue::Bytes(b) => Ok(store.put("data.bin", b)?),
            other => Err(unsupported(self.name(), other)),
        }
    }

    fn extract_metadata(&self, value: &ArtifactValue) -> Result<BTreeMap<String, Value>, MaterializationError> {
        let mut meta = BTreeMap::new();
        if let ArtifactValue::Bytes(b) = value {
            meta.insert("byte_length".to_string(), json!(b.len()));
        }
        Ok(meta)
    }

    /// `bytes.image.*` se visualiza como imagen.
    fn produce_visualizations(&self,
                              store: &ScopedStore<'_>,
                              data_type: &DataType,
                              value: &ArtifactValue)
                              -> Result<Vec<Visualization>, MaterializationError> {
        match value {
            ArtifactValue::Bytes(b) if data_type.is_subtype_of(&DataType::new("bytes.image")) => {
                write_visualization(store, "image.bin", b, VisualizationKind::Image)
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TextMaterializer;

impl Materializer for TextMaterializer {
    fn name(&self) -> &str {
        "builtin.text"
    }

    fn handled_types(&self) -> Vec<DataType> {
        vec![DataType::new("text")]
    }

    fn load(&self, store: &ScopedStore<'_>, _data_type: &DataType) -> Result<ArtifactValue, MaterializationError> {
        let bytes = store.read("data.txt")?;
        String::from_utf8(bytes).map(ArtifactValue::Text)
                                .map_err(|e| serialization(self.name(), e))
    }

    fn save(&self, store: &ScopedStore<'_>, value: &ArtifactValue) -> Result<(), MaterializationError> {
        match value {
            ArtifactValue::Text(t) => Ok(store.put("data.txt", t.as_bytes())?),
            other => Err(unsupported(self.name(), other)),
        }
    }

    fn extract_metadata(&self, value: &ArtifactValue) -> Result<BTreeMap<String, Value>, MaterializationError> {
        let mut meta = BTreeMap::new();
        if let ArtifactValue::Text(t) = value {
            meta.insert("characters".to_string(), json!(t.chars().count()));
            meta.insert("lines".to_string(), json!(t.lines().count()));
        }
        Ok(meta)
    }

    fn produce_visualizations(&self,
                              store: &ScopedStore<'_>,
                              data_type: &DataType,
                              value: &ArtifactValue)
                              -> Result<Vec<Visualization>, MaterializationError> {
        let ArtifactValue::Text(text) = value else {
            return Ok(Vec::new());
        };
        let kind = [("text.markdown", "index.md", VisualizationKind::Markdown),
                    ("text.html", "index.html", VisualizationKind::Html),
                    ("text.csv", "table.csv", VisualizationKind::Csv)].into_iter()
                                                                       .find(|(t, _, _)| {
                                                                           data_type.is_subtype_of(&DataType::new(*t))
                                                                       });
        match kind {
            Some((_, file, kind)) => write_visualization(store, file, text.as_bytes(), kind),
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMaterializer;

impl Materializer for JsonMaterializer {
    fn name(&self) -> &str {
        "builtin.json"
    }

    fn handled_types(&self) -> Vec<DataType> {
        vec![DataType::new("json")]
    }

    fn load(&self, store: &ScopedStore<'_>, _data_type: &DataType) -> Result<ArtifactValue, MaterializationError> {
        let bytes = store.read("data.json")?;
        serde_json::from_slice(&bytes).map(ArtifactValue::Json)
                                      .map_err(|e| serialization(self.name(), e))
    }

    fn save(&self, store: &ScopedStore<'_>, value: &ArtifactValue) -> Result<(), MaterializationError> {
        match value {
            ArtifactValue::Json(v) => {
                let bytes = serde_json::to_vec(v).map_err(|e| serialization(self.name(), e))?;
                Ok(store.put("data.json", &bytes)?)
            }
            other => Err(unsupported(self.name(), other)),
        }
    }

    fn extract_metadata(&self, value: &ArtifactValue) -> Result<BTreeMap<String, Value>, MaterializationError> {
        let mut meta = BTreeMap::new();
        match value {
            ArtifactValue::Json(Value::Object(map)) => {
                meta.insert("json_kind".to_string(), json!("object"));
                meta.insert("keys".to_string(), json!(map.len()));
            }
            ArtifactValue::Json(Value::Array(items)) => {
                meta.insert("json_kind".to_string(), json!("array"));
                meta.insert("items".to_string(), json!(items.len()));
            }
            ArtifactValue::Json(_) => {
                meta.insert("json_kind".to_string(), json!("scalar"));
            }
            _ => {}
        }
        Ok(meta)
    }
}

/// Enteros, flotantes, booleanos y cadenas cortas. Se guarda el valor
/// etiquetado para que `load` devuelva la misma variante.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrimitiveMaterializer;

impl Materializer for PrimitiveMaterializer {
    fn name(&self) -> &str {
        "builtin.primitive"
    }

    fn handled_types(&self) -> Vec<DataType> {
        vec![DataType::new("primitive")]
    }

    fn load(&self, store: &ScopedStore<'_>, _data_type: &DataType) -> Result<ArtifactValue, MaterializationError> {
        let bytes = store.read("value.json")?;
        let value: ArtifactValue = serde_json::from_slice(&bytes).map_err(|e| serialization(self.name(), e))?;
        match value {
            ArtifactValue::Integer(_) | ArtifactValue::Float(_) | ArtifactValue::Boolean(_) | ArtifactValue::Text(_) => {
                Ok(value)
            }
            other => Err(unsupported(self.name(), &other)),
        }
    }

    fn save(&self, store: &ScopedStore<'_>, value: &ArtifactValue) -> Result<(), MaterializationError> {
        match value {
            ArtifactValue::Integer(_) | ArtifactValue::Float(_) | ArtifactValue::Boolean(_) | ArtifactValue::Text(_) => {
                let bytes = serde_json::to_vec(value).map_err(|e| serialization(self.name(), e))?;
                Ok(store.put("value.json", &bytes)?)
            }
            other => Err(unsupported(self.name(), other)),
        }
    }

    fn extract_metadata(&self, value: &ArtifactValue) -> Result<BTreeMap<String, Value>, MaterializationError> {
        let mut meta = BTreeMap::new();
        let preview = match value {
            ArtifactValue::Integer(i) => json!(i),
            ArtifactValue::Float(f) => json!(f),
            ArtifactValue::Boolean(b) => json!(b),
            ArtifactValue::Text(t) => json!(t.chars().take(64).collect::<String>()),
            _ => Value::Null,
        };
        meta.insert("value".to_string(), preview);
        Ok(meta)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ModelMaterializer;

impl Materializer for ModelMaterializer {
    fn name(&self) -> &str {
        "builtin.model"
    }

    fn handled_types(&self) -> Vec<DataType> {
        vec![DataType::new(MODEL_DATA_TYPE)]
    }

    fn load(&self, store: &ScopedStore<'_>, _data_type: &DataType) -> Result<ArtifactValue, MaterializationError> {
        let bytes = store.read("model.json")?;
        serde_json::from_slice::<ModelPayload>(&bytes).map(ArtifactValue::Model)
                                                      .map_err(|e| serialization(self.name(), e))
    }

    fn save(&self, store: &ScopedStore<'_>, value: &ArtifactValue) -> Result<(), MaterializationError> {
        match value {
            ArtifactValue::Model(m) => {
                let bytes = serde_json::to_vec(m).map_err(|e| serialization(self.name(), e))?;
                Ok(store.put("model.json", &bytes)?)
            }
            other => Err(unsupported(self.name(), other)),
        }
    }

    fn extract_metadata(&self, value: &ArtifactValue) -> Result<BTreeMap<String, Value>, MaterializationError> {
        let mut meta = BTreeMap::new();
        if let ArtifactValue::Model(m) = value {
            meta.insert("model_name".to_string(), json!(m.name));
            meta.insert("framework".to_string(), json!(m.framework));
            meta.insert("parameters".to_string(), json!(m.weights.len()));
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArtifactStore, InMemoryArtifactStore};
    use std::sync::Arc;

    fn round_trip(m: &dyn Materializer, data_type: &str, value: ArtifactValue) {
        let store = InMemoryArtifactStore::new();
        let scope = ScopedStore::new(&store, "r/s/o/1");
        let t = DataType::new(data_type);
        assert!(m.handles(&t), "{} should handle {t}", m.name());
        m.save(&scope, &value).unwrap();
        m.save(&scope, &value).unwrap();
        assert_eq!(m.load(&scope, &t).unwrap(), value, "{}", m.name());
        assert!(store.list("r").unwrap().iter().all(|u| u.starts_with("r/s/o/1/")));
    }

    #[test]
    fn every_builtin_round_trips_representative_values() {
        let cases: Vec<(Arc<dyn Materializer>, &str, ArtifactValue)> =
            vec![(Arc::new(BytesMaterializer), "bytes", ArtifactValue::Bytes(vec![0, 1, 255])),
                 (Arc::new(BytesMaterializer), "bytes.image.png", ArtifactValue::Bytes(vec![137, 80])),
                 (Arc::new(TextMaterializer), "text", ArtifactValue::Text("héllo\nworld".into())),
                 (Arc::new(TextMaterializer), "text.csv", ArtifactValue::Text("a,b\n1,2".into())),
                 (Arc::new(JsonMaterializer), "json", ArtifactValue::Json(json!({"k": [1, null, "x"]}))),
                 (Arc::new(PrimitiveMaterializer), "primitive.int", ArtifactValue::Integer(-42)),
                 (Arc::new(PrimitiveMaterializer), "primitive.float", ArtifactValue::Float(0.25)),
                 (Arc::new(PrimitiveMaterializer), "primitive.bool", ArtifactValue::Boolean(true)),
                 (Arc::new(ModelMaterializer),
                  "model.linear",
                  ArtifactValue::Model(ModelPayload { name: "lr".into(),
                                                      framework: "numpy".into(),
                                                      hyperparameters: BTreeMap::from([("alpha".to_string(),
                                                                                        json!(0.1))]),
                                                      weights: vec![0.5, -1.5] }))];
        for (m, t, v) in cases {
            round_trip(m.as_ref(), t, v);
        }
    }

    #[test]
    fn wrong_variant_is_rejected() {
        let store = InMemoryArtifactStore::new();
        let scope = ScopedStore::new(&store, "x");
        let err = JsonMaterializer.save(&scope, &ArtifactValue::Integer(1)).unwrap_err();
        assert_eq!(err,
                   MaterializationError::UnsupportedValue { materializer: "builtin.json".into(),
                                                            found: "integer".into() });
        assert!(store.is_empty());
    }

    #[test]
    fn text_subtypes_produce_visualizations() {
        let store = InMemoryArtifactStore::new();
        let scope = ScopedStore::new(&store, "r/s/o/2");
        let value = ArtifactValue::Text("# title".into());
        let viz = TextMaterializer.produce_visualizations(&scope, &DataType::new("text.markdown"), &value)
                                  .unwrap();
        assert_eq!(viz,
                   vec![Visualization { uri: "r/s/o/2/visualizations/index.md".into(),
                                        kind: VisualizationKind::Markdown }]);
        let none = TextMaterializer.produce_visualizations(&scope, &DataType::new("text"), &value).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn metadata_is_type_specific() {
        let meta = TextMaterializer.extract_metadata(&ArtifactValue::Text("a\nb".into())).unwrap();
        assert_eq!(meta["lines"], json!(2));
        let meta = JsonMaterializer.extract_metadata(&ArtifactValue::Json(json!([1, 2, 3]))).unwrap();
        assert_eq!(meta["items"], json!(3));
    }
}
