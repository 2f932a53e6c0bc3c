//! Clave de cache de un step.
use std::collections::BTreeMap;

use serde_json::json;
use uuid::Uuid;

use super::ResolvedInput;
use crate::constants::ENGINE_VERSION;
use crate::hashing::hash_value;
use crate::step::StepSpec;

/// blake3 sobre el JSON canónico de versión del motor, artifact store,
/// nombre, versión de código, parámetros, outputs declarados y hashes de
/// contenido de los inputs. `None` si algún input es un handle crudo (no hay
/// contenido que comparar).
///
/// El id del artifact store entra en la clave: un hit sólo vale si sus URIs
/// se resuelven en el store del stack activo.
pub fn cache_key(step: &StepSpec, inputs: &[ResolvedInput], artifact_store: Uuid) -> Option<String> {
    if inputs.iter().any(|i| !i.artifact.is_materialized()) {
        return None;
    }
    let input_hashes: BTreeMap<&str, &str> =
        inputs.iter().map(|i| (i.name.as_str(), i.artifact.content_hash.as_str())).collect();
    let outputs: Vec<_> = step.outputs
                              .iter()
                              .map(|o| json!([o.name, o.data_type, o.materializer, o.materialize]))
                              .collect();
    Some(hash_value(&json!({
        "engine": ENGINE_VERSION,
        "artifact_store": artifact_store,
        "step": step.name,
        "code_version": step.code_version(),
        "params": step.params,
        "outputs": outputs,
        "inputs": input_hashes,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArtifactVersion, DataType};
    use crate::step::{step_fn, OutputSpec};
    use chrono::Utc;

    fn input(hash: &str, materialized: bool) -> ResolvedInput {
        ResolvedInput { name: "x".into(),
                        data_type: DataType::new("json"),
                        artifact: ArtifactVersion { id: Uuid::new_v4(),
                                                    run_id: Uuid::new_v4(),
                                                    step_name: "up".into(),
                                                    output_name: "out".into(),
                                                    data_type: DataType::new("json"),
                                                    uri: "u".into(),
                                                    materializer: materialized.then(|| "builtin.json".to_string()),
                                                    metadata: Default::default(),
                                                    visualizations: vec![],
                                                    content_hash: hash.into(),
                                                    cache_key: None,
                                                    created_at: Utc::now() } }
    }

    fn spec(version: &str) -> StepSpec {
        StepSpec::new("s", step_fn(version, |_| Ok(()))).params(json!({"k": 1}))
                                                        .output(OutputSpec::new("o", "json"))
    }

    #[test]
    fn key_depends_on_content_not_identity() {
        let store = Uuid::new_v4();
        let a = cache_key(&spec("1"), &[input("h1", true)], store);
        let b = cache_key(&spec("1"), &[input("h1", true)], store);
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_ne!(a, cache_key(&spec("1"), &[input("h2", true)], store));
        assert_ne!(a, cache_key(&spec("2"), &[input("h1", true)], store));
        assert_ne!(a, cache_key(&spec("1").params(json!({"k": 2})), &[input("h1", true)], store));
    }

    #[test]
    fn key_is_scoped_to_the_artifact_store() {
        let a = cache_key(&spec("1"), &[input("h1", true)], Uuid::new_v4());
        let b = cache_key(&spec("1"), &[input("h1", true)], Uuid::new_v4());
        assert!(a.is_some());
        assert_ne!(a, b);
    }

    #[test]
    fn raw_handle_inputs_are_not_cacheable() {
        assert_eq!(cache_key(&spec("1"), &[input("h1", false)], Uuid::new_v4()), None);
    }
}
