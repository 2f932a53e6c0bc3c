//! Catálogo de `ArtifactVersion`s (filas de linaje y cache).
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::warn;
use uuid::Uuid;

use super::ArtifactVersion;
use crate::errors::StorageError;

pub trait ArtifactCatalog: Send + Sync {
    /// Registra una fila nueva. Un id repetido es un error: las versiones son
    /// inmutables.
    fn record(&self, version: &ArtifactVersion) -> Result<(), StorageError>;
    /// Registra todas las filas de un step o ninguna. Si una falla, las ya
    /// registradas se retiran con `forget`.
    fn record_all(&self, versions: &[ArtifactVersion]) -> Result<(), StorageError> {
        for (i, version) in versions.iter().enumerate() {
            if let Err(err) = self.record(version) {
                for done in &versions[..i] {
                    if let Err(undo) = self.forget(done.id) {
                        warn!("could not withdraw artifact row {}: {undo}", done.id);
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }
    /// Retira una fila de un `record_all` que no llegó a completarse.
    fn forget(&self, id: Uuid) -> Result<(), StorageError>;
    fn get(&self, id: Uuid) -> Result<Option<ArtifactVersion>, StorageError>;
    /// Versiones de un run ordenadas por creación.
    fn list_for_run(&self, run_id: Uuid) -> Result<Vec<ArtifactVersion>, StorageError>;
    /// Conjunto completo de outputs de la ejecución más reciente que produjo
    /// `cache_key`. Vacío si no hay ninguna.
    fn find_by_cache_key(&self, cache_key: &str) -> Result<Vec<ArtifactVersion>, StorageError>;
}

#[derive(Default)]
pub struct InMemoryArtifactCatalog {
    inner: DashMap<Uuid, ArtifactVersion>,
}

impl InMemoryArtifactCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArtifactCatalog for InMemoryArtifactCatalog {
    fn record(&self, version: &ArtifactVersion) -> Result<(), StorageError> {
        match self.inner.entry(version.id) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists(version.id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(version.clone());
                Ok(())
            }
        }
    }

    fn forget(&self, id: Uuid) -> Result<(), StorageError> {
        self.inner.remove(&id);
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<ArtifactVersion>, StorageError> {
        Ok(self.inner.get(&id).map(|v| v.value().clone()))
    }

    fn list_for_run(&self, run_id: Uuid) -> Result<Vec<ArtifactVersion>, StorageError> {
        let mut out: Vec<ArtifactVersion> =
            self.inner.iter().filter(|e| e.run_id == run_id).map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.output_name.cmp(&b.output_name)));
        Ok(out)
    }

    fn find_by_cache_key(&self, cache_key: &str) -> Result<Vec<ArtifactVersion>, StorageError> {
        let hits: Vec<ArtifactVersion> = self.inner
                                             .iter()
                                             .filter(|e| e.cache_key.as_deref() == Some(cache_key))
                                             .map(|e| e.value().clone())
                                             .collect();
        Ok(latest_run_only(hits))
    }
}

/// Se queda con las filas del run más reciente entre varios candidatos.
pub fn latest_run_only(mut hits: Vec<ArtifactVersion>) -> Vec<ArtifactVersion> {
    let Some(latest) = hits.iter().max_by_key(|v| v.created_at).map(|v| v.run_id) else {
        return hits;
    };
    hits.retain(|v| v.run_id == latest);
    hits.sort_by(|a, b| a.output_name.cmp(&b.output_name));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DataType;
    use chrono::{Duration, Utc};
    use std::collections::BTreeMap;

    fn version(run_id: Uuid, output: &str, key: Option<&str>, age_secs: i64) -> ArtifactVersion {
        ArtifactVersion { id: Uuid::new_v4(),
                          run_id,
                          step_name: "s".into(),
                          output_name: output.into(),
                          data_type: DataType::new("json"),
                          uri: format!("{run_id}/s/{output}"),
                          materializer: Some("builtin.json".into()),
                          metadata: BTreeMap::new(),
                          visualizations: vec![],
                          content_hash: "h".into(),
                          cache_key: key.map(str::to_string),
                          created_at: Utc::now() - Duration::seconds(age_secs) }
    }

    #[test]
    fn record_is_insert_only() {
        let cat = InMemoryArtifactCatalog::new();
        let v = version(Uuid::new_v4(), "out", None, 0);
        cat.record(&v).unwrap();
        assert!(matches!(cat.record(&v), Err(StorageError::AlreadyExists(_))));
        assert_eq!(cat.get(v.id).unwrap(), Some(v));
    }

    #[test]
    fn cache_lookup_returns_latest_run_set() {
        let cat = InMemoryArtifactCatalog::new();
        let old_run = Uuid::new_v4();
        let new_run = Uuid::new_v4();
        cat.record(&version(old_run, "a", Some("k"), 60)).unwrap();
        cat.record(&version(new_run, "b", Some("k"), 1)).unwrap();
        cat.record(&version(new_run, "a", Some("k"), 1)).unwrap();
        cat.record(&version(new_run, "c", Some("other"), 1)).unwrap();
        let hits = cat.find_by_cache_key("k").unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|v| v.run_id == new_run));
        assert_eq!(hits[0].output_name, "a");
        assert!(cat.find_by_cache_key("missing").unwrap().is_empty());
    }

    #[test]
    fn concurrent_writers_of_one_id_get_a_single_winner() {
        let cat = std::sync::Arc::new(InMemoryArtifactCatalog::new());
        let v = version(Uuid::new_v4(), "out", None, 0);
        let writers: Vec<_> = (0..8).map(|_| {
                                        let (cat, v) = (cat.clone(), v.clone());
                                        std::thread::spawn(move || cat.record(&v).is_ok())
                                    })
                                    .collect();
        let winners = writers.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn record_all_withdraws_earlier_rows_when_one_fails() {
        let cat = InMemoryArtifactCatalog::new();
        let run = Uuid::new_v4();
        let taken = version(run, "b", None, 0);
        cat.record(&taken).unwrap();
        let first = version(run, "a", None, 0);
        let batch = vec![first.clone(), taken.clone()];
        assert!(matches!(cat.record_all(&batch), Err(StorageError::AlreadyExists(_))));
        assert_eq!(cat.get(first.id).unwrap(), None);
        assert_eq!(cat.list_for_run(run).unwrap(), vec![taken]);
    }
}
