//! Object store remoto simulado (`bucket://<name>`).
//!
//! Mantiene los objetos en memoria pero se declara remoto: es el artifact
//! store que exigen los orquestadores y execution backends remotos.
use std::collections::BTreeMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use flow_core::errors::StorageError;
use flow_core::model::ArtifactStore;

#[derive(Debug, Default)]
pub struct BucketArtifactStore {
    bucket: String,
    objects: DashMap<String, Vec<u8>>,
}

impl BucketArtifactStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self { bucket: bucket.into(),
               objects: DashMap::new() }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn key(&self, uri: &str) -> String {
        let scheme = format!("bucket://{}/", self.bucket);
        uri.strip_prefix(&scheme).unwrap_or(uri).to_string()
    }
}

impl ArtifactStore for BucketArtifactStore {
    fn root(&self) -> String {
        format!("bucket://{}", self.bucket)
    }

    fn read(&self, uri: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .get(&self.key(uri))
            .map(|o| o.value().clone())
            .ok_or_else(|| StorageError::NotFound(uri.to_string()))
    }

    fn write(&self, uri: &str, bytes: &[u8]) -> Result<(), StorageError> {
        // Un objeto sólo es visible al completar el put.
        match self.objects.entry(self.key(uri)) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists(uri.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(bytes.to_vec());
                Ok(())
            }
        }
    }

    fn exists(&self, uri: &str) -> Result<bool, StorageError> {
        Ok(self.objects.contains_key(&self.key(uri)))
    }

    fn delete(&self, uri: &str) -> Result<(), StorageError> {
        self.objects.remove(&self.key(uri));
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = self.key(prefix);
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        let keys: BTreeMap<String, ()> = self.objects
                                             .iter()
                                             .filter(|o| o.key() == &prefix || o.key().starts_with(&dir))
                                             .map(|o| (o.key().clone(), ()))
                                             .collect();
        Ok(keys.into_keys().collect())
    }
}
