//! Contrato de artifact store y handle con alcance.
//!
//! Las URIs son cadenas opacas relativas a la raíz del store. `write` es
//! write-once y atómica: el contenido sólo es visible bajo la URI final
//! cuando está completo.
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::errors::StorageError;
use crate::hashing::sha256_hex;

pub trait ArtifactStore: Send + Sync {
    /// Identificador de la raíz (directorio, bucket...).
    fn root(&self) -> String;
    fn read(&self, uri: &str) -> Result<Vec<u8>, StorageError>;
    /// Lectura por rango de bytes `[offset, offset + len)`, truncada al final.
    fn read_range(&self, uri: &str, offset: u64, len: u64) -> Result<Vec<u8>, StorageError> {
        let bytes = self.read(uri)?;
        let start = (offset as usize).min(bytes.len());
        let end = start.saturating_add(len as usize).min(bytes.len());
        Ok(bytes[start..end].to_vec())
    }
    fn write(&self, uri: &str, bytes: &[u8]) -> Result<(), StorageError>;
    fn exists(&self, uri: &str) -> Result<bool, StorageError>;
    fn delete(&self, uri: &str) -> Result<(), StorageError>;
    /// URIs bajo un prefijo, en orden lexicográfico.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Une segmentos de URI con `/`, sin duplicar separadores.
pub fn join_uri(base: &str, rel: &str) -> String {
    let base = base.trim_end_matches('/');
    let rel = rel.trim_start_matches('/');
    match (base.is_empty(), rel.is_empty()) {
        (true, _) => rel.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{rel}"),
    }
}

/// Vista de un store limitada a la URI asignada a un artifact. Los
/// materializers sólo reciben esto, así que no pueden tocar otras ubicaciones.
///
/// Registra cada escritura (ruta relativa, sha256, tamaño) para que el
/// dispatcher derive el hash de contenido sin releer el store.
pub struct ScopedStore<'a> {
    store: &'a dyn ArtifactStore,
    base: String,
    written: Mutex<Vec<WrittenFile>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub rel: String,
    pub sha256: String,
    pub size: u64,
}

impl<'a> ScopedStore<'a> {
    pub fn new(store: &'a dyn ArtifactStore, base: impl Into<String>) -> Self {
        Self { store,
               base: base.into(),
               written: Mutex::new(Vec::new()) }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn resolve(&self, rel: &str) -> Result<String, StorageError> {
        if rel.starts_with('/') || rel.contains("://") || rel.split('/').any(|seg| seg == "..") {
            return Err(StorageError::OutOfScope(rel.to_string()));
        }
        Ok(join_uri(&self.base, rel))
    }

    /// URI absoluta (dentro del store) de un fichero relativo.
    pub fn uri_of(&self, rel: &str) -> Result<String, StorageError> {
        self.resolve(rel)
    }

    pub fn read(&self, rel: &str) -> Result<Vec<u8>, StorageError> {
        self.store.read(&self.resolve(rel)?)
    }

    pub fn write(&self, rel: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.store.write(&self.resolve(rel)?, bytes)?;
        self.track(rel, bytes);
        Ok(())
    }

    /// Escritura idempotente: repetir el mismo contenido no es un error;
    /// contenido distinto sí (write-once).
    pub fn put(&self, rel: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let uri = self.resolve(rel)?;
        if self.store.exists(&uri)? {
            if self.store.read(&uri)? == bytes {
                return Ok(());
            }
            return Err(StorageError::AlreadyExists(uri));
        }
        self.store.write(&uri, bytes)?;
        self.track(rel, bytes);
        Ok(())
    }

    fn track(&self, rel: &str, bytes: &[u8]) {
        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        written.push(WrittenFile { rel: rel.to_string(),
                                   sha256: sha256_hex(bytes),
                                   size: bytes.len() as u64 });
    }

    pub fn written(&self) -> Vec<WrittenFile> {
        self.written.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Tamaño total y sha256 de lo escrito: el del único fichero, o el de la
    /// lista ordenada `ruta:sha` si hay varios. `None` si no se escribió nada.
    pub fn digest(&self) -> Option<(u64, String)> {
        let mut written = self.written();
        match written.len() {
            0 => None,
            1 => written.pop().map(|f| (f.size, f.sha256)),
            _ => {
                written.sort_by(|a, b| a.rel.cmp(&b.rel));
                let size = written.iter().map(|f| f.size).sum();
                let manifest: String = written.iter().map(|f| format!("{}:{}\n", f.rel, f.sha256)).collect();
                Some((size, sha256_hex(manifest.as_bytes())))
            }
        }
    }

    pub fn exists(&self, rel: &str) -> Result<bool, StorageError> {
        self.store.exists(&self.resolve(rel)?)
    }

    /// Borra todo lo escrito bajo la base; usado al abortar un guardado.
    pub fn purge(&self) -> Result<(), StorageError> {
        for uri in self.store.list(&self.base)? {
            self.store.delete(&uri)?;
        }
        Ok(())
    }
}

/// Store en memoria (tests y stacks efímeros).
#[derive(Default)]
pub struct InMemoryArtifactStore {
    inner: DashMap<String, Vec<u8>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn root(&self) -> String {
        "memory://".to_string()
    }

    fn read(&self, uri: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.get(uri).map(|b| b.value().clone()).ok_or_else(|| StorageError::NotFound(uri.to_string()))
    }

    fn write(&self, uri: &str, bytes: &[u8]) -> Result<(), StorageError> {
        match self.inner.entry(uri.to_string()) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists(uri.to_string())),
            Entry::Vacant(v) => {
                v.insert(bytes.to_vec());
                Ok(())
            }
        }
    }

    fn exists(&self, uri: &str) -> Result<bool, StorageError> {
        Ok(self.inner.contains_key(uri))
    }

    fn delete(&self, uri: &str) -> Result<(), StorageError> {
        self.inner.remove(uri);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        let sorted: BTreeMap<String, ()> = self.inner
                                               .iter()
                                               .filter(|e| e.key() == prefix || e.key().starts_with(&dir))
                                               .map(|e| (e.key().clone(), ()))
                                               .collect();
        Ok(sorted.into_keys().collect())
    }
}
