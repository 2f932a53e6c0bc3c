//! Artifact store sobre el sistema de archivos local.
//!
//! Cada escritura va a un fichero temporal en el mismo directorio y se
//! publica con `hard_link`, que falla si el destino ya existe: el fichero
//! final aparece completo o no aparece, y nunca se sobrescribe.
use std::fs;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use flow_core::errors::StorageError;
use flow_core::model::ArtifactStore;
use log::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    /// Crea el directorio raíz si no existe.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, uri: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(uri.trim_start_matches("./"));
        let escapes = rel.components().any(|c| !matches!(c, Component::Normal(_)));
        if uri.is_empty() || escapes {
            return Err(StorageError::OutOfScope(uri.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn collect(&self, dir: &Path, out: &mut Vec<String>) -> Result<(), StorageError> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.collect(&path, out)?;
            } else if let Ok(rel) = path.strip_prefix(&self.root) {
                let key = rel.components()
                             .filter_map(|c| c.as_os_str().to_str())
                             .collect::<Vec<_>>()
                             .join("/");
                // Temporales de escrituras en curso.
                if !key.rsplit('/').next().unwrap_or_default().starts_with(".tmp-") {
                    out.push(key);
                }
            }
        }
        Ok(())
    }
}

fn io_error(uri: &str, err: std::io::Error) -> StorageError {
    match err.kind() {
        ErrorKind::NotFound => StorageError::NotFound(uri.to_string()),
        _ => err.into(),
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn root(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn read(&self, uri: &str) -> Result<Vec<u8>, StorageError> {
        fs::read(self.path_of(uri)?).map_err(|e| io_error(uri, e))
    }

    fn read_range(&self, uri: &str, offset: u64, len: u64) -> Result<Vec<u8>, StorageError> {
        let mut file = fs::File::open(self.path_of(uri)?).map_err(|e| io_error(uri, e))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::new();
        file.take(len).read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn write(&self, uri: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let target = self.path_of(uri)?;
        let dir = target.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;
        let tmp = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()?;
        }
        let published = fs::hard_link(&tmp, &target);
        let _ = fs::remove_file(&tmp);
        match published {
            Ok(()) => {
                debug!("wrote {} bytes to {}", bytes.len(), target.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(StorageError::AlreadyExists(uri.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, uri: &str) -> Result<bool, StorageError> {
        Ok(self.path_of(uri)?.is_file())
    }

    fn delete(&self, uri: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_of(uri)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let base = self.path_of(prefix.trim_end_matches('/'))?;
        let mut out = Vec::new();
        if base.is_file() {
            out.push(prefix.trim_end_matches('/').to_string());
        } else if base.is_dir() {
            self.collect(&base, &mut out)?;
        }
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::model::ScopedStore;

    fn scratch() -> LocalArtifactStore {
        LocalArtifactStore::open(std::env::temp_dir().join(format!("stackflow-test-{}", Uuid::new_v4()))).unwrap()
    }

    #[test]
    fn write_is_atomic_and_write_once() {
        let store = scratch();
        store.write("run/a/out/1/data.json", b"[1]").unwrap();
        assert_eq!(store.read("run/a/out/1/data.json").unwrap(), b"[1]");
        assert!(matches!(store.write("run/a/out/1/data.json", b"[2]"), Err(StorageError::AlreadyExists(_))));
        assert_eq!(store.read("run/a/out/1/data.json").unwrap(), b"[1]");
        assert_eq!(store.list("run/a").unwrap(), vec!["run/a/out/1/data.json".to_string()]);
        assert_eq!(store.read_range("run/a/out/1/data.json", 1, 10).unwrap(), b"1]");
        let _ = fs::remove_dir_all(store.path());
    }

    #[test]
    fn rejects_paths_outside_the_root() {
        let store = scratch();
        assert!(matches!(store.write("../evil", b"x"), Err(StorageError::OutOfScope(_))));
        assert!(matches!(store.read("/etc/passwd"), Err(StorageError::OutOfScope(_))));
        let _ = fs::remove_dir_all(store.path());
    }

    #[test]
    fn scoped_purge_removes_only_its_prefix() {
        let store = scratch();
        store.write("r/s/o/1/a.txt", b"a").unwrap();
        store.write("r/s/o/10/b.txt", b"b").unwrap();
        ScopedStore::new(&store, "r/s/o/1").purge().unwrap();
        assert!(!store.exists("r/s/o/1/a.txt").unwrap());
        assert!(store.exists("r/s/o/10/b.txt").unwrap());
        let _ = fs::remove_dir_all(store.path());
    }
}
