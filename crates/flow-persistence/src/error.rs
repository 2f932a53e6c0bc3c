//! Errores de persistencia.
//! Mapea errores de Diesel / conexión a variantes semánticas y luego a
//! `StorageError` en la frontera de los traits del core.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use flow_core::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("check violation: {0}")]
    CheckViolation(String),
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("not found")]
    NotFound,
    #[error("serialization conflict (retryable)")]
    SerializationConflict,
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    #[error("row payload could not be decoded: {0}")]
    Payload(String),
    #[error("missing configuration: {0}")]
    Config(String),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

impl PersistenceError {
    /// Errores que conviene reintentar con backoff.
    ///
    /// Algunos mensajes (dependen del driver) llegan como `Unknown` con texto;
    /// se hace un match best-effort sin acoplar a SQLSTATE.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::SerializationConflict | Self::TransientIo(_) => true,
            Self::Unknown(msg) => {
                let m = msg.to_lowercase();
                m.contains("deadlock detected")
                || m.contains("could not serialize access")
                || m.contains("terminating connection")
                || m.contains("connection closed")
                || m.contains("connection refused")
                || m.contains("timeout")
            }
            _ => false,
        }
    }
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::CheckViolation => Self::CheckViolation(info.message().to_string()),
                DatabaseErrorKind::ForeignKeyViolation => Self::ForeignKeyViolation(info.message().to_string()),
                DatabaseErrorKind::SerializationFailure => Self::SerializationConflict,
                DatabaseErrorKind::ClosedConnection => Self::TransientIo(info.message().to_string()),
                other => Self::Unknown(format!("db error kind {other:?}: {}", info.message())),
            },
            DieselError::DeserializationError(e) => Self::Payload(format!("deser: {e}")),
            DieselError::SerializationError(e) => Self::Payload(format!("ser: {e}")),
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            DieselError::RollbackErrorOnCommit { rollback_error,
                                                 commit_error, } => {
                Self::Unknown(format!("rollback={rollback_error}; commit={commit_error}"))
            }
            other => Self::Unknown(format!("unhandled diesel error: {other:?}")),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(err.to_string())
    }
}

impl From<PersistenceError> for StorageError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::UniqueViolation(m) => StorageError::AlreadyExists(m),
            PersistenceError::NotFound => StorageError::NotFound("row".into()),
            PersistenceError::TransientIo(m) => StorageError::Io(m),
            other => StorageError::Backend(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(PersistenceError::SerializationConflict.is_transient());
        assert!(PersistenceError::TransientIo("pool".into()).is_transient());
        assert!(PersistenceError::Unknown("ERROR: deadlock detected".into()).is_transient());
        assert!(!PersistenceError::UniqueViolation("dup".into()).is_transient());
        assert!(!PersistenceError::Payload("bad".into()).is_transient());
    }

    #[test]
    fn maps_into_storage_errors() {
        assert!(matches!(StorageError::from(PersistenceError::UniqueViolation("x".into())),
                         StorageError::AlreadyExists(_)));
        assert!(matches!(StorageError::from(PersistenceError::NotFound), StorageError::NotFound(_)));
        assert!(matches!(StorageError::from(PersistenceError::CheckViolation("c".into())),
                         StorageError::Backend(_)));
    }

    #[test]
    fn diesel_not_found_maps() {
        assert!(matches!(PersistenceError::from(DieselError::NotFound), PersistenceError::NotFound));
    }
}
