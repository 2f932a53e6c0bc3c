use std::collections::BTreeSet;

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use super::{RunEvent, RunEventKind};
use crate::errors::StorageError;

/// Almacenamiento de eventos append-only, compartido entre las tareas de un
/// run (de ahí `&self`).
pub trait EventStore: Send + Sync {
    /// Agrega un evento y devuelve el evento completo (con seq y ts).
    fn append(&self, run_id: Uuid, kind: RunEventKind) -> Result<RunEvent, StorageError>;
    /// Eventos de un run en orden ascendente de seq.
    fn list(&self, run_id: Uuid) -> Result<Vec<RunEvent>, StorageError>;
    fn runs(&self) -> Result<Vec<Uuid>, StorageError>;
}

#[derive(Default)]
pub struct InMemoryEventStore {
    inner: DashMap<Uuid, Vec<RunEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for InMemoryEventStore {
    fn append(&self, run_id: Uuid, kind: RunEventKind) -> Result<RunEvent, StorageError> {
        let mut events = self.inner.entry(run_id).or_default();
        let ev = RunEvent { seq: events.len() as u64,
                            run_id,
                            kind,
                            ts: Utc::now() };
        events.push(ev.clone());
        Ok(ev)
    }

    fn list(&self, run_id: Uuid) -> Result<Vec<RunEvent>, StorageError> {
        Ok(self.inner.get(&run_id).map(|e| e.value().clone()).unwrap_or_default())
    }

    fn runs(&self) -> Result<Vec<Uuid>, StorageError> {
        Ok(self.inner.iter().map(|e| *e.key()).collect::<BTreeSet<_>>().into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_per_run_and_monotonic() {
        let store = InMemoryEventStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.append(a, RunEventKind::StepCancelled { step: "x".into() }).unwrap();
        store.append(b, RunEventKind::StepCancelled { step: "y".into() }).unwrap();
        let second = store.append(a, RunEventKind::StepCancelled { step: "z".into() }).unwrap();
        assert_eq!(second.seq, 1);
        let events = store.list(a).unwrap();
        assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(events[1].kind.step(), Some("z"));
        assert_eq!(store.runs().unwrap().len(), 2);
        assert!(store.list(Uuid::new_v4()).unwrap().is_empty());
    }
}
