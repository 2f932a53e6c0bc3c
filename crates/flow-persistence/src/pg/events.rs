use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::Text;
use flow_core::{EventStore, RunEvent, RunEventKind, StorageError};
use log::debug;
use serde_json::Value;
use uuid::Uuid;

use super::{decode, with_retry, with_retry_if, ConnectionProvider};
use crate::error::PersistenceError;
use crate::schema::run_events;

#[derive(Insertable, Debug)]
#[diesel(table_name = run_events)]
struct NewEventRow<'a> {
    run_id: Uuid,
    seq: i64,
    event_type: &'a str,
    payload: &'a Value,
}

#[derive(Queryable, Debug)]
struct EventRow {
    run_id: Uuid,
    seq: i64,
    payload: Value,
    ts: DateTime<Utc>,
}

/// Log de eventos append-only. `seq` es contiguo por run: se calcula dentro
/// de la transacción bajo un advisory lock del run, y la restricción
/// `UNIQUE (run_id, seq)` respalda el invariante.
pub struct PgEventStore<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgEventStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: ConnectionProvider> EventStore for PgEventStore<P> {
    fn append(&self, run_id: Uuid, kind: RunEventKind) -> Result<RunEvent, StorageError> {
        let payload = serde_json::to_value(&kind).map_err(PersistenceError::from)?;
        // La etiqueta serde (`type`) sirve como columna de consulta.
        let event_type = payload.get("type").and_then(Value::as_str).unwrap_or("unknown").to_string();
        let retryable = |e: &PersistenceError| e.is_transient() || matches!(e, PersistenceError::UniqueViolation(_));
        let (seq, ts) = with_retry_if("append_event", retryable, || {
            let mut conn = self.provider.connection()?;
            conn.build_transaction()
                .read_write()
                .run(|tx| {
                    diesel::sql_query("SELECT pg_advisory_xact_lock(hashtext($1))").bind::<Text, _>(run_id.to_string())
                                                                                     .execute(tx)?;
                    let last: Option<i64> = run_events::table.filter(run_events::run_id.eq(run_id))
                                                             .select(diesel::dsl::max(run_events::seq))
                                                             .first(tx)?;
                    let seq = last.map_or(0, |s| s + 1);
                    let ts: DateTime<Utc> = diesel::insert_into(run_events::table)
                        .values(NewEventRow { run_id,
                                              seq,
                                              event_type: &event_type,
                                              payload: &payload })
                        .returning(run_events::ts)
                        .get_result(tx)?;
                    Ok::<_, PersistenceError>((seq, ts))
                })
        })?;
        debug!("append_event run={run_id} seq={seq} type={event_type}");
        Ok(RunEvent { seq: seq as u64,
                      run_id,
                      kind,
                      ts })
    }

    fn list(&self, run_id: Uuid) -> Result<Vec<RunEvent>, StorageError> {
        let rows: Vec<EventRow> = with_retry("list_events", || {
            let mut conn = self.provider.connection()?;
            Ok(run_events::table.filter(run_events::run_id.eq(run_id))
                                .select((run_events::run_id, run_events::seq, run_events::payload, run_events::ts))
                                .order(run_events::seq.asc())
                                .load(&mut conn)?)
        })?;
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: RunEventKind = decode(row.payload)?;
            events.push(RunEvent { seq: row.seq as u64,
                                   run_id: row.run_id,
                                   kind,
                                   ts: row.ts });
        }
        Ok(events)
    }

    fn runs(&self) -> Result<Vec<Uuid>, StorageError> {
        Ok(with_retry("list_runs", || {
            let mut conn = self.provider.connection()?;
            Ok(run_events::table.select(run_events::run_id)
                                .distinct()
                                .order(run_events::run_id.asc())
                                .load(&mut conn)?)
        })?)
    }
}
