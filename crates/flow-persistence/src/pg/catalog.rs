use chrono::{DateTime, Utc};
use diesel::prelude::*;
use flow_core::model::latest_run_only;
use flow_core::{ArtifactCatalog, ArtifactVersion, StorageError};
use serde_json::Value;
use uuid::Uuid;

use super::{decode, with_retry, ConnectionProvider};
use crate::error::PersistenceError;
use crate::schema::artifact_versions;

#[derive(Insertable, Debug)]
#[diesel(table_name = artifact_versions)]
struct NewArtifactRow<'a> {
    id: Uuid,
    run_id: Uuid,
    step_name: &'a str,
    output_name: &'a str,
    cache_key: Option<&'a str>,
    body: Value,
    created_at: DateTime<Utc>,
}

/// Catálogo durable de `ArtifactVersion`. Las filas nunca se actualizan.
pub struct PgArtifactCatalog<P: ConnectionProvider> {
    pub provider: P,
}

impl<'a> NewArtifactRow<'a> {
    fn from_version(version: &'a ArtifactVersion) -> Result<Self, PersistenceError> {
        Ok(Self { id: version.id,
                  run_id: version.run_id,
                  step_name: &version.step_name,
                  output_name: &version.output_name,
                  cache_key: version.cache_key.as_deref(),
                  body: serde_json::to_value(version)?,
                  created_at: version.created_at })
    }
}

impl<P: ConnectionProvider> PgArtifactCatalog<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    fn load_bodies<F>(&self, op: &str, query: F) -> Result<Vec<ArtifactVersion>, StorageError>
        where F: Fn(&mut PgConnection) -> QueryResult<Vec<Value>>
    {
        let bodies = with_retry(op, || {
            let mut conn = self.provider.connection()?;
            Ok(query(&mut conn)?)
        })?;
        Ok(bodies.into_iter().map(decode).collect::<Result<_, _>>()?)
    }
}

impl<P: ConnectionProvider> ArtifactCatalog for PgArtifactCatalog<P> {
    fn record(&self, version: &ArtifactVersion) -> Result<(), StorageError> {
        let row = NewArtifactRow::from_version(version)?;
        with_retry("record_artifact", || {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(artifact_versions::table).values(&row).execute(&mut conn)?;
            Ok(())
        }).map_err(|e| match e {
              PersistenceError::UniqueViolation(_) => StorageError::AlreadyExists(version.id.to_string()),
              other => other.into(),
          })
    }

    /// Inserta las filas en una sola transacción.
    fn record_all(&self, versions: &[ArtifactVersion]) -> Result<(), StorageError> {
        let rows = versions.iter().map(NewArtifactRow::from_version).collect::<Result<Vec<_>, _>>()?;
        with_retry("record_artifacts", || {
            let mut conn = self.provider.connection()?;
            conn.build_transaction()
                .read_write()
                .run(|tx| {
                    diesel::insert_into(artifact_versions::table).values(&rows).execute(tx)?;
                    Ok::<_, PersistenceError>(())
                })
        }).map_err(|e| match e {
              PersistenceError::UniqueViolation(m) => StorageError::AlreadyExists(m),
              other => other.into(),
          })
    }

    fn forget(&self, id: Uuid) -> Result<(), StorageError> {
        with_retry("forget_artifact", || {
            let mut conn = self.provider.connection()?;
            diesel::delete(artifact_versions::table.find(id)).execute(&mut conn)?;
            Ok(())
        })?;
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<ArtifactVersion>, StorageError> {
        let body: Option<Value> = with_retry("get_artifact", || {
            let mut conn = self.provider.connection()?;
            Ok(artifact_versions::table.find(id)
                                       .select(artifact_versions::body)
                                       .first(&mut conn)
                                       .optional()?)
        })?;
        Ok(body.map(decode).transpose()?)
    }

    fn list_for_run(&self, run_id: Uuid) -> Result<Vec<ArtifactVersion>, StorageError> {
        self.load_bodies("list_for_run", |conn| {
                artifact_versions::table.filter(artifact_versions::run_id.eq(run_id))
                                        .select(artifact_versions::body)
                                        .order((artifact_versions::created_at.asc(),
                                                artifact_versions::output_name.asc()))
                                        .load(conn)
            })
    }

    fn find_by_cache_key(&self, cache_key: &str) -> Result<Vec<ArtifactVersion>, StorageError> {
        let hits = self.load_bodies("find_by_cache_key", |conn| {
                           artifact_versions::table.filter(artifact_versions::cache_key.eq(cache_key))
                                                   .select(artifact_versions::body)
                                                   .load(conn)
                       })?;
        Ok(latest_run_only(hits))
    }
}
