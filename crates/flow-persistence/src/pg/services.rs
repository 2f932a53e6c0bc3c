use chrono::{DateTime, Utc};
use diesel::prelude::*;
use flow_core::deploy::ServiceStore;
use flow_core::{DeploymentService, ServiceIdentity, ServiceState, StorageError};
use log::debug;
use serde_json::Value;
use uuid::Uuid;

use super::{decode, with_retry, ConnectionProvider};
use crate::error::PersistenceError;
use crate::schema::deployment_services;

#[derive(Insertable, Debug)]
#[diesel(table_name = deployment_services)]
struct ServiceRow<'a> {
    id: Uuid,
    pipeline: &'a str,
    step: &'a str,
    model: &'a str,
    state: &'static str,
    body: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'a> ServiceRow<'a> {
    fn of(service: &'a DeploymentService) -> Result<Self, PersistenceError> {
        Ok(Self { id: service.id,
                  pipeline: &service.identity.pipeline,
                  step: &service.identity.step,
                  model: &service.identity.model,
                  state: service.state.as_str(),
                  body: serde_json::to_value(service)?,
                  created_at: service.created_at,
                  updated_at: service.updated_at })
    }
}

/// Registros durables de servicios de deployment. Un índice único parcial
/// garantiza a lo sumo un servicio no borrado por identidad.
pub struct PgServiceStore<P: ConnectionProvider> {
    pub provider: P,
}

impl<P: ConnectionProvider> PgServiceStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: ConnectionProvider> ServiceStore for PgServiceStore<P> {
    fn insert(&self, service: &DeploymentService) -> Result<(), StorageError> {
        let row = ServiceRow::of(service)?;
        with_retry("insert_service", || {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(deployment_services::table).values(&row).execute(&mut conn)?;
            Ok(())
        })?;
        debug!("service {} ({}) inserted", service.id, service.identity);
        Ok(())
    }

    fn update(&self, service: &DeploymentService) -> Result<(), StorageError> {
        let row = ServiceRow::of(service)?;
        let touched = with_retry("update_service", || {
            let mut conn = self.provider.connection()?;
            Ok(diesel::update(deployment_services::table.find(service.id))
                .set((deployment_services::state.eq(row.state),
                      deployment_services::body.eq(&row.body),
                      deployment_services::updated_at.eq(row.updated_at)))
                .execute(&mut conn)?)
        })?;
        if touched == 0 {
            return Err(StorageError::NotFound(service.id.to_string()));
        }
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<DeploymentService>, StorageError> {
        let body: Option<Value> = with_retry("get_service", || {
            let mut conn = self.provider.connection()?;
            Ok(deployment_services::table.find(id)
                                         .select(deployment_services::body)
                                         .first(&mut conn)
                                         .optional()?)
        })?;
        Ok(body.map(decode).transpose()?)
    }

    fn find_active(&self, identity: &ServiceIdentity) -> Result<Option<DeploymentService>, StorageError> {
        let body: Option<Value> = with_retry("find_active_service", || {
            let mut conn = self.provider.connection()?;
            Ok(deployment_services::table.filter(deployment_services::pipeline.eq(&identity.pipeline))
                                         .filter(deployment_services::step.eq(&identity.step))
                                         .filter(deployment_services::model.eq(&identity.model))
                                         .filter(deployment_services::state.ne(ServiceState::Deleted.as_str()))
                                         .order(deployment_services::created_at.desc())
                                         .select(deployment_services::body)
                                         .first(&mut conn)
                                         .optional()?)
        })?;
        Ok(body.map(decode).transpose()?)
    }

    fn list(&self) -> Result<Vec<DeploymentService>, StorageError> {
        let bodies: Vec<Value> = with_retry("list_services", || {
            let mut conn = self.provider.connection()?;
            Ok(deployment_services::table.select(deployment_services::body)
                                         .order((deployment_services::created_at.asc(), deployment_services::id.asc()))
                                         .load(&mut conn)?)
        })?;
        Ok(bodies.into_iter().map(decode).collect::<Result<_, _>>()?)
    }
}
