//! Registro de un servicio de inferencia.
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ServiceState;
use crate::errors::DeploymentError;

/// Identidad lógica de un servicio: (pipeline, step, modelo). Como mucho un
/// servicio no borrado por identidad.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub pipeline: String,
    pub step: String,
    pub model: String,
}

impl ServiceIdentity {
    pub fn new(pipeline: impl Into<String>, step: impl Into<String>, model: impl Into<String>) -> Self {
        Self { pipeline: pipeline.into(),
               step: step.into(),
               model: model.into() }
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.pipeline, self.step, self.model)
    }
}

/// Lo que devuelve el backend al crear/actualizar un endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// Referencia interna del backend (contenedor, deployment, ...).
    pub backend_ref: String,
    pub url: String,
}

/// Estado observado en el backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendServiceStatus {
    pub state: ServiceState,
    pub message: Option<String>,
}

impl BackendServiceStatus {
    pub fn new(state: ServiceState) -> Self {
        Self { state,
               message: None }
    }

    pub fn with_message(state: ServiceState, message: impl Into<String>) -> Self {
        Self { state,
               message: Some(message.into()) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentService {
    pub id: Uuid,
    pub identity: ServiceIdentity,
    pub run_id: Uuid,
    pub model_artifact: Uuid,
    pub state: ServiceState,
    pub endpoint: Option<EndpointDescriptor>,
    pub status_message: Option<String>,
    /// Número de despliegues aplicados (1 al crear, +1 por update).
    pub revision: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentService {
    pub fn prediction_url(&self) -> Option<&str> {
        self.endpoint.as_ref().map(|e| e.url.as_str())
    }

    pub fn is_deleted(&self) -> bool {
        self.state == ServiceState::Deleted
    }

    /// Aplica una transición válida del ciclo de vida.
    pub fn transition(&mut self, to: ServiceState, message: Option<String>) -> Result<(), DeploymentError> {
        if !self.state.can_transition_to(to) {
            return Err(DeploymentError::InvalidTransition { identity: self.identity.to_string(),
                                                            from: self.state,
                                                            to });
        }
        self.state = to;
        self.status_message = message;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Predicado para `list`. Los campos `None` no filtran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceFilter {
    pub pipeline: Option<String>,
    pub step: Option<String>,
    pub model: Option<String>,
    pub state: Option<ServiceState>,
    pub include_deleted: bool,
}

impl ServiceFilter {
    pub fn pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }

    pub fn step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn state(mut self, state: ServiceState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn matches(&self, svc: &DeploymentService) -> bool {
        if svc.is_deleted() && !self.include_deleted && self.state != Some(ServiceState::Deleted) {
            return false;
        }
        self.pipeline.as_ref().map_or(true, |p| p == &svc.identity.pipeline)
        && self.step.as_ref().map_or(true, |s| s == &svc.identity.step)
        && self.model.as_ref().map_or(true, |m| m == &svc.identity.model)
        && self.state.map_or(true, |st| st == svc.state)
    }
}
