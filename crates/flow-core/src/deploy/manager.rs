//! Deployment service manager.
//!
//! Cada identidad de servicio es un dominio de exclusión mutua: las llamadas
//! `deploy`/`delete` concurrentes sobre la misma identidad se encolan en orden
//! de llegada (`tokio::sync::Mutex` es FIFO) y las de identidades distintas
//! avanzan en paralelo. El estado no es sólo push: las lecturas refrescan
//! contra el backend (best effort) para que un servicio `RUNNING` caído
//! aparezca como `ERROR` en la siguiente inspección.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use super::{DeploymentService, EndpointDescriptor, ModelDeployerBackend, ServiceFilter, ServiceIdentity, ServiceState, ServiceStore};
use crate::config::FlowConfig;
use crate::constants::MODEL_DATA_TYPE;
use crate::dispatch::Backoff;
use crate::errors::{ConfigurationError, DeploymentError};
use crate::model::{ArtifactVersion, DataType};
use crate::stack::FlowContext;

#[derive(Debug, Clone, PartialEq)]
pub struct DeployConfig {
    pub poll_initial: Duration,
    pub poll_max: Duration,
    pub poll_factor: f64,
    /// Tiempo máximo de `PENDING` a `RUNNING`.
    pub startup_timeout: Duration,
    pub max_poll_failures: u32,
}

impl DeployConfig {
    pub fn from_config(cfg: &FlowConfig) -> Self {
        Self { poll_initial: cfg.poll_initial,
               poll_max: cfg.poll_max,
               poll_factor: cfg.poll_factor,
               startup_timeout: cfg.deploy_timeout,
               max_poll_failures: cfg.max_poll_failures }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self::from_config(&FlowConfig::default())
    }
}

pub struct DeploymentServiceManager {
    backend: Arc<dyn ModelDeployerBackend>,
    store: Arc<dyn ServiceStore>,
    locks: DashMap<ServiceIdentity, Arc<Mutex<()>>>,
    config: DeployConfig,
}

impl DeploymentServiceManager {
    pub fn new(backend: Arc<dyn ModelDeployerBackend>, store: Arc<dyn ServiceStore>, config: DeployConfig) -> Self {
        Self { backend,
               store,
               locks: DashMap::new(),
               config }
    }

    /// Manager sobre el componente model-deployer del stack activo.
    pub fn from_context(ctx: &FlowContext,
                        store: Arc<dyn ServiceStore>,
                        config: DeployConfig)
                        -> Result<Self, ConfigurationError> {
        let backend = ctx.active_stack().model_deployer()?;
        Ok(Self::new(backend, store, config))
    }

    fn identity_lock(&self, identity: &ServiceIdentity) -> Arc<Mutex<()>> {
        self.locks.entry(identity.clone()).or_default().clone()
    }

    fn backend_error(identity: &ServiceIdentity, cause: impl ToString) -> DeploymentError {
        DeploymentError::Backend { identity: identity.to_string(),
                                   cause: cause.to_string() }
    }

    /// Crea el servicio o, si ya existe uno no borrado con esta identidad,
    /// sustituye su modelo sobre el mismo endpoint. Espera a `RUNNING`.
    pub async fn deploy(&self,
                        model: &ArtifactVersion,
                        identity: ServiceIdentity)
                        -> Result<DeploymentService, DeploymentError> {
        if !model.data_type.is_subtype_of(&DataType::new(MODEL_DATA_TYPE)) {
            return Err(DeploymentError::NotAModel { artifact: model.id,
                                                    data_type: model.data_type.to_string() });
        }
        let lock = self.identity_lock(&identity);
        let _guard = lock.lock().await;

        let service = match self.store.find_active(&identity)? {
            Some(existing) if existing.endpoint.is_some() => self.update_existing(existing, model).await?,
            Some(mut stale) => {
                // Creación previa fallida sin endpoint: se retira y se crea de nuevo.
                stale.transition(ServiceState::Deleted, Some("superseded by a new deployment".to_string()))?;
                self.store.update(&stale)?;
                self.create_new(model, &identity).await?
            }
            None => self.create_new(model, &identity).await?,
        };
        self.await_running(service).await
    }

    async fn create_new(&self,
                        model: &ArtifactVersion,
                        identity: &ServiceIdentity)
                        -> Result<DeploymentService, DeploymentError> {
        let now = Utc::now();
        let mut service = DeploymentService { id: Uuid::new_v4(),
                                              identity: identity.clone(),
                                              run_id: model.run_id,
                                              model_artifact: model.id,
                                              state: ServiceState::Pending,
                                              endpoint: None,
                                              status_message: None,
                                              revision: 1,
                                              created_at: now,
                                              updated_at: now };
        self.store.insert(&service)?;
        info!("deployment `{identity}`: creating service {} on `{}`", service.id, self.backend.name());
        match self.backend.create(model, identity).await {
            Ok(endpoint) => {
                service.endpoint = Some(endpoint);
                service.updated_at = Utc::now();
                self.store.update(&service)?;
                Ok(service)
            }
            Err(e) => {
                service.transition(ServiceState::Error, Some(e.to_string()))?;
                self.store.update(&service)?;
                Err(Self::backend_error(identity, e))
            }
        }
    }

    async fn update_existing(&self,
                             mut service: DeploymentService,
                             model: &ArtifactVersion)
                             -> Result<DeploymentService, DeploymentError> {
        let identity = service.identity.clone();
        let Some(current) = service.endpoint.clone() else {
            return Err(DeploymentError::NoEndpoint(service.id));
        };
        info!("deployment `{identity}`: updating service {} to artifact {}", service.id, model.id);
        service.transition(ServiceState::Pending, Some(format!("updating to artifact {}", model.id)))?;
        self.store.update(&service)?;
        match self.backend.update(&current, model).await {
            Ok(endpoint) => {
                if endpoint.url != current.url {
                    warn!("deployment `{identity}`: backend moved the endpoint to {}; keeping {}",
                          endpoint.url, current.url);
                }
                service.endpoint = Some(EndpointDescriptor { url: current.url.clone(),
                                                             ..endpoint });
                service.model_artifact = model.id;
                service.run_id = model.run_id;
                service.revision += 1;
                service.updated_at = Utc::now();
                self.store.update(&service)?;
                Ok(service)
            }
            Err(e) => {
                service.transition(ServiceState::Error, Some(e.to_string()))?;
                self.store.update(&service)?;
                Err(Self::backend_error(&identity, e))
            }
        }
    }

    /// Poll con backoff hasta `RUNNING`, un fallo reportado o timeout.
    async fn await_running(&self, mut service: DeploymentService) -> Result<DeploymentService, DeploymentError> {
        let identity = service.identity.clone();
        let deadline = Instant::now() + self.config.startup_timeout;
        let mut backoff = Backoff::new(self.config.poll_initial, self.config.poll_max, self.config.poll_factor);
        let mut failures = 0u32;
        loop {
            match self.backend.status(&identity).await {
                Ok(status) => {
                    failures = 0;
                    match status.state {
                        ServiceState::Running => {
                            service.transition(ServiceState::Running, status.message)?;
                            self.store.update(&service)?;
                            info!("deployment `{identity}`: RUNNING at {}", service.prediction_url().unwrap_or("-"));
                            return Ok(service);
                        }
                        ServiceState::Error | ServiceState::Stopped | ServiceState::Deleted => {
                            let cause = status.message
                                              .unwrap_or_else(|| format!("backend reported {}", status.state));
                            service.transition(ServiceState::Error, Some(cause.clone()))?;
                            self.store.update(&service)?;
                            return Err(Self::backend_error(&identity, cause));
                        }
                        ServiceState::Pending => {}
                    }
                }
                Err(e) if e.is_transient() && failures < self.config.max_poll_failures => {
                    failures += 1;
                    warn!("deployment `{identity}`: transient status failure {failures}: {e}");
                }
                Err(e) => {
                    service.transition(ServiceState::Error, Some(e.to_string()))?;
                    self.store.update(&service)?;
                    return Err(Self::backend_error(&identity, e));
                }
            }
            let now = Instant::now();
            if now >= deadline {
                let timeout_ms = self.config.startup_timeout.as_millis() as u64;
                service.transition(ServiceState::Error, Some(format!("not running after {timeout_ms} ms")))?;
                self.store.update(&service)?;
                return Err(DeploymentError::StartupTimeout { identity: identity.to_string(),
                                                             timeout_ms });
            }
            sleep(backoff.next_delay().min(deadline - now)).await;
        }
    }

    /// Servicios que cumplen `filter`, por orden de creación, tras un
    /// refresh best effort.
    pub async fn list(&self, filter: &ServiceFilter) -> Result<Vec<DeploymentService>, DeploymentError> {
        let mut out = Vec::new();
        for service in self.store.list()? {
            let visible = ServiceFilter { state: None,
                                          include_deleted: filter.include_deleted
                                                           || filter.state == Some(ServiceState::Deleted),
                                          ..filter.clone() };
            if !visible.matches(&service) {
                continue;
            }
            let refreshed = self.refresh(service).await;
            if filter.matches(&refreshed) {
                out.push(refreshed);
            }
        }
        Ok(out)
    }

    pub async fn describe(&self, id: Uuid, include_deleted: bool) -> Result<DeploymentService, DeploymentError> {
        let service = self.store.get(id)?.ok_or(DeploymentError::ServiceNotFound(id))?;
        if service.is_deleted() {
            return if include_deleted { Ok(service) } else { Err(DeploymentError::ServiceNotFound(id)) };
        }
        Ok(self.refresh(service).await)
    }

    pub async fn get_prediction_url(&self, id: Uuid) -> Result<String, DeploymentError> {
        let service = self.describe(id, false).await?;
        service.prediction_url()
               .map(str::to_string)
               .ok_or(DeploymentError::NoEndpoint(id))
    }

    /// Teardown best effort: un error del backend se registra y el servicio
    /// pasa igualmente a `DELETED`.
    pub async fn delete(&self, id: Uuid) -> Result<DeploymentService, DeploymentError> {
        let identity = match self.store.get(id)? {
            Some(s) if !s.is_deleted() => s.identity,
            _ => return Err(DeploymentError::ServiceNotFound(id)),
        };
        let lock = self.identity_lock(&identity);
        let result = {
            let _guard = lock.lock().await;
            self.teardown(id, &identity).await
        };
        drop(lock);
        // Una identidad borrada no debe retener su lock; si otra operación
        // ya lo tiene clonado, se queda.
        self.locks.remove_if(&identity, |_, l| Arc::strong_count(l) == 1);
        result
    }

    async fn teardown(&self, id: Uuid, identity: &ServiceIdentity) -> Result<DeploymentService, DeploymentError> {
        // Releer bajo el lock: otra operación encolada pudo borrarlo.
        let mut service = match self.store.get(id)? {
            Some(s) if !s.is_deleted() => s,
            _ => return Err(DeploymentError::ServiceNotFound(id)),
        };
        let message = match self.backend.delete(identity).await {
            Ok(()) => None,
            Err(e) => {
                warn!("deployment `{identity}`: backend teardown failed, marking DELETED anyway: {e}");
                Some(format!("teardown error: {e}"))
            }
        };
        service.transition(ServiceState::Deleted, message)?;
        self.store.update(&service)?;
        info!("deployment `{identity}`: service {id} DELETED");
        Ok(service)
    }

    /// Refresca el estado observado si no hay una operación en curso sobre la
    /// identidad. Nunca falla: ante cualquier error devuelve el registro tal
    /// cual.
    async fn refresh(&self, mut service: DeploymentService) -> DeploymentService {
        if service.is_deleted() {
            return service;
        }
        let lock = self.identity_lock(&service.identity);
        let Ok(_guard) = lock.try_lock() else {
            debug!("deployment `{}`: operation in flight, skipping refresh", service.identity);
            return service;
        };
        let observed = match self.backend.status(&service.identity).await {
            Ok(status) => status,
            Err(e) => {
                debug!("deployment `{}`: status refresh failed: {e}", service.identity);
                return service;
            }
        };
        if observed.state == service.state || !service.state.can_refresh_to(observed.state) {
            return service;
        }
        let before = service.clone();
        let message = observed.message.or_else(|| Some(format!("backend reported {}", observed.state)));
        if service.transition(observed.state, message).is_err() {
            return before;
        }
        if let Err(e) = self.store.update(&service) {
            warn!("deployment `{}`: could not persist refreshed state: {e}", service.identity);
            return before;
        }
        info!("deployment `{}`: {} -> {} (refresh)", service.identity, before.state, service.state);
        service
    }
}
