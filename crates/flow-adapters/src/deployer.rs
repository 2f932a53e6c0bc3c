//! Model deployer simulado: servidor de inferencia local en memoria.
//!
//! Los endpoints tardan `startup_delay` en pasar a `RUNNING` tras un create
//! o un update. Expone ganchos para tests: caída de un servicio, fallo de
//! teardown y detección de operaciones solapadas sobre una misma identidad.
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use flow_core::deploy::{BackendServiceStatus, EndpointDescriptor, ModelDeployerBackend, ServiceIdentity,
                        ServiceState};
use flow_core::errors::BackendError;
use flow_core::model::ArtifactVersion;
use log::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Served {
    endpoint: EndpointDescriptor,
    artifact: Uuid,
    state: ServiceState,
    message: Option<String>,
    ready_at: Instant,
}

pub struct SimulatedModelDeployer {
    name: String,
    base_url: String,
    startup_delay: Duration,
    services: DashMap<ServiceIdentity, Served>,
    creates: AtomicU32,
    updates: AtomicU32,
    in_flight: DashMap<ServiceIdentity, u32>,
    overlapped: AtomicBool,
    fail_delete: AtomicBool,
}

impl SimulatedModelDeployer {
    pub fn new(name: impl Into<String>, port: u16, startup_delay: Duration) -> Self {
        Self { name: name.into(),
               base_url: format!("http://127.0.0.1:{port}"),
               startup_delay,
               services: DashMap::new(),
               creates: AtomicU32::new(0),
               updates: AtomicU32::new(0),
               in_flight: DashMap::new(),
               overlapped: AtomicBool::new(false),
               fail_delete: AtomicBool::new(false) }
    }

    pub fn creates(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> u32 {
        self.updates.load(Ordering::SeqCst)
    }

    /// Hubo dos operaciones simultáneas sobre la misma identidad.
    pub fn saw_overlap(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn serving_artifact(&self, identity: &ServiceIdentity) -> Option<Uuid> {
        self.services.get(identity).map(|s| s.artifact)
    }

    pub fn endpoint_count(&self) -> usize {
        self.services.len()
    }

    /// Simula una caída silenciosa del servidor.
    pub fn crash(&self, identity: &ServiceIdentity, message: &str) {
        if let Some(mut s) = self.services.get_mut(identity) {
            s.state = ServiceState::Error;
            s.message = Some(message.to_string());
        }
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    fn enter(&self, identity: &ServiceIdentity) {
        let mut n = self.in_flight.entry(identity.clone()).or_insert(0);
        *n += 1;
        if *n > 1 {
            warn!("{}: overlapping operations on `{identity}`", self.name);
            self.overlapped.store(true, Ordering::SeqCst);
        }
    }

    fn leave(&self, identity: &ServiceIdentity) {
        if let Some(mut n) = self.in_flight.get_mut(identity) {
            *n = n.saturating_sub(1);
        }
    }

    fn identity_of(&self, endpoint: &EndpointDescriptor) -> Option<ServiceIdentity> {
        self.services
            .iter()
            .find(|s| s.endpoint.backend_ref == endpoint.backend_ref)
            .map(|s| s.key().clone())
    }
}

#[async_trait]
impl ModelDeployerBackend for SimulatedModelDeployer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create(&self,
                    model: &ArtifactVersion,
                    identity: &ServiceIdentity)
                    -> Result<EndpointDescriptor, BackendError> {
        self.enter(identity);
        // Latencia de aprovisionamiento.
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.creates.fetch_add(1, Ordering::SeqCst);
        let endpoint = EndpointDescriptor { backend_ref: format!("srv-{}", Uuid::new_v4()),
                                            url: format!("{}/{}/{}/{}/predict",
                                                         self.base_url,
                                                         identity.pipeline,
                                                         identity.step,
                                                         identity.model) };
        self.services.insert(identity.clone(),
                             Served { endpoint: endpoint.clone(),
                                      artifact: model.id,
                                      state: ServiceState::Pending,
                                      message: None,
                                      ready_at: Instant::now() + self.startup_delay });
        info!("{}: created endpoint {} for `{identity}`", self.name, endpoint.url);
        self.leave(identity);
        Ok(endpoint)
    }

    async fn update(&self,
                    existing: &EndpointDescriptor,
                    model: &ArtifactVersion)
                    -> Result<EndpointDescriptor, BackendError> {
        let identity = self.identity_of(existing)
                           .ok_or_else(|| BackendError::NotFound(existing.backend_ref.clone()))?;
        self.enter(&identity);
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.updates.fetch_add(1, Ordering::SeqCst);
        let result = match self.services.get_mut(&identity) {
            Some(mut s) => {
                s.artifact = model.id;
                s.state = ServiceState::Pending;
                s.message = None;
                s.ready_at = Instant::now() + self.startup_delay;
                Ok(s.endpoint.clone())
            }
            None => Err(BackendError::NotFound(existing.backend_ref.clone())),
        };
        self.leave(&identity);
        result
    }

    async fn status(&self, identity: &ServiceIdentity) -> Result<BackendServiceStatus, BackendError> {
        let mut s = self.services
                        .get_mut(identity)
                        .ok_or_else(|| BackendError::NotFound(identity.to_string()))?;
        if s.state == ServiceState::Pending && Instant::now() >= s.ready_at {
            s.state = ServiceState::Running;
        }
        Ok(BackendServiceStatus { state: s.state,
                                  message: s.message.clone() })
    }

    async fn delete(&self, identity: &ServiceIdentity) -> Result<(), BackendError> {
        self.enter(identity);
        let result = if self.fail_delete.load(Ordering::SeqCst) {
            Err(BackendError::Permanent(format!("teardown of `{identity}` left orphaned resources")))
        } else {
            self.services.remove(identity);
            Ok(())
        };
        self.leave(identity);
        result
    }
}
