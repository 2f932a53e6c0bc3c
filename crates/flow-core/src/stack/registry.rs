//! Registro de flavors, componentes y stacks.
//!
//! Los flavors se registran al arrancar desde un manifiesto fijo (tabla
//! `FlavorKey -> factory`). Componentes y stacks se persisten a través de un
//! `RegistryStore`; ninguna operación de registro hace llamadas de red.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde_json::Value;
use uuid::Uuid;

use super::{ActiveStack, BackendHandle, ComponentCategory, ComponentFlavor, FlavorFactory, FlavorKey, Locality,
            RegistryStore, Requirement, Stack, StackComponent};
use crate::errors::ConfigurationError;

struct RegisteredFlavor {
    flavor: ComponentFlavor,
    factory: Option<FlavorFactory>,
}

pub struct ComponentRegistry {
    flavors: IndexMap<FlavorKey, RegisteredFlavor>,
    components: IndexMap<Uuid, StackComponent>,
    component_names: HashMap<String, Uuid>,
    stacks: IndexMap<Uuid, Stack>,
    /// Nombre -> id de la composición más reciente con ese nombre.
    stack_names: HashMap<String, Uuid>,
    store: Arc<dyn RegistryStore>,
}

impl ComponentRegistry {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self { flavors: IndexMap::new(),
               components: IndexMap::new(),
               component_names: HashMap::new(),
               stacks: IndexMap::new(),
               stack_names: HashMap::new(),
               store }
    }

    pub fn store(&self) -> Arc<dyn RegistryStore> {
        self.store.clone()
    }

    /// Registra un flavor sin factory (sólo validable, no instanciable).
    pub fn register_flavor(&mut self, flavor: ComponentFlavor) -> Result<(), ConfigurationError> {
        self.insert_flavor(flavor, None)
    }

    pub fn register_flavor_with_factory(&mut self,
                                        flavor: ComponentFlavor,
                                        factory: FlavorFactory)
                                        -> Result<(), ConfigurationError> {
        self.insert_flavor(flavor, Some(factory))
    }

    fn insert_flavor(&mut self, flavor: ComponentFlavor, factory: Option<FlavorFactory>) -> Result<(), ConfigurationError> {
        if self.flavors.contains_key(&flavor.key) {
            return Err(ConfigurationError::DuplicateFlavor { category: flavor.key.category,
                                                             name: flavor.key.name.clone() });
        }
        debug!("registered flavor {}", flavor.key);
        self.flavors.insert(flavor.key.clone(), RegisteredFlavor { flavor, factory });
        Ok(())
    }

    pub fn flavor(&self, key: &FlavorKey) -> Option<&ComponentFlavor> {
        self.flavors.get(key).map(|r| &r.flavor)
    }

    /// Flavors en orden de registro.
    pub fn flavors(&self) -> Vec<&ComponentFlavor> {
        self.flavors.values().map(|r| &r.flavor).collect()
    }

    /// Valida `config` contra el esquema del flavor y persiste el componente.
    pub fn register_component(&mut self,
                              name: &str,
                              flavor: &FlavorKey,
                              config: Value)
                              -> Result<StackComponent, ConfigurationError> {
        if self.component_names.contains_key(name) {
            return Err(ConfigurationError::DuplicateComponent(name.to_string()));
        }
        let registered = self.flavors
                             .get(flavor)
                             .ok_or_else(|| ConfigurationError::UnknownFlavor(flavor.to_string()))?;
        let raw = match config {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            _ => {
                return Err(ConfigurationError::InvalidConfiguration { flavor: flavor.to_string(),
                                                                      fields: vec!["<root>".to_string()] })
            }
        };
        let validated = registered.flavor.validate_config(&raw)?;
        let locality = registered.flavor.locality_for(&validated);
        let component = StackComponent { id: Uuid::new_v4(),
                                         name: name.to_string(),
                                         flavor: flavor.clone(),
                                         config: validated,
                                         locality,
                                         created_at: Utc::now() };
        self.store.save_component(&component)?;
        info!("registered component `{}` ({})", component.name, component.flavor);
        self.component_names.insert(component.name.clone(), component.id);
        self.components.insert(component.id, component.clone());
        Ok(component)
    }

    pub fn component(&self, id: Uuid) -> Option<&StackComponent> {
        self.components.get(&id)
    }

    pub fn component_by_name(&self, name: &str) -> Option<&StackComponent> {
        self.component_names.get(name).and_then(|id| self.components.get(id))
    }

    pub fn components(&self) -> Vec<&StackComponent> {
        self.components.values().collect()
    }

    /// Compone un stack inmutable. Falla si falta una categoría obligatoria o
    /// si algún requisito de compatibilidad entre componentes no se cumple.
    pub fn compose_stack(&mut self, name: &str, component_ids: &[Uuid]) -> Result<Stack, ConfigurationError> {
        let mut members: BTreeMap<ComponentCategory, &StackComponent> = BTreeMap::new();
        for id in component_ids {
            let c = self.components
                        .get(id)
                        .ok_or_else(|| ConfigurationError::UnknownComponent(id.to_string()))?;
            if members.insert(c.category(), c).is_some() {
                return Err(ConfigurationError::DuplicateCategory { stack: name.to_string(),
                                                                   category: c.category() });
            }
        }
        let missing: Vec<ComponentCategory> = ComponentCategory::REQUIRED.iter()
                                                                        .copied()
                                                                        .filter(|c| !members.contains_key(c))
                                                                        .collect();
        if !missing.is_empty() {
            return Err(ConfigurationError::IncompleteStack { stack: name.to_string(),
                                                             missing });
        }
        self.check_compatibility(name, &members)?;

        let stack = Stack { id: Uuid::new_v4(),
                            name: name.to_string(),
                            components: members.iter().map(|(cat, c)| (*cat, c.id)).collect(),
                            created_at: Utc::now() };
        self.store.save_stack(&stack)?;
        if let Some(previous) = self.stack_names.insert(stack.name.clone(), stack.id) {
            debug!("stack `{}` recomposed: {} -> {}", stack.name, previous, stack.id);
        }
        info!("composed stack `{}` ({})", stack.name, stack.id);
        self.stacks.insert(stack.id, stack.clone());
        Ok(stack)
    }

    fn check_compatibility(&self,
                           stack: &str,
                           members: &BTreeMap<ComponentCategory, &StackComponent>)
                           -> Result<(), ConfigurationError> {
        let incompatible = |reason: String| ConfigurationError::IncompatibleComponents { stack: stack.to_string(),
                                                                                         reason };
        for component in members.values() {
            let flavor = self.flavor(&component.flavor)
                             .ok_or_else(|| ConfigurationError::UnknownFlavor(component.flavor.to_string()))?;
            let mut requirements = flavor.requirements.clone();
            // Un orquestador o step operator remoto no puede leer un store local.
            if component.is_remote()
               && matches!(component.category(), ComponentCategory::Orchestrator | ComponentCategory::ExecutionBackend)
               && !requirements.contains(&Requirement::RemoteArtifactStore)
            {
                requirements.push(Requirement::RemoteArtifactStore);
            }
            for requirement in &requirements {
                match requirement {
                    Requirement::RemoteArtifactStore => {
                        if let Some(store) = members.get(&ComponentCategory::ArtifactStore) {
                            if store.locality == Locality::Local {
                                return Err(incompatible(format!("`{}` ({}) requires a remote artifact store but `{}` \
                                                                 is local",
                                                                component.name, component.flavor, store.name)));
                            }
                        }
                    }
                    Requirement::Category(cat) => {
                        if !members.contains_key(cat) {
                            return Err(incompatible(format!("`{}` ({}) requires a {} component",
                                                            component.name, component.flavor, cat)));
                        }
                    }
                    Requirement::LocalPeersOnly => {
                        if let Some(peer) = members.values().find(|p| p.id != component.id && p.is_remote()) {
                            return Err(incompatible(format!("`{}` ({}) only runs with local peers but `{}` is \
                                                             remote",
                                                            component.name, component.flavor, peer.name)));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn stack(&self, id: Uuid) -> Option<&Stack> {
        self.stacks.get(&id)
    }

    pub fn stack_by_name(&self, name: &str) -> Option<&Stack> {
        self.stack_names.get(name).and_then(|id| self.stacks.get(id))
    }

    pub fn stacks(&self) -> Vec<&Stack> {
        self.stacks.values().collect()
    }

    /// Recarga componentes y stacks persistidos. Los que dependen de flavors
    /// no registrados se omiten con un warning.
    pub fn restore(&mut self) -> Result<usize, ConfigurationError> {
        let mut restored = 0;
        for component in self.store.load_components()? {
            if !self.flavors.contains_key(&component.flavor) {
                warn!("skipping component `{}`: flavor {} is not registered", component.name, component.flavor);
                continue;
            }
            self.component_names.insert(component.name.clone(), component.id);
            self.components.insert(component.id, component);
            restored += 1;
        }
        for stack in self.store.load_stacks()? {
            if let Some(missing) = stack.components.values().find(|id| !self.components.contains_key(*id)) {
                warn!("skipping stack `{}`: component {} is unavailable", stack.name, missing);
                continue;
            }
            // load_stacks viene ordenado por creación: gana la composición más reciente.
            self.stack_names.insert(stack.name.clone(), stack.id);
            self.stacks.insert(stack.id, stack);
            restored += 1;
        }
        debug!("restored {restored} registry entries");
        Ok(restored)
    }

    fn build_backend(&self, component: &StackComponent) -> Result<BackendHandle, ConfigurationError> {
        let registered = self.flavors
                             .get(&component.flavor)
                             .ok_or_else(|| ConfigurationError::UnknownFlavor(component.flavor.to_string()))?;
        match &registered.factory {
            Some(factory) => factory(component),
            None => Ok(BackendHandle::Passive),
        }
    }

    /// Construye los backends de un stack.
    pub fn instantiate(&self, stack: &Stack) -> Result<ActiveStack, ConfigurationError> {
        let mut components = BTreeMap::new();
        let mut artifact_store = None;
        let mut orchestrator = None;
        let mut step_operator = None;
        let mut model_deployer = None;
        for (category, id) in &stack.components {
            let component = self.components
                                .get(id)
                                .ok_or_else(|| ConfigurationError::UnknownComponent(id.to_string()))?;
            let missing_backend = || ConfigurationError::MissingBackend { flavor: component.flavor.to_string(),
                                                                          category: *category };
            match (category, self.build_backend(component)?) {
                (ComponentCategory::ArtifactStore, BackendHandle::ArtifactStore(s)) => artifact_store = Some(s),
                (ComponentCategory::Orchestrator, BackendHandle::Executor(e)) => orchestrator = Some(e),
                (ComponentCategory::ExecutionBackend, BackendHandle::Executor(e)) => step_operator = Some(e),
                (ComponentCategory::ModelDeployer, BackendHandle::ModelDeployer(d)) => model_deployer = Some(d),
                (ComponentCategory::ContainerRegistry | ComponentCategory::ImageBuilder, _) => {}
                _ => return Err(missing_backend()),
            }
            components.insert(*category, component.clone());
        }
        let artifact_store =
            artifact_store.ok_or(ConfigurationError::MissingCategory(ComponentCategory::ArtifactStore))?;
        let orchestrator = orchestrator.ok_or(ConfigurationError::MissingCategory(ComponentCategory::Orchestrator))?;
        Ok(ActiveStack { stack: stack.clone(),
                         components,
                         artifact_store,
                         orchestrator,
                         step_operator,
                         model_deployer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{ConfigField, FieldKind, InMemoryRegistryStore, LOCAL_FLAG};
    use serde_json::json;

    fn registry() -> ComponentRegistry {
        let mut r = ComponentRegistry::new(Arc::new(InMemoryRegistryStore::new()));
        r.register_flavor(ComponentFlavor::new(ComponentCategory::Orchestrator, "local", Locality::Local)).unwrap();
        r.register_flavor(ComponentFlavor::new(ComponentCategory::Orchestrator, "kubernetes", Locality::Remote)
            .with_field(ConfigField::optional(LOCAL_FLAG, FieldKind::Boolean, Some(json!(false))))
            .with_requirement(Requirement::Category(ComponentCategory::ContainerRegistry)))
         .unwrap();
        r.register_flavor(ComponentFlavor::new(ComponentCategory::ArtifactStore, "local", Locality::Local)
            .with_field(ConfigField::required("path", FieldKind::String)))
         .unwrap();
        r.register_flavor(ComponentFlavor::new(ComponentCategory::ArtifactStore, "s3", Locality::Remote)
            .with_field(ConfigField::required("bucket", FieldKind::String)))
         .unwrap();
        r.register_flavor(ComponentFlavor::new(ComponentCategory::ContainerRegistry, "default", Locality::Remote))
         .unwrap();
        r.register_flavor(ComponentFlavor::new(ComponentCategory::ExecutionBackend,
                                               "remote-job-service",
                                               Locality::Remote))
         .unwrap();
        r
    }

    fn key(s: &str) -> FlavorKey {
        s.parse().unwrap()
    }

    #[test]
    fn duplicate_flavor_is_rejected() {
        let mut r = registry();
        let err = r.register_flavor(ComponentFlavor::new(ComponentCategory::ArtifactStore, "s3", Locality::Remote))
                   .unwrap_err();
        assert_eq!(err,
                   ConfigurationError::DuplicateFlavor { category: ComponentCategory::ArtifactStore,
                                                         name: "s3".into() });
    }

    #[test]
    fn component_config_is_validated() {
        let mut r = registry();
        let err = r.register_component("store", &key("artifact-store:local"), json!({"bucket": "x"}))
                   .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidConfiguration { ref fields, .. }
                              if fields == &vec!["bucket".to_string(), "path".to_string()]));
        assert!(r.component_by_name("store").is_none());
        assert!(matches!(r.register_component("x", &key("artifact-store:gcs"), json!({})),
                         Err(ConfigurationError::UnknownFlavor(_))));
    }

    #[test]
    fn missing_required_category_fails_composition() {
        let mut r = registry();
        let orch = r.register_component("orch", &key("orchestrator:local"), json!({})).unwrap();
        let store = r.register_component("store", &key("artifact-store:local"), json!({"path": "/tmp/a"}))
                     .unwrap();
        assert!(r.compose_stack("ok", &[orch.id, store.id]).is_ok());
        for ids in [vec![orch.id], vec![store.id]] {
            assert!(matches!(r.compose_stack("broken", &ids), Err(ConfigurationError::IncompleteStack { .. })));
        }
    }

    #[test]
    fn remote_step_operator_needs_remote_store() {
        let mut r = registry();
        let orch = r.register_component("orch", &key("orchestrator:local"), json!({})).unwrap();
        let local = r.register_component("local", &key("artifact-store:local"), json!({"path": "/tmp"})).unwrap();
        let bucket = r.register_component("bucket", &key("artifact-store:s3"), json!({"bucket": "b"})).unwrap();
        let jobs = r.register_component("jobs", &key("execution-backend:remote-job-service"), json!({})).unwrap();
        let err = r.compose_stack("mixed", &[orch.id, local.id, jobs.id]).unwrap_err();
        assert!(matches!(err, ConfigurationError::IncompatibleComponents { .. }));
        assert!(r.compose_stack("remote", &[orch.id, bucket.id, jobs.id]).is_ok());
    }

    #[test]
    fn explicit_requirement_and_local_flag_are_honoured() {
        let mut r = registry();
        let k8s = r.register_component("k8s", &key("orchestrator:kubernetes"), json!({})).unwrap();
        let k8s_local = r.register_component("k8s-local", &key("orchestrator:kubernetes"), json!({"local": true}))
                         .unwrap();
        assert_eq!(k8s_local.locality, Locality::Local);
        let bucket = r.register_component("bucket", &key("artifact-store:s3"), json!({"bucket": "b"})).unwrap();
        let local = r.register_component("local", &key("artifact-store:local"), json!({"path": "/tmp"})).unwrap();
        let registry_c = r.register_component("reg", &key("container-registry:default"), json!({})).unwrap();
        assert!(matches!(r.compose_stack("k", &[k8s.id, bucket.id]),
                         Err(ConfigurationError::IncompatibleComponents { .. })));
        assert!(r.compose_stack("k", &[k8s.id, bucket.id, registry_c.id]).is_ok());
        assert!(r.compose_stack("kl", &[k8s_local.id, local.id, registry_c.id]).is_ok());
    }

    #[test]
    fn recomposition_creates_new_identity_and_duplicate_category_fails() {
        let mut r = registry();
        let orch = r.register_component("orch", &key("orchestrator:local"), json!({})).unwrap();
        let a = r.register_component("a", &key("artifact-store:local"), json!({"path": "/a"})).unwrap();
        let b = r.register_component("b", &key("artifact-store:local"), json!({"path": "/b"})).unwrap();
        let first = r.compose_stack("dev", &[orch.id, a.id]).unwrap();
        let second = r.compose_stack("dev", &[orch.id, b.id]).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(r.stack_by_name("dev").unwrap().id, second.id);
        assert_eq!(r.stack(first.id).unwrap().component_id(ComponentCategory::ArtifactStore), Some(a.id));
        assert!(matches!(r.compose_stack("dup", &[orch.id, a.id, b.id]),
                         Err(ConfigurationError::DuplicateCategory { .. })));
    }

    #[test]
    fn restore_reloads_from_store() {
        let store: Arc<dyn RegistryStore> = Arc::new(InMemoryRegistryStore::new());
        let mut r = registry();
        r.store = store.clone();
        let orch = r.register_component("orch", &key("orchestrator:local"), json!({})).unwrap();
        let a = r.register_component("a", &key("artifact-store:local"), json!({"path": "/a"})).unwrap();
        let stack = r.compose_stack("dev", &[orch.id, a.id]).unwrap();

        let mut fresh = registry();
        fresh.store = store;
        assert_eq!(fresh.restore().unwrap(), 3);
        assert_eq!(fresh.stack_by_name("dev"), Some(&stack));
        assert!(fresh.component_by_name("orch").is_some());
    }
}
