//! Componentes configurados y stacks.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{ComponentCategory, FlavorKey, Locality};

/// Instancia de un flavor con configuración concreta (ya validada y con
/// defaults aplicados). Pertenece al registry; los stacks sólo la
/// referencian por id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackComponent {
    pub id: Uuid,
    pub name: String,
    pub flavor: FlavorKey,
    pub config: Map<String, Value>,
    pub locality: Locality,
    pub created_at: DateTime<Utc>,
}

impl StackComponent {
    pub fn category(&self) -> ComponentCategory {
        self.flavor.category
    }

    pub fn is_remote(&self) -> bool {
        self.locality == Locality::Remote
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(Value::as_u64)
    }

    pub fn config_f64(&self, key: &str) -> Option<f64> {
        self.config.get(key).and_then(Value::as_f64)
    }
}

/// Conjunto validado de componentes, uno por categoría. Inmutable: cambiar
/// su composición produce un `Stack` con otro id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    pub id: Uuid,
    pub name: String,
    pub components: BTreeMap<ComponentCategory, Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Stack {
    pub fn component_id(&self, category: ComponentCategory) -> Option<Uuid> {
        self.components.get(&category).copied()
    }

    pub fn component_ids(&self) -> Vec<Uuid> {
        self.components.values().copied().collect()
    }
}
