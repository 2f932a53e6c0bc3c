//! Flavors: tipos de implementación de backend dentro de una categoría.
//!
//! Un flavor es inmutable una vez registrado. Declara el esquema de su
//! configuración, su localidad (local/remota) y los requisitos que sus
//! compañeros de stack deben satisfacer.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ComponentCategory;
use crate::errors::ConfigurationError;

/// Clave `(categoría, nombre)` de un flavor, mostrada como `categoria:nombre`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlavorKey {
    pub category: ComponentCategory,
    pub name: String,
}

impl FlavorKey {
    pub fn new(category: ComponentCategory, name: impl Into<String>) -> Self {
        Self { category,
               name: name.into() }
    }
}

impl fmt::Display for FlavorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.name)
    }
}

impl FromStr for FlavorKey {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (cat, name) = s.split_once(':').ok_or_else(|| ConfigurationError::UnknownFlavor(s.to_string()))?;
        if name.is_empty() {
            return Err(ConfigurationError::UnknownFlavor(s.to_string()));
        }
        Ok(Self::new(cat.parse()?, name))
    }
}

/// Tipo JSON esperado para un campo de configuración.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    pub name: String,
    pub description: String,
    pub kind: FieldKind,
    pub required: bool,
    pub default_value: Option<Value>,
}

impl ConfigField {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self { name: name.into(),
               description: String::new(),
               kind,
               required: true,
               default_value: None }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind, default_value: Option<Value>) -> Self {
        Self { name: name.into(),
               description: String::new(),
               kind,
               required: false,
               default_value }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locality {
    Local,
    Remote,
}

/// Restricciones de compatibilidad que un componente impone a sus pares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Requirement {
    /// El artifact store del stack debe ser remoto.
    RemoteArtifactStore,
    /// Debe existir algún componente de la categoría indicada.
    Category(ComponentCategory),
    /// Ningún otro componente del stack puede ser remoto.
    LocalPeersOnly,
}

/// Nombre de la clave de configuración que permite forzar la localidad.
pub const LOCAL_FLAG: &str = "local";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentFlavor {
    pub key: FlavorKey,
    pub description: String,
    pub schema: Vec<ConfigField>,
    pub locality: Locality,
    pub requirements: Vec<Requirement>,
}

impl ComponentFlavor {
    pub fn new(category: ComponentCategory, name: impl Into<String>, locality: Locality) -> Self {
        Self { key: FlavorKey::new(category, name),
               description: String::new(),
               schema: Vec::new(),
               locality,
               requirements: Vec::new() }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_field(mut self, field: ConfigField) -> Self {
        self.schema.push(field);
        self
    }

    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn category(&self) -> ComponentCategory {
        self.key.category
    }

    /// Valida `config` contra el esquema y devuelve la configuración con los
    /// defaults aplicados. Los campos ausentes obligatorios, los de tipo
    /// incorrecto y los desconocidos se reportan juntos.
    pub fn validate_config(&self, config: &Map<String, Value>) -> Result<Map<String, Value>, ConfigurationError> {
        let mut offending = Vec::new();
        let mut out = Map::new();
        for field in &self.schema {
            match config.get(&field.name) {
                Some(v) if field.kind.matches(v) => {
                    out.insert(field.name.clone(), v.clone());
                }
                Some(Value::Null) if !field.required => {
                    if let Some(d) = &field.default_value {
                        out.insert(field.name.clone(), d.clone());
                    }
                }
                Some(_) => offending.push(field.name.clone()),
                None if field.required => offending.push(field.name.clone()),
                None => {
                    if let Some(d) = &field.default_value {
                        out.insert(field.name.clone(), d.clone());
                    }
                }
            }
        }
        for key in config.keys() {
            if !self.schema.iter().any(|f| &f.name == key) {
                offending.push(key.clone());
            }
        }
        if offending.is_empty() {
            Ok(out)
        } else {
            offending.sort();
            Err(ConfigurationError::InvalidConfiguration { flavor: self.key.to_string(),
                                                           fields: offending })
        }
    }

    /// Localidad efectiva de un componente: el flag `local` de su
    /// configuración, si el esquema lo declara, prevalece sobre el flavor.
    pub fn locality_for(&self, config: &Map<String, Value>) -> Locality {
        let declares_flag = self.schema.iter().any(|f| f.name == LOCAL_FLAG);
        match config.get(LOCAL_FLAG).and_then(Value::as_bool) {
            Some(true) if declares_flag => Locality::Local,
            Some(false) if declares_flag => Locality::Remote,
            _ => self.locality,
        }
    }
}
