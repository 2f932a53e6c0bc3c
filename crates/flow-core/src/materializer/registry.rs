//! Registry de materializers y algoritmo de resolución.
//!
//! Para un output de tipo declarado `T`:
//! 1. Si el output fija un materializer explícito, se usa; debe declarar `T`
//!    o un supertipo de `T` (si no, `TypeMismatch`).
//! 2. Si no, gana el materializer cuyo tipo declarado compatible es más
//!    específico (mayor profundidad). Los empates los gana el registrado más
//!    recientemente y se emite un warning de ambigüedad.
//! 3. Si ninguno encaja, se usa el fallback opaco con un warning de
//!    compatibilidad.
//!
//! La resolución es determinista para un snapshot dado del registry.
use std::sync::Arc;

use log::warn;

use super::{BytesMaterializer, JsonMaterializer, Materializer, ModelMaterializer, OpaqueMaterializer,
            PrimitiveMaterializer, TextMaterializer};
use crate::errors::MaterializationError;
use crate::model::DataType;

#[derive(Clone)]
struct Binding {
    materializer: Arc<dyn Materializer>,
    seq: u64,
}

#[derive(Clone)]
pub struct MaterializerRegistry {
    bindings: Vec<Binding>,
    next_seq: u64,
    fallback: Arc<dyn Materializer>,
}

/// Resultado de una resolución.
#[derive(Clone)]
pub struct Resolution {
    pub materializer: Arc<dyn Materializer>,
    /// Tipo declarado que produjo el match (`None` para el fallback).
    pub matched_type: Option<DataType>,
    /// Otros candidatos con la misma especificidad (empate resuelto por
    /// orden de registro).
    pub ambiguous_with: Vec<String>,
    pub is_fallback: bool,
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolution")
         .field("materializer", &self.materializer.name())
         .field("matched_type", &self.matched_type)
         .field("ambiguous_with", &self.ambiguous_with)
         .field("is_fallback", &self.is_fallback)
         .finish()
    }
}

impl Default for MaterializerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterializerRegistry {
    /// Registry vacío con el fallback opaco.
    pub fn new() -> Self {
        Self { bindings: Vec::new(),
               next_seq: 0,
               fallback: Arc::new(OpaqueMaterializer) }
    }

    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.register(Arc::new(BytesMaterializer));
        r.register(Arc::new(TextMaterializer));
        r.register(Arc::new(JsonMaterializer));
        r.register(Arc::new(PrimitiveMaterializer));
        r.register(Arc::new(ModelMaterializer));
        r
    }

    pub fn register(&mut self, materializer: Arc<dyn Materializer>) {
        self.bindings.push(Binding { materializer,
                                     seq: self.next_seq });
        self.next_seq += 1;
    }

    /// Busca por nombre; con nombres repetidos gana el último registrado.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Materializer>> {
        if let Some(b) = self.bindings.iter().rev().find(|b| b.materializer.name() == name) {
            return Some(b.materializer.clone());
        }
        (self.fallback.name() == name).then(|| self.fallback.clone())
    }

    pub fn fallback(&self) -> Arc<dyn Materializer> {
        self.fallback.clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.bindings.iter().map(|b| b.materializer.name().to_string()).collect()
    }

    pub fn resolve(&self, data_type: &DataType, explicit: Option<&str>) -> Result<Resolution, MaterializationError> {
        if let Some(name) = explicit {
            let materializer = self.get(name)
                                   .ok_or_else(|| MaterializationError::UnknownMaterializer(name.to_string()))?;
            let matched = best_match(materializer.as_ref(), data_type);
            let Some(matched_type) = matched else {
                return Err(MaterializationError::TypeMismatch { materializer: name.to_string(),
                                                                data_type: data_type.to_string() });
            };
            return Ok(Resolution { is_fallback: Arc::ptr_eq(&materializer, &self.fallback),
                                   materializer,
                                   matched_type: Some(matched_type),
                                   ambiguous_with: Vec::new() });
        }

        // Máximo por (profundidad, seq).
        let mut best: Option<(usize, u64, &Binding, DataType)> = None;
        let mut candidates: Vec<(usize, &Binding)> = Vec::new();
        for binding in &self.bindings {
            if let Some(t) = best_match(binding.materializer.as_ref(), data_type) {
                let depth = t.depth();
                candidates.push((depth, binding));
                let better = match &best {
                    None => true,
                    Some((d, s, _, _)) => (depth, binding.seq) > (*d, *s),
                };
                if better {
                    best = Some((depth, binding.seq, binding, t));
                }
            }
        }

        match best {
            Some((depth, _, winner, matched_type)) => {
                let mut ambiguous_with: Vec<String> =
                    candidates.iter()
                              .filter(|(d, b)| *d == depth && b.seq != winner.seq)
                              .map(|(_, b)| b.materializer.name().to_string())
                              .filter(|n| n != winner.materializer.name())
                              .collect();
                ambiguous_with.dedup();
                if !ambiguous_with.is_empty() {
                    warn!("ambiguous materializer resolution for `{data_type}`: `{}` wins over {:?} (most recently \
                           registered)",
                          winner.materializer.name(),
                          ambiguous_with);
                }
                Ok(Resolution { materializer: winner.materializer.clone(),
                                matched_type: Some(matched_type),
                                ambiguous_with,
                                is_fallback: false })
            }
            None => {
                warn!("no materializer registered for `{data_type}`; falling back to `{}` (not portable across \
                       versions, unsuitable for long-term storage)",
                      self.fallback.name());
                Ok(Resolution { materializer: self.fallback.clone(),
                                matched_type: None,
                                ambiguous_with: Vec::new(),
                                is_fallback: true })
            }
        }
    }
}

/// Tipo declarado más específico de `m` que es supertipo de `data_type`.
fn best_match(m: &dyn Materializer, data_type: &DataType) -> Option<DataType> {
    m.handled_types()
     .into_iter()
     .filter(|t| data_type.is_subtype_of(t))
     .max_by_key(DataType::depth)
}
