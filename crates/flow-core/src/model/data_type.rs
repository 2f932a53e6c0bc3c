//! Tipos lógicos de datos.
//!
//! Un `DataType` es una ruta con puntos (`model.sklearn`). Sus supertipos son
//! sus prefijos (`model`) y finalmente la raíz universal `any`. La
//! especificidad de un tipo es su profundidad.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::ROOT_DATA_TYPE;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataType(String);

impl DataType {
    /// Normaliza espacios y segmentos vacíos (`" a..b "` -> `a.b`). Una ruta
    /// vacía equivale a la raíz.
    pub fn new(path: impl AsRef<str>) -> Self {
        let normalized = path.as_ref()
                             .split('.')
                             .map(str::trim)
                             .filter(|s| !s.is_empty())
                             .collect::<Vec<_>>()
                             .join(".");
        if normalized.is_empty() {
            Self::any()
        } else {
            Self(normalized)
        }
    }

    pub fn any() -> Self {
        Self(ROOT_DATA_TYPE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_DATA_TYPE
    }

    /// Profundidad: `any` = 0, `model` = 1, `model.sklearn` = 2.
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.split('.').count()
        }
    }

    pub fn parent(&self) -> Option<DataType> {
        if self.is_root() {
            return None;
        }
        match self.0.rsplit_once('.') {
            Some((prefix, _)) => Some(Self(prefix.to_string())),
            None => Some(Self::any()),
        }
    }

    /// Cadena de supertipos desde el propio tipo hasta la raíz (incluidos).
    pub fn ancestors(&self) -> Vec<DataType> {
        let mut out = vec![self.clone()];
        let mut cur = self.parent();
        while let Some(t) = cur {
            cur = t.parent();
            out.push(t);
        }
        out
    }

    /// `self` es igual a `other` o desciende de él.
    pub fn is_subtype_of(&self, other: &DataType) -> bool {
        if other.is_root() || self == other {
            return true;
        }
        self.0.len() > other.0.len() && self.0.starts_with(&other.0) && self.0.as_bytes()[other.0.len()] == b'.'
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DataType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_and_parent_follow_the_dotted_path() {
        let t = DataType::new("model.sklearn.forest");
        assert_eq!(t.depth(), 3);
        assert_eq!(t.parent(), Some(DataType::new("model.sklearn")));
        assert_eq!(DataType::new("model").parent(), Some(DataType::any()));
        assert_eq!(DataType::any().parent(), None);
        assert_eq!(DataType::any().depth(), 0);
    }

    #[test]
    fn subtype_requires_a_segment_boundary() {
        let t = DataType::new("model.sklearn");
        assert!(t.is_subtype_of(&DataType::new("model")));
        assert!(t.is_subtype_of(&DataType::any()));
        assert!(t.is_subtype_of(&t));
        assert!(!DataType::new("modelx").is_subtype_of(&DataType::new("model")));
        assert!(!DataType::new("model").is_subtype_of(&t));
    }

    #[test]
    fn ancestors_end_at_root() {
        let chain: Vec<String> = DataType::new("text.csv").ancestors().iter().map(|t| t.to_string()).collect();
        assert_eq!(chain, vec!["text.csv", "text", "any"]);
    }

    #[test]
    fn empty_segments_are_normalized() {
        assert_eq!(DataType::new(" text..csv "), DataType::new("text.csv"));
        assert!(DataType::new("").is_root());
    }
}
