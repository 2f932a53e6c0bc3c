//! Categorías de componentes de un stack.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigurationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentCategory {
    Orchestrator,
    ArtifactStore,
    ContainerRegistry,
    ExecutionBackend,
    ModelDeployer,
    ImageBuilder,
}

impl ComponentCategory {
    pub const ALL: [ComponentCategory; 6] = [Self::Orchestrator,
                                              Self::ArtifactStore,
                                              Self::ContainerRegistry,
                                              Self::ExecutionBackend,
                                              Self::ModelDeployer,
                                              Self::ImageBuilder];

    /// Categorías obligatorias en todo stack válido.
    pub const REQUIRED: [ComponentCategory; 2] = [Self::Orchestrator, Self::ArtifactStore];

    pub fn is_required(&self) -> bool {
        Self::REQUIRED.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::ArtifactStore => "artifact-store",
            Self::ContainerRegistry => "container-registry",
            Self::ExecutionBackend => "execution-backend",
            Self::ModelDeployer => "model-deployer",
            Self::ImageBuilder => "image-builder",
        }
    }
}

impl fmt::Display for ComponentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentCategory {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.iter()
                 .copied()
                 .find(|c| c.as_str() == s)
                 .ok_or_else(|| ConfigurationError::UnknownFlavor(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips_through_from_str() {
        for c in ComponentCategory::ALL {
            assert_eq!(c.to_string().parse::<ComponentCategory>().unwrap(), c);
        }
        assert!("scheduler".parse::<ComponentCategory>().is_err());
    }

    #[test]
    fn only_orchestrator_and_artifact_store_are_required() {
        let required: Vec<_> = ComponentCategory::ALL.iter().filter(|c| c.is_required()).collect();
        assert_eq!(required, vec![&ComponentCategory::Orchestrator, &ComponentCategory::ArtifactStore]);
    }
}
