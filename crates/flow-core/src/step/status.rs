use std::fmt;

use serde::{Deserialize, Serialize};

/// Estado de un Step dentro de un Run.
///
/// Transiciones:
/// - `Pending` -> `Running` | `Cached` | `SkippedUpstreamFailure` | `Cancelled`
/// - `Running` -> `Succeeded` | `Failed` | `Cancelled`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    /// Outputs reutilizados de una ejecución previa con la misma clave.
    Cached,
    Failed,
    /// Algún step del que depende (directa o transitivamente) falló.
    SkippedUpstreamFailure,
    Cancelled,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Sus outputs existen y pueden consumirse aguas abajo.
    pub fn produced_outputs(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Cached)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Cached => "CACHED",
            Self::Failed => "FAILED",
            Self::SkippedUpstreamFailure => "SKIPPED_UPSTREAM_FAILURE",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Estado final de un Run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}
