//! Constantes del núcleo.
//!
//! `ENGINE_VERSION` entra en el cálculo de cache keys de steps: cambiarla
//! invalida determinísticamente todas las entradas de cache previas.

/// Versión lógica del dispatcher.
pub const ENGINE_VERSION: &str = "S1.0";

/// Nombre del stack local al que se revierte el contexto en `disconnect`.
pub const DEFAULT_STACK_NAME: &str = "default";

/// Raíz universal de la jerarquía de tipos lógicos.
pub const ROOT_DATA_TYPE: &str = "any";

/// Tipo lógico base de los modelos desplegables.
pub const MODEL_DATA_TYPE: &str = "model";

/// Subdirectorio (relativo al URI del artifact) para visualizaciones.
pub const VISUALIZATIONS_DIR: &str = "visualizations";
