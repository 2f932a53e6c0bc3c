//! Configuración del núcleo.
//! Carga variables de entorno (.env una sola vez) y expone `FlowConfig`, del
//! que derivan `DispatchConfig` y `DeployConfig`.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowConfig {
    /// Directorio raíz del artifact store local del stack `default`.
    pub artifact_root: String,
    /// Primer intervalo de polling contra backends.
    pub poll_initial: Duration,
    /// Techo del backoff exponencial.
    pub poll_max: Duration,
    pub poll_factor: f64,
    /// Timeout por step si el step no define el suyo.
    pub step_timeout: Duration,
    /// Fallos transitorios consecutivos tolerados al consultar estado.
    pub max_poll_failures: u32,
    pub max_parallel_steps: usize,
    /// Tiempo máximo para que un servicio pase de PENDING a RUNNING.
    pub deploy_timeout: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self { artifact_root: "./.stackflow/artifacts".to_string(),
               poll_initial: Duration::from_millis(50),
               poll_max: Duration::from_millis(2000),
               poll_factor: 2.0,
               step_timeout: Duration::from_secs(3600),
               max_poll_failures: 5,
               max_parallel_steps: 4,
               deploy_timeout: Duration::from_secs(300) }
    }
}

impl FlowConfig {
    /// Lee `STACKFLOW_*` del entorno; cualquier valor ausente o inválido
    /// conserva el default.
    pub fn from_env() -> Self {
        init_dotenv();
        let d = Self::default();
        Self { artifact_root: env::var("STACKFLOW_ARTIFACT_ROOT").unwrap_or(d.artifact_root),
               poll_initial: Duration::from_millis(var_or("STACKFLOW_POLL_INITIAL_MS", 50)),
               poll_max: Duration::from_millis(var_or("STACKFLOW_POLL_MAX_MS", 2000)),
               poll_factor: var_or("STACKFLOW_POLL_FACTOR", d.poll_factor),
               step_timeout: Duration::from_secs(var_or("STACKFLOW_STEP_TIMEOUT_SECS", 3600)),
               max_poll_failures: var_or("STACKFLOW_MAX_POLL_FAILURES", d.max_poll_failures),
               max_parallel_steps: var_or("STACKFLOW_MAX_PARALLEL_STEPS", d.max_parallel_steps).max(1),
               deploy_timeout: Duration::from_secs(var_or("STACKFLOW_DEPLOY_TIMEOUT_SECS", 300)) }
    }
}

fn var_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = FlowConfig::default();
        assert!(c.poll_initial < c.poll_max);
        assert!(c.poll_factor >= 1.0);
        assert!(c.max_parallel_steps >= 1);
    }

    #[test]
    fn invalid_values_fall_back_to_default() {
        assert_eq!(var_or::<u64>("STACKFLOW_TEST_UNSET_VARIABLE", 7), 7);
    }
}
