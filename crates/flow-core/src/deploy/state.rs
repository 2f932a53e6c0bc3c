use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ciclo de vida de un servicio de inferencia.
///
/// ```text
/// PENDING -> RUNNING -> {ERROR, STOPPED}
/// PENDING -> ERROR                        (fallo de arranque)
/// RUNNING | ERROR | STOPPED -> PENDING    (redeploy explícito)
/// * -> DELETED                            (delete; terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceState {
    Pending,
    Running,
    Error,
    Stopped,
    Deleted,
}

impl ServiceState {
    pub fn can_transition_to(&self, to: ServiceState) -> bool {
        use ServiceState::*;
        match (self, to) {
            (Deleted, _) => false,
            (_, Deleted) => true,
            (Pending, Running | Error) => true,
            (Running, Error | Stopped) => true,
            (Running | Error | Stopped, Pending) => true,
            (Pending, Pending) => true,
            _ => false,
        }
    }

    /// Transiciones que puede aplicar un refresh de estado observado: sólo
    /// hacia delante. `ERROR -> RUNNING` exige un redeploy.
    pub fn can_refresh_to(&self, observed: ServiceState) -> bool {
        use ServiceState::*;
        matches!((self, observed), (Pending, Running | Error) | (Running, Error | Stopped))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Error => "ERROR",
            Self::Stopped => "STOPPED",
            Self::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Pending, Self::Running, Self::Error, Self::Stopped, Self::Deleted]
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown service state `{s}`"))
    }
}

#[cfg(test)]
mod tests {
    use super::ServiceState::*;
    use super::*;

    #[test]
    fn deleted_is_terminal() {
        for to in [Pending, Running, Error, Stopped, Deleted] {
            assert!(!Deleted.can_transition_to(to));
        }
        for from in [Pending, Running, Error, Stopped] {
            assert!(from.can_transition_to(Deleted));
        }
    }

    #[test]
    fn error_does_not_recover_without_redeploy() {
        assert!(!Error.can_transition_to(Running));
        assert!(!Error.can_refresh_to(Running));
        assert!(Error.can_transition_to(Pending));
        assert!(Running.can_refresh_to(Error));
        assert!(!Stopped.can_refresh_to(Running));
    }

    #[test]
    fn parses_display_form() {
        assert_eq!("RUNNING".parse::<ServiceState>().unwrap(), Running);
        assert!("running".parse::<ServiceState>().is_err());
    }
}
