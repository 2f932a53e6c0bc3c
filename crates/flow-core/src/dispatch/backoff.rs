use std::time::Duration;

/// Backoff exponencial acotado para el polling contra backends.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    current: Duration,
    max: Duration,
    factor: f64,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        let initial = initial.min(max);
        Self { initial,
               current: initial,
               max,
               factor: factor.max(1.0) }
    }

    /// Espera a aplicar ahora; la siguiente crece por `factor` hasta `max`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(self.factor).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
