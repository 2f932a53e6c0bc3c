//! Señal de cancelación de un run.
//!
//! El handle y las señales comparten un `watch`: cancelar es idempotente y
//! todas las tareas en vuelo lo observan en su loop de polling.
use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

#[derive(Clone, Debug)]
pub struct CancelSignal(watch::Receiver<bool>);

pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(Arc::new(tx)), CancelSignal(rx))
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

impl CancelSignal {
    /// Señal que nunca se dispara.
    pub fn never() -> Self {
        let (_, signal) = cancellation();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Se resuelve cuando se cancela. Si el handle se descarta sin cancelar,
    /// no se resuelve nunca.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
