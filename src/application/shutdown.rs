// Shutdown signal for long-lived tasks
use tokio::sync::watch;

/// Fires the shutdown. Dropping it counts as firing.
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Awaited by the session task and every open scene stream, so they end even
/// while HTTP connections still hold handles.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    /// Resolves once shutdown has been triggered. Cancel safe.
    pub async fn wait(&mut self) {
        // An error means the trigger is gone, which is shutdown too.
        let _ = self.rx.wait_for(|stopping| *stopping).await;
    }
}
