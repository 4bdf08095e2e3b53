//! Shutdown coordination.

use std::future::Future;

use tokio::sync::broadcast;

/// Coordinator for graceful shutdown.
///
/// Backed by a broadcast channel that [`Shutdown::signalled`] subscribes to. Dropping
/// every clone of the coordinator counts as a trigger.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Future resolving on the next trigger (or once all coordinators are gone).
    ///
    /// Subscribes immediately, so a trigger sent after this call is never missed.
    pub fn signalled(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            let _ = rx.recv().await;
        }
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_wakes_subscribers() {
        let shutdown = Shutdown::new();
        let signalled = shutdown.signalled();
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), signalled).await.unwrap();
    }

    #[tokio::test]
    async fn dropping_the_coordinator_counts_as_trigger() {
        let shutdown = Shutdown::new();
        let signalled = shutdown.signalled();
        drop(shutdown);
        tokio::time::timeout(Duration::from_secs(1), signalled).await.unwrap();
    }
}
