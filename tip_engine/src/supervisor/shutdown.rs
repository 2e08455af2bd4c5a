use tokio::sync::watch;

/// Creates a linked shutdown pair. Triggering the [`ShutdownSignal`] releases every clone of the [`Shutdown`].
pub fn shutdown_channel() -> (ShutdownSignal, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSignal(tx), Shutdown(rx))
}

#[derive(Debug)]
pub struct ShutdownSignal(watch::Sender<bool>);

impl ShutdownSignal {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct Shutdown(watch::Receiver<bool>);

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once shutdown has been triggered. If the signal is dropped without firing, this never resolves.
    pub async fn wait(&self) {
        let mut rx = self.0.clone();
        if rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn trigger_releases_all_clones() {
        let (signal, shutdown) = shutdown_channel();
        let other = shutdown.clone();
        assert!(!shutdown.is_triggered());
        let waiter = tokio::spawn(async move { other.wait().await });
        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(shutdown.is_triggered());
        // Waiting after the fact returns immediately
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn dropped_signal_never_fires() {
        let (signal, shutdown) = shutdown_channel();
        drop(signal);
        assert!(tokio::time::timeout(Duration::from_millis(50), shutdown.wait()).await.is_err());
    }
}
