//! Connection supervision
//!
//! The [`ConnectionSupervisor`] keeps a settlement stream open against the backend for as long as the engine runs:
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed -> (stream ends) -> Reconnecting -> Disconnected -> ...
//!                     |                                             ^
//!                     +------------- (connect fails) ---------------+
//! ```
//!
//! Every time a stream is established, the supervisor rescans the pending invoices before the stream delivers anything,
//! so that payments made while the stream was down are not lost. When no reconnect interval is configured, losing the
//! backend (or never reaching it) ends the supervisor with [`SupervisorError::Fatal`].
mod keepalive;
mod rescan;
mod shutdown;

use std::{fmt::Display, sync::Arc, time::Duration};

use async_trait::async_trait;
pub use keepalive::start_keepalive;
use log::*;
pub use rescan::{rescan, RescanSummary};
pub use shutdown::{shutdown_channel, Shutdown, ShutdownSignal};
use thiserror::Error;
use tokio::sync::watch;

use crate::{
    backend::{Backend, BackendError, SettlementListener},
    db_types::PaymentHash,
    dispatcher::SettlementDispatcher,
    registry::PendingInvoiceRegistry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Reconnecting,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Subscribed => "Subscribed",
            ConnectionState::Reconnecting => "Reconnecting",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Lost the backend and reconnecting is disabled. {0}")]
    Fatal(BackendError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Pause between reconnect attempts. `None` makes any disconnection fatal.
    pub reconnect_interval: Option<Duration>,
    pub keepalive_interval: Option<Duration>,
}

impl SupervisorConfig {
    /// Builds a config from intervals in seconds, where zero disables the feature.
    pub fn from_secs(reconnect_interval: u64, keepalive_interval: u64) -> Self {
        let enabled = |secs: u64| (secs > 0).then(|| Duration::from_secs(secs));
        Self { reconnect_interval: enabled(reconnect_interval), keepalive_interval: enabled(keepalive_interval) }
    }
}

pub struct ConnectionSupervisor<B: Backend> {
    backend: Arc<B>,
    registry: PendingInvoiceRegistry,
    dispatcher: SettlementDispatcher,
    config: SupervisorConfig,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl<B: Backend> ConnectionSupervisor<B> {
    pub fn new(
        backend: Arc<B>,
        registry: PendingInvoiceRegistry,
        dispatcher: SettlementDispatcher,
        config: SupervisorConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self { backend, registry, dispatcher, config, state: Arc::new(state) }
    }

    /// Follow the connection state. The receiver stays valid after the supervisor has stopped.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Runs until `shutdown` fires, returning `Ok(())`, or until the backend is lost with reconnecting disabled.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), SupervisorError> {
        let keepalive = self.config.keepalive_interval.map(|i| start_keepalive(Arc::clone(&self.backend), i));
        let result = tokio::select! {
            result = self.supervise() => result,
            _ = shutdown.wait() => {
                info!("🔌️ Shutdown requested. Closing the connection to {}", self.backend.name());
                Ok(())
            }
        };
        if let Some(handle) = keepalive {
            handle.abort();
        }
        set_state(&self.state, ConnectionState::Disconnected);
        result
    }

    async fn supervise(&self) -> Result<(), SupervisorError> {
        loop {
            let cause = self.connect_and_subscribe().await;
            let Some(interval) = self.config.reconnect_interval else {
                error!("🔌️ Lost the connection to {} and reconnecting is disabled. {cause}", self.backend.name());
                return Err(SupervisorError::Fatal(cause));
            };
            set_state(&self.state, ConnectionState::Reconnecting);
            warn!("🔌️ Lost the connection to {}. Retrying in {}s. {cause}", self.backend.name(), interval.as_secs_f32());
            tokio::time::sleep(interval).await;
            set_state(&self.state, ConnectionState::Disconnected);
        }
    }

    /// Connects and holds the settlement stream open. Returns the reason the stream could not be opened or has ended.
    async fn connect_and_subscribe(&self) -> BackendError {
        set_state(&self.state, ConnectionState::Connecting);
        if let Err(e) = self.backend.connect().await {
            return e;
        }
        info!("🔌️ Connected to {}", self.backend.name());
        let listener = SupervisorListener {
            backend: Arc::clone(&self.backend),
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
            state: Arc::clone(&self.state),
        };
        self.backend.subscribe_settlements(&listener).await
    }
}

fn set_state(state: &watch::Sender<ConnectionState>, new_state: ConnectionState) {
    let old = state.send_replace(new_state);
    if old != new_state {
        debug!("🔌️ Connection state: {old} -> {new_state}");
    }
}

struct SupervisorListener<B: Backend> {
    backend: Arc<B>,
    registry: PendingInvoiceRegistry,
    dispatcher: SettlementDispatcher,
    state: Arc<watch::Sender<ConnectionState>>,
}

#[async_trait]
impl<B: Backend> SettlementListener for SupervisorListener<B> {
    async fn on_resubscribed(&self) {
        set_state(&self.state, ConnectionState::Subscribed);
        info!("🔌️ Subscribed to settlements on {}", self.backend.name());
        rescan(self.backend.as_ref(), &self.registry, &self.dispatcher).await;
    }

    async fn on_settled(&self, payment_hash: PaymentHash) {
        self.dispatcher.publish(&payment_hash).await;
    }
}

#[cfg(test)]
mod test {
    use chrono::{Duration as ChronoDuration, Utc};
    use tip_common::Satoshis;

    use super::*;
    use crate::{
        db_types::PendingInvoice,
        events::EventProducers,
        test_utils::SimulatedBackend,
    };

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_reconnect() -> SupervisorConfig {
        SupervisorConfig { reconnect_interval: Some(Duration::from_millis(20)), keepalive_interval: None }
    }

    struct Harness {
        backend: Arc<SimulatedBackend>,
        registry: PendingInvoiceRegistry,
        dispatcher: SettlementDispatcher,
    }

    impl Harness {
        fn new(backend: SimulatedBackend) -> Self {
            let registry = PendingInvoiceRegistry::new();
            let dispatcher = SettlementDispatcher::new(registry.clone(), EventProducers::default());
            Self { backend: Arc::new(backend), registry, dispatcher }
        }

        fn supervisor(&self, config: SupervisorConfig) -> ConnectionSupervisor<SimulatedBackend> {
            ConnectionSupervisor::new(Arc::clone(&self.backend), self.registry.clone(), self.dispatcher.clone(), config)
        }

        async fn pending(&self, amount: i64) -> PaymentHash {
            let issued = self.backend.create_invoice("", Satoshis::from(amount), 60).await.unwrap();
            let hash = issued.payment_hash.clone();
            let invoice = PendingInvoice::new(issued, Satoshis::from(amount), None, Utc::now(), ChronoDuration::seconds(60));
            self.registry.add(invoice).unwrap();
            hash
        }
    }

    #[test]
    fn zero_intervals_disable_features() {
        let config = SupervisorConfig::from_secs(0, 0);
        assert_eq!(config, SupervisorConfig::default());
        let config = SupervisorConfig::from_secs(5, 30);
        assert_eq!(config.reconnect_interval, Some(Duration::from_secs(5)));
        assert_eq!(config.keepalive_interval, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn unreachable_backend_is_fatal_without_reconnect() {
        let _ = env_logger::try_init();
        let harness = Harness::new(SimulatedBackend::unreachable());
        let (_signal, shutdown) = shutdown_channel();
        let supervisor = harness.supervisor(SupervisorConfig::default());
        let state = supervisor.state();
        let result = tokio::time::timeout(WAIT, supervisor.run(shutdown)).await.unwrap();
        assert!(matches!(result, Err(SupervisorError::Fatal(BackendError::Connection(_)))));
        assert_eq!(harness.backend.connect_attempts(), 1);
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn stream_end_is_fatal_without_reconnect() {
        let _ = env_logger::try_init();
        let harness = Harness::new(SimulatedBackend::new());
        let (_signal, shutdown) = shutdown_channel();
        let task = tokio::spawn(harness.supervisor(SupervisorConfig::default()).run(shutdown));
        assert!(harness.backend.wait_for_subscriptions(1).await);
        harness.backend.terminate_stream("node restarted");
        let result = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
        assert!(matches!(result, Err(SupervisorError::Fatal(BackendError::StreamTerminated(_)))));
    }

    #[tokio::test]
    async fn retries_until_the_backend_is_reachable() {
        let _ = env_logger::try_init();
        let backend = SimulatedBackend::new();
        backend.fail_next_connects(3);
        let harness = Harness::new(backend);
        let (signal, shutdown) = shutdown_channel();
        let supervisor = harness.supervisor(fast_reconnect());
        let mut state = supervisor.state();
        let task = tokio::spawn(supervisor.run(shutdown));
        assert!(harness.backend.wait_for_subscriptions(1).await);
        assert_eq!(harness.backend.connect_attempts(), 4);
        tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Subscribed)).await.unwrap().unwrap();
        signal.trigger();
        assert!(tokio::time::timeout(WAIT, task).await.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn resubscribes_and_rescans_after_stream_loss() {
        let _ = env_logger::try_init();
        let harness = Harness::new(SimulatedBackend::new());
        let (signal, shutdown) = shutdown_channel();
        let mut live = harness.dispatcher.subscribe();
        let task = tokio::spawn(harness.supervisor(fast_reconnect()).run(shutdown));
        assert!(harness.backend.wait_for_subscriptions(1).await);

        let missed = harness.pending(700).await;
        harness.backend.disconnect();
        harness.backend.settle_offline(&missed);
        harness.backend.set_reachable(true);
        assert!(harness.backend.wait_for_subscriptions(2).await);

        let event = tokio::time::timeout(WAIT, live.recv()).await.unwrap().unwrap();
        assert_eq!(event.payment_hash, missed);
        assert!(harness.registry.is_empty());
        // The stream redelivering the same settlement is a no-op
        harness.backend.replay(&missed);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(live.try_recv().is_err());

        signal.trigger();
        assert!(tokio::time::timeout(WAIT, task).await.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn live_settlements_are_dispatched_in_stream_order() {
        let _ = env_logger::try_init();
        let harness = Harness::new(SimulatedBackend::new());
        let (signal, shutdown) = shutdown_channel();
        let mut live = harness.dispatcher.subscribe();
        let task = tokio::spawn(harness.supervisor(SupervisorConfig::default()).run(shutdown));
        assert!(harness.backend.wait_for_subscriptions(1).await);
        let first = harness.pending(1).await;
        let second = harness.pending(2).await;
        harness.backend.push_settlement(&second);
        harness.backend.push_settlement(&first);
        assert_eq!(tokio::time::timeout(WAIT, live.recv()).await.unwrap().unwrap().payment_hash, second);
        assert_eq!(tokio::time::timeout(WAIT, live.recv()).await.unwrap().unwrap().payment_hash, first);
        signal.trigger();
        assert!(tokio::time::timeout(WAIT, task).await.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_reconnect_sleep() {
        let _ = env_logger::try_init();
        let harness = Harness::new(SimulatedBackend::unreachable());
        let (signal, shutdown) = shutdown_channel();
        let config = SupervisorConfig { reconnect_interval: Some(Duration::from_secs(3600)), keepalive_interval: None };
        let supervisor = harness.supervisor(config);
        let mut state = supervisor.state();
        let task = tokio::spawn(supervisor.run(shutdown));
        tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Reconnecting)).await.unwrap().unwrap();
        signal.trigger();
        assert!(tokio::time::timeout(WAIT, task).await.unwrap().unwrap().is_ok());
        assert_eq!(*state.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn keepalive_failures_do_not_reconnect() {
        let _ = env_logger::try_init();
        let backend = SimulatedBackend::new();
        backend.set_keepalive_failing(true);
        let harness = Harness::new(backend);
        let (signal, shutdown) = shutdown_channel();
        let config =
            SupervisorConfig { reconnect_interval: Some(Duration::from_millis(20)), keepalive_interval: Some(Duration::from_millis(10)) };
        let task = tokio::spawn(harness.supervisor(config).run(shutdown));
        assert!(harness.backend.wait_for_subscriptions(1).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(harness.backend.keepalive_count() > 0);
        assert_eq!(harness.backend.subscription_count(), 1);
        assert_eq!(harness.backend.connect_attempts(), 1);
        signal.trigger();
        assert!(tokio::time::timeout(WAIT, task).await.unwrap().unwrap().is_ok());
        // The ticker stops with the supervisor
        let pings = harness.backend.keepalive_count();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(harness.backend.keepalive_count(), pings);
    }
}
