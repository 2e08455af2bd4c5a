use std::{path::Path, sync::Arc, time::Duration};

use log::*;
use tip_engine::{
    events::{EventHandlers, EventHooks},
    shutdown_channel,
    start_expiry_sweeper,
    Backend,
    ConnectionState,
    ConnectionSupervisor,
    LndBackend,
    MailNotifier,
    PendingInvoiceRegistry,
    SettlementDispatcher,
    ShutdownSignal,
    SmtpNotifier,
    SqliteTipStore,
    SupervisorError,
    TipApi,
};
use tokio::{sync::watch, task::JoinHandle};

use crate::{config::ServerConfig, errors::ServerError};

const DB_MAX_CONNECTIONS: u32 = 5;
/// How long queued notifications get to finish when the server stops
const SINK_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Connects to LND and runs until Ctrl-C (or SIGTERM), or until LND is lost with reconnecting disabled.
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let backend = Arc::new(LndBackend::new(config.lnd.clone()));
    let server = TipServer::start_with_backend(&config, backend).await?;
    let signal = server.shutdown_signal();
    tokio::spawn(async move {
        shutdown_requested().await;
        info!("🚀️ Shutdown requested");
        signal.trigger();
    });
    server.wait().await
}

/// A running tip engine: sinks, registry, sweeper and connection supervisor, wired together.
pub struct TipServer<B: Backend> {
    api: TipApi<B>,
    store: SqliteTipStore,
    signal: Arc<ShutdownSignal>,
    connection: watch::Receiver<ConnectionState>,
    supervisor: JoinHandle<Result<(), SupervisorError>>,
    sweeper: JoinHandle<()>,
    sinks: Vec<JoinHandle<()>>,
}

impl<B: Backend> TipServer<B> {
    pub async fn start_with_backend(config: &ServerConfig, backend: Arc<B>) -> Result<Self, ServerError> {
        prepare_database_dir(&config.database_url)?;
        let store = SqliteTipStore::new_with_url(&config.database_url, max_connections(&config.database_url)).await?;
        let mut hooks = EventHooks::default();
        hooks.with_sink(Arc::new(store.clone()));
        match config.mail.as_ref().map(|mail| (mail, mail.smtp.as_ref())) {
            Some((mail, Some(smtp))) => {
                hooks.with_sink(Arc::new(SmtpNotifier::new(mail, smtp)?));
            },
            Some((mail, None)) => {
                hooks.with_sink(Arc::new(MailNotifier::new(mail.clone())));
            },
            None => {},
        }
        let handlers = EventHandlers::new(hooks);
        let registry = PendingInvoiceRegistry::new();
        let dispatcher = SettlementDispatcher::new(registry.clone(), handlers.producers());
        let sinks = handlers.start_handlers();
        let api = TipApi::new(Arc::clone(&backend), registry.clone(), dispatcher.clone(), config.tip_expiry);
        let sweeper = start_expiry_sweeper(registry.clone(), config.tip_expiry);

        let supervisor = ConnectionSupervisor::new(backend, registry, dispatcher, config.supervisor_config());
        let connection = supervisor.state();
        let (signal, shutdown) = shutdown_channel();
        let supervisor = tokio::spawn(supervisor.run(shutdown));
        info!("🚀️ Tip engine started with {} settlement sinks", sinks.len());
        Ok(Self { api, store, signal: Arc::new(signal), connection, supervisor, sweeper, sinks })
    }

    pub fn api(&self) -> &TipApi<B> {
        &self.api
    }

    pub fn tip_store(&self) -> &SqliteTipStore {
        &self.store
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    /// Triggering this signal stops the server gracefully.
    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        Arc::clone(&self.signal)
    }

    /// Waits for the server to stop, then lets queued notifications finish and closes the database.
    pub async fn wait(self) -> Result<(), ServerError> {
        let outcome = self.supervisor.await;
        self.sweeper.abort();
        // The sink queues close once the last dispatcher is gone
        drop(self.api);
        for handle in self.sinks {
            if tokio::time::timeout(SINK_DRAIN_TIMEOUT, handle).await.is_err() {
                warn!("🚀️ Gave up waiting for queued settlements to be handled");
            }
        }
        self.store.close().await;
        match outcome {
            Ok(Ok(())) => {
                info!("🚀️ Tip server stopped");
                Ok(())
            },
            Ok(Err(e)) => {
                error!("🚀️ {e}");
                Err(e.into())
            },
            Err(e) => Err(ServerError::Fatal(format!("The connection supervisor crashed. {e}"))),
        }
    }
}

fn max_connections(url: &str) -> u32 {
    // Every connection to an in-memory database gets a database of its own
    if url.contains(":memory:") {
        1
    } else {
        DB_MAX_CONNECTIONS
    }
}

/// sqlite creates missing database files, but not missing directories.
fn prepare_database_dir(url: &str) -> Result<(), ServerError> {
    let Some(path) = url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or_default();
    match Path::new(path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.exists() => {
            info!("🚀️ Creating database directory {}", dir.display());
            std::fs::create_dir_all(dir).map_err(|e| {
                ServerError::InitializeError(format!("Could not create the database directory {}. {e}", dir.display()))
            })
        },
        _ => Ok(()),
    }
}

async fn shutdown_requested() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("🚀️ Could not listen for Ctrl-C. {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                warn!("🚀️ Could not listen for SIGTERM. {e}");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod test {
    use tip_common::Satoshis;
    use tip_engine::{
        test_utils::{init_logging, SimulatedBackend},
        MailConfig,
        SmtpConfig,
    };

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn memory_config(reconnect_interval: u64) -> ServerConfig {
        ServerConfig { database_url: "sqlite::memory:".into(), tip_expiry: 60, reconnect_interval, ..Default::default() }
    }

    #[tokio::test]
    async fn unreachable_backend_without_reconnect_is_fatal() {
        init_logging();
        let backend = Arc::new(SimulatedBackend::unreachable());
        let server = TipServer::start_with_backend(&memory_config(0), backend).await.unwrap();
        let err = tokio::time::timeout(WAIT, server.wait()).await.unwrap().unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn settled_tips_are_stored_and_shutdown_is_clean() {
        init_logging();
        let backend = Arc::new(SimulatedBackend::new());
        let server = TipServer::start_with_backend(&memory_config(1), Arc::clone(&backend)).await.unwrap();
        assert!(backend.wait_for_subscriptions(1).await);
        let mut state = server.connection_state();
        tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Subscribed)).await.unwrap().unwrap();

        let tip = server.api().create_invoice(Satoshis::from(1000), Some("cheers".into())).await.unwrap();
        assert!(backend.push_settlement(&tip.payment_hash));
        let stored = tokio::time::timeout(WAIT, async {
            loop {
                let tips = server.tip_store().fetch_tips().await.unwrap();
                if !tips.is_empty() {
                    break tips;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].amount, Satoshis::from(1000));
        assert_eq!(stored[0].message.as_deref(), Some("cheers"));
        assert!(server.api().is_settled(&tip.payment_hash));

        server.shutdown_signal().trigger();
        assert!(tokio::time::timeout(WAIT, server.wait()).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn bad_smtp_settings_stop_startup() {
        init_logging();
        let mail = MailConfig::new("me@example.com").with_smtp(SmtpConfig::new("smtp.example.com"));
        let config = ServerConfig { mail: Some(mail), ..memory_config(0) };
        let err = TipServer::start_with_backend(&config, Arc::new(SimulatedBackend::new())).await.err().unwrap();
        assert!(matches!(err, ServerError::ConfigurationError(m) if m.contains("has no port")));
    }

    #[test]
    fn database_directories_are_created() {
        let dir = std::env::temp_dir().join(format!("tip_server_test_{}", std::process::id()));
        let url = format!("sqlite://{}/nested/tips.db?mode=rwc", dir.display());
        prepare_database_dir(&url).unwrap();
        assert!(dir.join("nested").is_dir());
        let _ = std::fs::remove_dir_all(&dir);
        prepare_database_dir("sqlite::memory:").unwrap();
        prepare_database_dir("sqlite://tips.db").unwrap();
    }
}
