//! Settlement sinks
//!
//! A sink is an external consumer of settlement events. Each sink runs behind its own event queue (see
//! [`crate::events::EventHooks::with_sink`]), so sinks are independent of each other and of the dispatcher.
pub mod mail;
pub mod smtp;

use async_trait::async_trait;
use thiserror::Error;

use crate::events::SettlementEvent;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Could not store the settled tip. {0}")]
    Storage(String),
    #[error("Could not send the settlement notification. {0}")]
    Notification(String),
    #[error("The sink is misconfigured. {0}")]
    Configuration(String),
}

#[async_trait]
pub trait SettlementSink: Send + Sync + 'static {
    /// Used to label the sink's event queue and its log messages
    fn name(&self) -> &str;

    /// Errors are terminal for this call only. The event is not retried.
    async fn accept(&self, event: &SettlementEvent) -> Result<(), SinkError>;
}
