//! The payment backend contract
//!
//! A [`Backend`] is a capability interface over an external Lightning node: connect, issue invoices, look up whether
//! an invoice has been settled, hold open a live settlement stream, and ping an idle connection. [`lnd::LndBackend`]
//! is the implementation that ships with the engine; tests use the simulated backend in `test_utils`.
pub mod lnd;

use async_trait::async_trait;
use thiserror::Error;
use tip_common::Satoshis;

use crate::db_types::{NewInvoice, PaymentHash};

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Could not connect to the backend. {0}")]
    Connection(String),
    #[error("The backend session has not been established. Call connect first.")]
    NotConnected,
    #[error("The backend rejected the request with status {status}. {message}")]
    Rpc { status: u16, message: String },
    #[error("Could not decode the backend response. {0}")]
    Decode(String),
    #[error("The settlement stream ended. {0}")]
    StreamTerminated(String),
    #[error("Invalid backend configuration. {0}")]
    Configuration(String),
}

/// Receives the output of [`Backend::subscribe_settlements`].
///
/// Backends must call [`SettlementListener::on_resubscribed`] exactly once per stream, as soon as the stream is
/// established and before any event from that stream is passed to [`SettlementListener::on_settled`]. Settlement
/// events are delivered in stream order, one at a time.
#[async_trait]
pub trait SettlementListener: Send + Sync {
    async fn on_resubscribed(&self);

    async fn on_settled(&self, payment_hash: PaymentHash);
}

#[async_trait]
pub trait Backend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Establish a session with the backend. This is never retried internally; that is the supervisor's job.
    async fn connect(&self) -> Result<(), BackendError>;

    /// Issue a new invoice. `amount` and `expiry_secs` have been validated as positive by the caller. The returned
    /// payment hash is unique.
    async fn create_invoice(
        &self,
        description: &str,
        amount: Satoshis,
        expiry_secs: u64,
    ) -> Result<NewInvoice, BackendError>;

    async fn check_settled(&self, payment_hash: &PaymentHash) -> Result<bool, BackendError>;

    /// Open a live settlement stream and feed it to `listener` until the stream ends.
    ///
    /// This only returns when the stream is over, and it always returns the reason, even for a clean end of stream.
    async fn subscribe_settlements(&self, listener: &dyn SettlementListener) -> BackendError;

    /// A no-op request that keeps an idle connection open. Failures are informational only.
    async fn keep_alive(&self) -> Result<(), BackendError>;
}
