//! The tip API
//!
//! [`TipApi`] is the entry point for whatever front end hands out invoices (an HTTP layer, typically). It issues
//! invoices through the backend, tracks them until they settle or expire, and answers settlement checks.
use std::{fmt::Debug, sync::Arc};

use chrono::{Duration, Utc};
use log::*;
use thiserror::Error;
use tip_common::Satoshis;
use tokio::sync::broadcast;

use crate::{
    backend::{Backend, BackendError},
    db_types::{PaymentHash, PendingInvoice},
    dispatcher::SettlementDispatcher,
    events::SettlementEvent,
    registry::{PendingInvoiceRegistry, RegistryError},
};

#[derive(Debug, Clone, Error)]
pub enum TipApiError {
    #[error("Tip amounts must be positive. Got {0}")]
    InvalidAmount(Satoshis),
    #[error("The backend could not issue an invoice. {0}")]
    Backend(#[from] BackendError),
    #[error("The invoice could not be tracked. {0}")]
    Registry(#[from] RegistryError),
}

pub struct TipApi<B> {
    backend: Arc<B>,
    registry: PendingInvoiceRegistry,
    dispatcher: SettlementDispatcher,
    tip_expiry_secs: u64,
}

impl<B> Clone for TipApi<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
            tip_expiry_secs: self.tip_expiry_secs,
        }
    }
}

impl<B> Debug for TipApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TipApi ({} pending, expiry {}s)", self.registry.len(), self.tip_expiry_secs)
    }
}

impl<B: Backend> TipApi<B> {
    pub fn new(
        backend: Arc<B>,
        registry: PendingInvoiceRegistry,
        dispatcher: SettlementDispatcher,
        tip_expiry_secs: u64,
    ) -> Self {
        Self { backend, registry, dispatcher, tip_expiry_secs }
    }

    /// Issues an invoice for a tip of `amount` and starts tracking it.
    ///
    /// The message, trimmed, becomes the invoice description. A blank message is treated as no message.
    pub async fn create_invoice(&self, amount: Satoshis, message: Option<String>) -> Result<PendingInvoice, TipApiError> {
        if !amount.is_positive() {
            return Err(TipApiError::InvalidAmount(amount));
        }
        let message = message.map(|m| m.trim().to_string()).filter(|m| !m.is_empty());
        let description = message.as_deref().unwrap_or_default();
        let issued = self.backend.create_invoice(description, amount, self.tip_expiry_secs).await?;
        let expiry = Duration::seconds(i64::try_from(self.tip_expiry_secs).unwrap_or(i64::MAX));
        let invoice = PendingInvoice::new(issued, amount, message, Utc::now(), expiry);
        self.registry.add(invoice.clone())?;
        debug!("🧾️ Issued invoice {} for {}", invoice.payment_hash, invoice.amount);
        Ok(invoice)
    }

    /// True once the invoice is no longer pending.
    ///
    /// Expired and unknown invoices also report as settled. Callers that need to tell these apart must keep their own
    /// record of what they issued and when.
    pub fn is_settled(&self, payment_hash: &PaymentHash) -> bool {
        !self.registry.contains(payment_hash)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettlementEvent> {
        self.dispatcher.subscribe()
    }

    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }
}
