use chrono::{DateTime, Utc};
use serde::Serialize;
use tip_common::Satoshis;

use crate::db_types::{PaymentHash, PendingInvoice};

/// Emitted exactly once for every pending invoice that gets settled. It is handed to live subscribers and to every
/// settlement sink, and is never retained by the engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementEvent {
    pub payment_hash: PaymentHash,
    pub invoice: String,
    pub amount: Satoshis,
    pub message: Option<String>,
    /// When the engine observed the settlement
    pub timestamp: DateTime<Utc>,
}

impl SettlementEvent {
    pub fn new(settled: PendingInvoice, timestamp: DateTime<Utc>) -> Self {
        Self {
            payment_hash: settled.payment_hash,
            invoice: settled.invoice,
            amount: settled.amount,
            message: settled.message,
            timestamp,
        }
    }
}
