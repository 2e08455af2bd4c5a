//! Idempotent settlement fan-out
//!
//! The dispatcher is the only component that removes invoices from the registry because they were paid. The removal is
//! also the deduplication point: the push stream, a rescan after reconnect and a replayed event can all report the
//! same settlement, but only the caller whose `remove_if_present` actually removed the entry dispatches it.
use chrono::Utc;
use log::*;
use tokio::sync::broadcast;

use crate::{
    db_types::PaymentHash,
    events::{EventProducers, SettlementEvent},
    registry::PendingInvoiceRegistry,
};

const DEFAULT_LIVE_CHANNEL_CAPACITY: usize = 100;

#[derive(Clone)]
pub struct SettlementDispatcher {
    registry: PendingInvoiceRegistry,
    live: broadcast::Sender<SettlementEvent>,
    producers: EventProducers,
}

impl SettlementDispatcher {
    pub fn new(registry: PendingInvoiceRegistry, producers: EventProducers) -> Self {
        let (live, _) = broadcast::channel(DEFAULT_LIVE_CHANNEL_CAPACITY);
        Self { registry, live, producers }
    }

    /// A live feed of settlements. Only settlements dispatched after this call are received.
    pub fn subscribe(&self) -> broadcast::Receiver<SettlementEvent> {
        self.live.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.live.receiver_count()
    }

    /// Dispatch the settlement of `payment_hash`, if it is still pending.
    ///
    /// Returns the dispatched event, or `None` if the invoice was already handled (or never tracked). Sinks receive the
    /// event through their own queues, so this never waits on storage or notifications and their failures cannot reach
    /// the registry.
    pub async fn publish(&self, payment_hash: &PaymentHash) -> Option<SettlementEvent> {
        let Some(settled) = self.registry.remove_if_present(payment_hash) else {
            trace!("📬️ Settlement of {payment_hash} has already been handled, or it is not one of ours. Ignoring.");
            return None;
        };
        let event = SettlementEvent::new(settled, Utc::now());
        info!("📬️ Invoice {} for {} has been settled", event.payment_hash, event.amount);
        match self.live.send(event.clone()) {
            Ok(n) => debug!("📬️ Settlement of {payment_hash} sent to {n} live subscribers"),
            Err(_) => trace!("📬️ No live subscribers for settlement of {payment_hash}"),
        }
        let queued = self.producers.publish_settlement(&event);
        let sinks = self.producers.settlement_producers.len();
        if queued < sinks {
            warn!("📬️ Settlement of {payment_hash} reached only {queued} of {sinks} sinks");
        }
        Some(event)
    }
}
