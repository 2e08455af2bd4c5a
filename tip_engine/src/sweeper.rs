use chrono::{DateTime, Duration, Utc};
use log::*;
use tokio::task::JoinHandle;

use crate::{db_types::PendingInvoice, registry::PendingInvoiceRegistry};

/// How long past its expiry an invoice is kept around. A settlement check made right at the expiry boundary must still
/// find a just-settled invoice rather than racing its eviction.
pub const EXPIRY_GRACE_SECS: u64 = 10;

pub fn expiry_grace() -> Duration {
    Duration::seconds(EXPIRY_GRACE_SECS as i64)
}

/// The sweeper runs once per tip-expiry plus the grace margin, so no entry outlives its deadline by more than one period.
pub fn sweep_period(tip_expiry_secs: u64) -> std::time::Duration {
    std::time::Duration::from_secs(tip_expiry_secs + EXPIRY_GRACE_SECS)
}

/// Evicts every invoice whose deadline (`expires_at + grace`) has passed at `now`, and returns what was evicted.
///
/// Evictions notify nobody. An entry that was settled between the snapshot and its removal is simply not returned,
/// since `remove_if_present` re-checks presence.
pub fn sweep_expired(registry: &PendingInvoiceRegistry, now: DateTime<Utc>, grace: Duration) -> Vec<PendingInvoice> {
    registry
        .snapshot()
        .into_iter()
        .filter(|invoice| invoice.is_evictable(now, grace))
        .filter_map(|invoice| registry.remove_if_present(&invoice.payment_hash))
        .collect()
}

/// Starts the expiry sweeper. Do not await the returned JoinHandle, as it will run indefinitely. Abort it to stop the
/// sweeper.
pub fn start_expiry_sweeper(registry: PendingInvoiceRegistry, tip_expiry_secs: u64) -> JoinHandle<()> {
    let period = sweep_period(tip_expiry_secs);
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(period);
        // The first tick completes immediately and there is nothing to sweep at startup
        timer.tick().await;
        info!("🕰️ Expiry sweeper started. Sweeping every {}s", period.as_secs());
        loop {
            timer.tick().await;
            let evicted = sweep_expired(&registry, Utc::now(), expiry_grace());
            if evicted.is_empty() {
                trace!("🕰️ No expired invoices. {} still pending", registry.len());
                continue;
            }
            info!("🕰️ {} unpaid invoices expired. {} still pending", evicted.len(), registry.len());
            debug!("🕰️ Expired invoices: {}", invoice_list(&evicted));
        }
    })
}

fn invoice_list(invoices: &[PendingInvoice]) -> String {
    invoices
        .iter()
        .map(|i| format!("[{}] {} expired at {}", i.payment_hash, i.amount, i.expires_at))
        .collect::<Vec<String>>()
        .join(", ")
}
