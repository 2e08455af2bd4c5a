use log::*;

use crate::{backend::Backend, dispatcher::SettlementDispatcher, registry::PendingInvoiceRegistry};

/// The outcome of one rescan pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RescanSummary {
    /// Invoices that were looked up
    pub checked: usize,
    /// Invoices found settled and dispatched by this pass
    pub settled: usize,
    /// Lookups that failed. These invoices stay pending until the next pass.
    pub failed: usize,
}

/// Looks up every pending invoice on the backend and dispatches the ones that were paid while the settlement stream
/// was down.
///
/// A failed lookup is logged and skipped; it never aborts the pass. An invoice that settles through another path
/// while the pass is running is dispatched only once, since the dispatcher deduplicates.
pub async fn rescan<B: Backend + ?Sized>(
    backend: &B,
    registry: &PendingInvoiceRegistry,
    dispatcher: &SettlementDispatcher,
) -> RescanSummary {
    let pending = registry.snapshot();
    let mut summary = RescanSummary::default();
    debug!("🔌️ Rescanning {} pending invoices", pending.len());
    for invoice in pending {
        summary.checked += 1;
        match backend.check_settled(&invoice.payment_hash).await {
            Ok(true) => {
                if dispatcher.publish(&invoice.payment_hash).await.is_some() {
                    summary.settled += 1;
                }
            },
            Ok(false) => {},
            Err(e) => {
                warn!("🔌️ Could not look up invoice {}. It will be checked again on the next rescan. {e}", invoice.payment_hash);
                summary.failed += 1;
            },
        }
    }
    if summary.settled > 0 || summary.failed > 0 {
        info!(
            "🔌️ Rescan complete. {} checked, {} settled while disconnected, {} lookups failed",
            summary.checked, summary.settled, summary.failed
        );
    }
    summary
}
