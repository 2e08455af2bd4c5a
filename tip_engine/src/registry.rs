//! The pending invoice registry
//!
//! All outstanding invoices live in a single `HashMap` keyed by payment hash, behind one `std::sync::Mutex`. Every
//! operation holds the lock for exactly one map operation (or one clone, for [`PendingInvoiceRegistry::snapshot`]) and
//! the lock is never held across an `.await`, so a blocking mutex is the right tool here.
//!
//! Snapshot-then-act callers (the rescan pass and the expiry sweeper) must not trust the snapshot: they act through
//! [`PendingInvoiceRegistry::remove_if_present`], which re-validates presence atomically.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use log::*;
use thiserror::Error;

use crate::db_types::{PaymentHash, PendingInvoice};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("An invoice with payment hash {0} is already pending")]
    DuplicateInvoice(PaymentHash),
}

#[derive(Clone, Default)]
pub struct PendingInvoiceRegistry {
    invoices: Arc<Mutex<HashMap<PaymentHash, PendingInvoice>>>,
}

impl PendingInvoiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PaymentHash, PendingInvoice>> {
        // No operation can leave the map half-updated, so a poisoned lock is still safe to use.
        self.invoices.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start tracking a newly issued invoice.
    ///
    /// The backend guarantees payment hashes are unique, so a duplicate here means something upstream is broken. The
    /// existing entry is left untouched and an error is returned.
    pub fn add(&self, invoice: PendingInvoice) -> Result<(), RegistryError> {
        let mut invoices = self.lock();
        if invoices.contains_key(&invoice.payment_hash) {
            error!("🧾️ Refusing to register duplicate invoice {}. The backend issued the same hash twice.", invoice.payment_hash);
            return Err(RegistryError::DuplicateInvoice(invoice.payment_hash));
        }
        trace!("🧾️ Registering invoice {} for {}", invoice.payment_hash, invoice.amount);
        invoices.insert(invoice.payment_hash.clone(), invoice);
        Ok(())
    }

    /// Atomically remove and return the entry for `payment_hash`. Calling this again for the same hash is a no-op that
    /// returns `None`.
    pub fn remove_if_present(&self, payment_hash: &PaymentHash) -> Option<PendingInvoice> {
        self.lock().remove(payment_hash)
    }

    /// A point-in-time copy of all pending invoices. The lock is released before this returns.
    pub fn snapshot(&self) -> Vec<PendingInvoice> {
        self.lock().values().cloned().collect()
    }

    pub fn contains(&self, payment_hash: &PaymentHash) -> bool {
        self.lock().contains_key(payment_hash)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod test {
    use chrono::{Duration, Utc};
    use tip_common::Satoshis;

    use super::*;
    use crate::db_types::NewInvoice;

    fn invoice(n: u8) -> PendingInvoice {
        let issued = NewInvoice { invoice: format!("lnbcrt{n}"), payment_hash: PaymentHash::from([n; 32]) };
        PendingInvoice::new(issued, Satoshis::from(100 * i64::from(n)), None, Utc::now(), Duration::seconds(60))
    }

    #[test]
    fn add_then_remove_once() {
        let registry = PendingInvoiceRegistry::new();
        registry.add(invoice(1)).unwrap();
        assert!(registry.contains(&PaymentHash::from([1; 32])));
        let removed = registry.remove_if_present(&PaymentHash::from([1; 32]));
        assert_eq!(removed.map(|i| i.invoice), Some("lnbcrt1".to_string()));
        assert!(registry.remove_if_present(&PaymentHash::from([1; 32])).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicates_are_rejected() {
        let registry = PendingInvoiceRegistry::new();
        registry.add(invoice(7)).unwrap();
        let mut dup = invoice(7);
        dup.invoice = "something else".into();
        let err = registry.add(dup).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateInvoice(PaymentHash::from([7; 32])));
        let kept = registry.snapshot();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].invoice, "lnbcrt7");
    }

    #[test]
    fn snapshot_is_detached() {
        let registry = PendingInvoiceRegistry::new();
        for n in 1..=3 {
            registry.add(invoice(n)).unwrap();
        }
        let snapshot = registry.snapshot();
        registry.remove_if_present(&PaymentHash::from([2; 32]));
        assert_eq!(snapshot.len(), 3);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn concurrent_removal_yields_a_single_winner() {
        let registry = PendingInvoiceRegistry::new();
        registry.add(invoice(9)).unwrap();
        let hash = PaymentHash::from([9; 32]);
        let winners = std::thread::scope(|s| {
            let handles = (0..8)
                .map(|_| {
                    let registry = registry.clone();
                    let hash = hash.clone();
                    s.spawn(move || registry.remove_if_present(&hash).is_some())
                })
                .collect::<Vec<_>>();
            handles.into_iter().map(|h| h.join().unwrap_or(false)).filter(|won| *won).count()
        });
        assert_eq!(winners, 1);
    }
}
