use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Serializer};
use sqlx::FromRow;
use thiserror::Error;
pub use tip_common::Satoshis;

//--------------------------------------     PaymentHash     ---------------------------------------------------------
/// The backend-assigned identifier of an invoice. The backend guarantees uniqueness, so this is the key used to
/// deduplicate settlements.
///
/// It is displayed (and parsed) as lowercase hex.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaymentHash(Vec<u8>);

#[derive(Debug, Clone, Error)]
#[error("Invalid payment hash: {0}")]
pub struct PaymentHashParseError(String);

impl PaymentHash {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl From<Vec<u8>> for PaymentHash {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<[u8; 32]> for PaymentHash {
    fn from(value: [u8; 32]) -> Self {
        Self(value.to_vec())
    }
}

impl FromStr for PaymentHash {
    type Err = PaymentHashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|e| PaymentHashParseError(format!("{s}: {e}")))?;
        if bytes.is_empty() {
            return Err(PaymentHashParseError("empty hash".into()));
        }
        Ok(Self(bytes))
    }
}

impl Display for PaymentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for PaymentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

//--------------------------------------     NewInvoice      ---------------------------------------------------------
/// What the backend hands back when it issues an invoice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewInvoice {
    /// The opaque payment request to give to the payer.
    pub invoice: String,
    pub payment_hash: PaymentHash,
}

//--------------------------------------   PendingInvoice    ---------------------------------------------------------
/// An invoice that has been issued but is neither settled nor expired.
///
/// Entries are never updated in place. They live in the registry until exactly one of settlement or expiry removes
/// them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingInvoice {
    pub invoice: String,
    pub payment_hash: PaymentHash,
    pub amount: Satoshis,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingInvoice {
    pub fn new(
        issued: NewInvoice,
        amount: Satoshis,
        message: Option<String>,
        created_at: DateTime<Utc>,
        expiry: Duration,
    ) -> Self {
        Self {
            invoice: issued.invoice,
            payment_hash: issued.payment_hash,
            amount,
            message,
            created_at,
            expires_at: created_at + expiry,
        }
    }

    /// True once `now` has reached `expires_at + grace`. Before that point the entry must stay in the registry so that a
    /// late settlement can still be matched against it.
    pub fn is_evictable(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        now >= self.expires_at + grace
    }
}

//--------------------------------------         Tip         ---------------------------------------------------------
/// A settled tip, as stored by the sqlite storage sink.
#[derive(Clone, Debug, PartialEq, Eq, FromRow)]
pub struct Tip {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub amount: Satoshis,
    pub message: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn payment_hash_hex_round_trip() {
        let hash = PaymentHash::from([0xab; 32]);
        let s = hash.to_string();
        assert_eq!(s.len(), 64);
        assert!(s.starts_with("abab"));
        assert_eq!(s.parse::<PaymentHash>().unwrap(), hash);
    }

    #[test]
    fn payment_hash_rejects_garbage() {
        assert!("not-hex".parse::<PaymentHash>().is_err());
        assert!("".parse::<PaymentHash>().is_err());
    }

    #[test]
    fn eviction_deadline_includes_grace() {
        let t0 = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let issued = NewInvoice { invoice: "lnbc1".into(), payment_hash: PaymentHash::from(vec![1, 2, 3]) };
        let invoice = PendingInvoice::new(issued, Satoshis::from(1000), None, t0, Duration::seconds(60));
        assert_eq!(invoice.expires_at, t0 + Duration::seconds(60));
        let grace = Duration::seconds(10);
        assert!(!invoice.is_evictable(t0 + Duration::seconds(60), grace));
        assert!(!invoice.is_evictable(t0 + Duration::seconds(69), grace));
        assert!(invoice.is_evictable(t0 + Duration::seconds(70), grace));
    }
}
