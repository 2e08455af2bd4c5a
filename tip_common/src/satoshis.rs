use std::{fmt::Display, iter::Sum, ops::Add};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

//--------------------------------------      Satoshis       ---------------------------------------------------------
/// An amount in the smallest on-chain bitcoin unit. Invoice amounts are always whole satoshis.
#[derive(Debug, Clone, Copy, Default, Type, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct Satoshis(i64);

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented in satoshis: {0}")]
pub struct SatoshisConversionError(String);

impl From<i64> for Satoshis {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl TryFrom<u64> for Satoshis {
    type Error = SatoshisConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        i64::try_from(value)
            .map(Self)
            .map_err(|_| SatoshisConversionError(format!("{value} is too large to fit in a signed 64-bit amount")))
    }
}

impl Add for Satoshis {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sum for Satoshis {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl Display for Satoshis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} sat", self.0)
    }
}

impl Satoshis {
    pub fn value(&self) -> i64 {
        self.0
    }

    /// Invoices can only be issued for strictly positive amounts.
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}
