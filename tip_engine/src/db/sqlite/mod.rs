mod errors;
mod tips;

use std::{fmt::Debug, str::FromStr};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
pub use errors::SqliteTipStoreError;
use log::*;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tip_common::Satoshis;

use crate::{
    db_types::Tip,
    events::SettlementEvent,
    sinks::{SettlementSink, SinkError},
};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/tips.db";

/// Append-only storage for settled tips.
#[derive(Clone)]
pub struct SqliteTipStore {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteTipStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SqliteTipStore ({})", self.url)
    }
}

impl SqliteTipStore {
    /// Opens (creating it if necessary) the database at `url` and brings the schema up to date.
    ///
    /// In-memory databases (`sqlite::memory:`) only survive while their connection does, so use a single connection
    /// for those.
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, SqliteTipStoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| SqliteTipStoreError::InvalidUrl(format!("{url}: {e}")))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(max_connections.max(1)).connect_with(options).await?;
        sqlx::migrate!("./src/db/sqlite/migrations").run(&pool).await?;
        info!("🗃️ Tip database ready at {url}");
        Ok(Self { url: url.to_string(), pool })
    }

    /// Appends one settled tip and returns its row id.
    pub async fn append_tip(
        &self,
        timestamp: DateTime<Utc>,
        amount: Satoshis,
        message: Option<&str>,
    ) -> Result<i64, SqliteTipStoreError> {
        let mut conn = self.pool.acquire().await?;
        let id = tips::insert_tip(timestamp, amount, message, &mut conn).await?;
        debug!("🗃️ Stored tip #{id} of {amount}");
        Ok(id)
    }

    /// All stored tips, newest first.
    pub async fn fetch_tips(&self) -> Result<Vec<Tip>, SqliteTipStoreError> {
        let mut conn = self.pool.acquire().await?;
        tips::fetch_tips(&mut conn).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SettlementSink for SqliteTipStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn accept(&self, event: &SettlementEvent) -> Result<(), SinkError> {
        self.append_tip(event.timestamp, event.amount, event.message.as_deref())
            .await
            .map(|_| ())
            .map_err(|e| SinkError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;

    async fn memory_store() -> SqliteTipStore {
        let _ = env_logger::try_init();
        SqliteTipStore::new_with_url("sqlite::memory:", 1).await.expect("Error creating in-memory tip store")
    }

    #[tokio::test]
    async fn append_and_fetch() {
        let store = memory_store().await;
        let t0 = Utc::now();
        let first = store.append_tip(t0, Satoshis::from(1000), Some("great post")).await.unwrap();
        let second = store.append_tip(t0 + Duration::seconds(5), Satoshis::from(21), None).await.unwrap();
        assert!(second > first);
        let tips = store.fetch_tips().await.unwrap();
        assert_eq!(tips.len(), 2);
        assert_eq!(tips[0].amount, Satoshis::from(21));
        assert_eq!(tips[0].message, None);
        assert_eq!(tips[1].amount, Satoshis::from(1000));
        assert_eq!(tips[1].message.as_deref(), Some("great post"));
        assert_eq!(tips[1].created_at.timestamp(), t0.timestamp());
    }

    #[tokio::test]
    async fn closed_store_reports_storage_errors() {
        let store = memory_store().await;
        store.close().await;
        let event = SettlementEvent {
            payment_hash: crate::PaymentHash::from([3; 32]),
            invoice: "lnbcrt3".into(),
            amount: Satoshis::from(3),
            message: None,
            timestamp: Utc::now(),
        };
        let err = store.accept(&event).await.unwrap_err();
        assert!(matches!(err, SinkError::Storage(_)));
    }
}
