use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tip_common::Satoshis;

use crate::{db::sqlite::SqliteTipStoreError, db_types::Tip};

pub async fn insert_tip(
    timestamp: DateTime<Utc>,
    amount: Satoshis,
    message: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<i64, SqliteTipStoreError> {
    let id: i64 = sqlx::query_scalar("INSERT INTO tips (created_at, amount, message) VALUES ($1, $2, $3) RETURNING id")
        .bind(timestamp)
        .bind(amount)
        .bind(message)
        .fetch_one(conn)
        .await?;
    Ok(id)
}

pub async fn fetch_tips(conn: &mut SqliteConnection) -> Result<Vec<Tip>, SqliteTipStoreError> {
    let tips = sqlx::query_as("SELECT id, created_at, amount, message FROM tips ORDER BY created_at DESC, id DESC")
        .fetch_all(conn)
        .await?;
    Ok(tips)
}
