use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqliteTipStoreError {
    #[error("Database connection error: {0}")]
    DriverError(#[from] sqlx::Error),
    #[error("Could not run database migrations: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
    #[error("Invalid database url: {0}")]
    InvalidUrl(String),
}
