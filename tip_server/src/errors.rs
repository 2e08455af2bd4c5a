use thiserror::Error;
use tip_engine::{BackendError, SinkError, SqliteTipStoreError, SupervisorError};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("The server cannot continue. {0}")]
    Fatal(String),
}

impl ServerError {
    /// Fatal errors end the process with a non-zero exit status.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<SupervisorError> for ServerError {
    fn from(e: SupervisorError) -> Self {
        Self::Fatal(e.to_string())
    }
}

impl From<SqliteTipStoreError> for ServerError {
    fn from(e: SqliteTipStoreError) -> Self {
        Self::InitializeError(format!("Could not open the tip database. {e}"))
    }
}

impl From<BackendError> for ServerError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Configuration(s) => Self::ConfigurationError(s),
            e => Self::BackendError(e.to_string()),
        }
    }
}

impl From<SinkError> for ServerError {
    fn from(e: SinkError) -> Self {
        match e {
            SinkError::Configuration(s) => Self::ConfigurationError(s),
            e => Self::InitializeError(e.to_string()),
        }
    }
}
