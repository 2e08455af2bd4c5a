//! Lightning Tip Engine
//!
//! This library tracks the invoices a tip server hands out and turns backend settlements into exactly-once
//! notifications. It is backend-agnostic: anything implementing [`Backend`] can feed it.
//!
//! The moving parts are:
//! 1. The [`PendingInvoiceRegistry`], an in-memory table of outstanding invoices keyed by payment hash. It is the only
//!    shared mutable state in the engine.
//! 2. The [`SettlementDispatcher`], which atomically removes a settled invoice from the registry and, only if it was
//!    still there, fans a [`SettlementEvent`] out to live subscribers and to every configured
//!    [`SettlementSink`] (sqlite storage, mail notifications by command or SMTP).
//! 3. The [`ConnectionSupervisor`], which keeps a settlement subscription open against the backend, reconnects when it
//!    drops, and rescans pending invoices after every (re)connect to catch settlements missed while disconnected.
//! 4. The expiry sweeper ([`start_expiry_sweeper`]), which evicts invoices nobody paid.
//!
//! [`TipApi`] is the facade an HTTP layer uses to issue invoices and query their status.
mod db;

pub mod backend;
pub mod db_types;
pub mod dispatcher;
pub mod events;
pub mod registry;
pub mod sinks;
pub mod supervisor;
pub mod sweeper;
mod tip_api;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;


pub use backend::{
    lnd::{LndBackend, LndConfig, DEFAULT_LND_REST_HOST},
    Backend,
    BackendError,
    SettlementListener,
};
pub use db::sqlite::{SqliteTipStore, SqliteTipStoreError, DEFAULT_DATABASE_URL};
pub use db_types::{NewInvoice, PaymentHash, PaymentHashParseError, PendingInvoice, Tip};
pub use dispatcher::SettlementDispatcher;
pub use events::SettlementEvent;
pub use registry::{PendingInvoiceRegistry, RegistryError};
pub use sinks::{
    mail::{MailConfig, MailNotifier, DEFAULT_MAIL_COMMAND},
    smtp::{SmtpConfig, SmtpNotifier},
    SettlementSink,
    SinkError,
};
pub use supervisor::{
    shutdown_channel,
    ConnectionState,
    ConnectionSupervisor,
    RescanSummary,
    Shutdown,
    ShutdownSignal,
    SupervisorConfig,
    SupervisorError,
};
pub use sweeper::start_expiry_sweeper;
pub use tip_api::{TipApi, TipApiError};
