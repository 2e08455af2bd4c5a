//! # Lightning tip server
//! This crate hosts the process around the tip engine. It is responsible for:
//! Reading the configuration from the environment.
//! Opening the tip database and configuring the settlement sinks (storage, and optionally mail).
//! Connecting to LND and keeping the settlement subscription alive.
//! Shutting down cleanly on Ctrl-C, or with an error when LND is lost and reconnecting is disabled.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
pub mod cli;
pub mod config;
pub mod errors;
pub mod server;
