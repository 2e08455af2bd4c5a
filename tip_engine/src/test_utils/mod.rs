//! Test doubles for the engine: a scriptable in-process backend and recording sinks.
mod simulated_backend;
mod sinks;

use std::time::Duration;

pub use simulated_backend::SimulatedBackend;
pub use sinks::{FailingSink, RecordingSink};
use tokio::sync::watch;

/// How long the `wait_for_*` helpers wait before giving up.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let _ = env_logger::try_init();
}

/// Waits until the counter reaches `n`. Returns false on timeout.
async fn wait_for_count(counter: &watch::Sender<usize>, n: usize) -> bool {
    let mut rx = counter.subscribe();
    let reached = matches!(tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(|c| *c >= n)).await, Ok(Ok(_)));
    reached
}
