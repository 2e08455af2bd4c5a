use std::{sync::Arc, time::Duration};

use log::*;
use tokio::task::JoinHandle;

use crate::backend::Backend;

/// Starts the keepalive ticker. It pings the backend once per `interval`, starting one interval from now.
///
/// A failed ping is only logged; reconnecting is the supervisor's decision, based on the settlement stream alone. Abort
/// the returned handle to stop the ticker.
pub fn start_keepalive<B: Backend + ?Sized>(backend: Arc<B>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.tick().await;
        info!("🔌️ Keepalive started. Pinging {} every {}s", backend.name(), interval.as_secs_f32());
        loop {
            timer.tick().await;
            match backend.keep_alive().await {
                Ok(()) => trace!("🔌️ Keepalive ok"),
                Err(e) => warn!("🔌️ Keepalive request to {} failed. {e}", backend.name()),
            }
        }
    })
}
