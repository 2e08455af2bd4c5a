//! A single-consumer event queue
//!
//! Each [`EventHandler`] owns one async handler and an unbounded queue feeding it. Producers push events with
//! [`EventProducer::publish_event`], which never waits and never drops an event while the handler is running. Events
//! are handled one at a time, in the order they were published, so a slow handler only ever delays itself.
use std::{future::Future, pin::Pin, sync::Arc};

use log::*;
use tokio::sync::mpsc;

pub type Handler<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct EventHandler<E: Send + 'static> {
    name: String,
    listener: mpsc::UnboundedReceiver<E>,
    sender: mpsc::UnboundedSender<E>,
    handler: Handler<E>,
}

impl<E: Send + 'static> EventHandler<E> {
    pub fn new(name: &str, handler: Handler<E>) -> Self {
        let (sender, listener) = mpsc::unbounded_channel();
        Self { name: name.to_string(), listener, sender, handler }
    }

    pub fn subscribe(&self) -> EventProducer<E> {
        EventProducer { name: self.name.clone(), sender: self.sender.clone() }
    }

    /// Runs until every producer has been dropped and the queue is drained.
    pub async fn start_handler(self) {
        let Self { name, mut listener, sender, handler } = self;
        // Only producers keep the queue open, so the handler winds down once the last one is gone
        drop(sender);
        debug!("📬️ Starting '{name}' event handler");
        let mut handled = 0u64;
        while let Some(event) = listener.recv().await {
            (handler)(event).await;
            handled += 1;
            trace!("📬️ '{name}' handled event #{handled}");
        }
        debug!("📬️ '{name}' event handler has shut down after {handled} events");
    }
}

#[derive(Clone)]
pub struct EventProducer<E> {
    name: String,
    sender: mpsc::UnboundedSender<E>,
}

impl<E> EventProducer<E> {
    /// Queue `event` for the handler. Returns false only if the handler is no longer running.
    pub fn publish_event(&self, event: E) -> bool {
        if self.sender.send(event).is_err() {
            error!("📬️ The '{}' event handler is no longer running. The event has been dropped.", self.name);
            return false;
        }
        true
    }
}
