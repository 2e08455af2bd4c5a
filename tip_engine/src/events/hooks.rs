use std::{future::Future, pin::Pin, sync::Arc};

use log::*;
use tokio::task::JoinHandle;

use crate::{
    events::{EventHandler, EventProducer, Handler, SettlementEvent},
    sinks::SettlementSink,
};

/// One producer per registered settlement hook. The dispatcher publishes every settlement to all of them.
#[derive(Default, Clone)]
pub struct EventProducers {
    pub settlement_producers: Vec<EventProducer<SettlementEvent>>,
}

impl EventProducers {
    pub fn publish_settlement(&self, event: &SettlementEvent) -> usize {
        self.settlement_producers.iter().filter(|p| p.publish_event(event.clone())).count()
    }
}

pub struct EventHandlers {
    pub on_settlement: Vec<EventHandler<SettlementEvent>>,
}

impl EventHandlers {
    pub fn new(hooks: EventHooks) -> Self {
        let on_settlement = hooks.on_settlement.into_iter().map(|(name, f)| EventHandler::new(&name, f)).collect();
        Self { on_settlement }
    }

    pub fn producers(&self) -> EventProducers {
        EventProducers { settlement_producers: self.on_settlement.iter().map(|h| h.subscribe()).collect() }
    }

    /// Spawns every handler on its own task. Each task ends once all of its producers have been dropped.
    pub fn start_handlers(self) -> Vec<JoinHandle<()>> {
        self.on_settlement.into_iter().map(|handler| tokio::spawn(handler.start_handler())).collect()
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_settlement: Vec<(String, Handler<SettlementEvent>)>,
}

impl EventHooks {
    pub fn on_settlement<F>(&mut self, name: &str, f: F) -> &mut Self
    where F: (Fn(SettlementEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_settlement.push((name.to_string(), Arc::new(f)));
        self
    }

    /// Registers a [`SettlementSink`] as a settlement hook. Sink failures are logged here and go no further: they never
    /// affect the registry or any other sink.
    pub fn with_sink<S: SettlementSink>(&mut self, sink: Arc<S>) -> &mut Self {
        let name = sink.name().to_string();
        self.on_settlement(&name, move |event| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                match sink.accept(&event).await {
                    Ok(()) => debug!("📬️ '{}' accepted settlement of {}", sink.name(), event.payment_hash),
                    Err(e) => error!("📬️ '{}' failed to process settlement of {}. {e}", sink.name(), event.payment_hash),
                }
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        })
    }
}
