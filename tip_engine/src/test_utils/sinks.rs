use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::watch;

use super::wait_for_count;
use crate::{
    events::SettlementEvent,
    sinks::{SettlementSink, SinkError},
};

/// Keeps every event it is given.
pub struct RecordingSink {
    name: String,
    events: Mutex<Vec<SettlementEvent>>,
    count: watch::Sender<usize>,
}

impl RecordingSink {
    pub fn new(name: &str) -> Self {
        let (count, _) = watch::channel(0);
        Self { name: name.to_string(), events: Mutex::new(Vec::new()), count }
    }

    pub fn events(&self) -> Vec<SettlementEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub async fn wait_for_events(&self, n: usize) -> bool {
        wait_for_count(&self.count, n).await
    }
}

#[async_trait]
impl SettlementSink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn accept(&self, event: &SettlementEvent) -> Result<(), SinkError> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        self.count.send_modify(|c| *c += 1);
        Ok(())
    }
}

/// Rejects every event, counting the attempts.
pub struct FailingSink {
    name: String,
    attempts: watch::Sender<usize>,
}

impl FailingSink {
    pub fn new(name: &str) -> Self {
        let (attempts, _) = watch::channel(0);
        Self { name: name.to_string(), attempts }
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.borrow()
    }

    pub async fn wait_for_attempts(&self, n: usize) -> bool {
        wait_for_count(&self.attempts, n).await
    }
}

#[async_trait]
impl SettlementSink for FailingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn accept(&self, _event: &SettlementEvent) -> Result<(), SinkError> {
        self.attempts.send_modify(|c| *c += 1);
        Err(SinkError::Storage(format!("{} is out of order", self.name)))
    }
}
