use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
        MutexGuard,
    },
};

use async_trait::async_trait;
use log::*;
use tip_common::Satoshis;
use tokio::sync::{mpsc, watch};

use super::wait_for_count;
use crate::{
    backend::{Backend, BackendError, SettlementListener},
    db_types::{NewInvoice, PaymentHash},
};

enum StreamCommand {
    Settle(PaymentHash),
    Terminate(String),
}

#[derive(Default)]
struct SimulatedNode {
    reachable: bool,
    failing_connects: usize,
    invoices_issued: u64,
    requests: Vec<(String, Satoshis, u64)>,
    settled: HashSet<PaymentHash>,
    failing_lookups: HashSet<PaymentHash>,
    keepalive_failing: bool,
    stream: Option<mpsc::UnboundedSender<StreamCommand>>,
}

/// An in-process Lightning node that tests drive by hand.
///
/// Settlements can be pushed down the open stream, made silently (as if they happened while disconnected), or
/// replayed. Connection failures and stream terminations are scripted.
pub struct SimulatedBackend {
    node: Mutex<SimulatedNode>,
    connect_attempts: AtomicUsize,
    keepalives: AtomicUsize,
    subscriptions: watch::Sender<usize>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackend {
    pub fn new() -> Self {
        let (subscriptions, _) = watch::channel(0);
        let node = SimulatedNode { reachable: true, ..Default::default() };
        Self { node: Mutex::new(node), connect_attempts: AtomicUsize::new(0), keepalives: AtomicUsize::new(0), subscriptions }
    }

    pub fn unreachable() -> Self {
        let backend = Self::new();
        backend.set_reachable(false);
        backend
    }

    fn node(&self) -> MutexGuard<'_, SimulatedNode> {
        self.node.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.node().reachable = reachable;
    }

    /// The next `n` connection attempts fail, even if the node is reachable.
    pub fn fail_next_connects(&self, n: usize) {
        self.node().failing_connects = n;
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// The (description, amount, expiry) of every invoice request received.
    pub fn invoice_requests(&self) -> Vec<(String, Satoshis, u64)> {
        self.node().requests.clone()
    }

    /// Marks the invoice as paid without telling the stream, as happens when a payment lands while disconnected.
    pub fn settle_offline(&self, payment_hash: &PaymentHash) {
        self.node().settled.insert(payment_hash.clone());
    }

    /// Marks the invoice as paid and announces it on the open stream. Returns false if no stream is open.
    pub fn push_settlement(&self, payment_hash: &PaymentHash) -> bool {
        self.settle_offline(payment_hash);
        self.replay(payment_hash)
    }

    /// Sends a settlement for the invoice down the open stream again, whatever its state.
    pub fn replay(&self, payment_hash: &PaymentHash) -> bool {
        self.send(StreamCommand::Settle(payment_hash.clone()))
    }

    /// Ends the open stream with the given reason.
    pub fn terminate_stream(&self, reason: &str) -> bool {
        let sent = self.send(StreamCommand::Terminate(reason.to_string()));
        self.node().stream = None;
        sent
    }

    /// Drops the open stream and refuses further connections until `set_reachable(true)`.
    pub fn disconnect(&self) {
        self.set_reachable(false);
        self.terminate_stream("The node went away");
    }

    pub fn fail_lookup(&self, payment_hash: &PaymentHash) {
        self.node().failing_lookups.insert(payment_hash.clone());
    }

    pub fn heal_lookup(&self, payment_hash: &PaymentHash) {
        self.node().failing_lookups.remove(payment_hash);
    }

    pub fn set_keepalive_failing(&self, failing: bool) {
        self.node().keepalive_failing = failing;
    }

    /// The number of keepalive requests received, successful or not.
    pub fn keepalive_count(&self) -> usize {
        self.keepalives.load(Ordering::SeqCst)
    }

    pub fn subscription_count(&self) -> usize {
        *self.subscriptions.borrow()
    }

    /// Waits until `n` streams have been opened in total, counting from when their resubscription callback returned.
    pub async fn wait_for_subscriptions(&self, n: usize) -> bool {
        wait_for_count(&self.subscriptions, n).await
    }

    fn send(&self, command: StreamCommand) -> bool {
        match &self.node().stream {
            Some(stream) => stream.send(command).is_ok(),
            None => false,
        }
    }

    fn unreachable_error() -> BackendError {
        BackendError::Connection("The simulated node is unreachable".into())
    }
}

#[async_trait]
impl Backend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated node"
    }

    async fn connect(&self) -> Result<(), BackendError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let mut node = self.node();
        if node.failing_connects > 0 {
            node.failing_connects -= 1;
            return Err(BackendError::Connection("Simulated connection failure".into()));
        }
        if !node.reachable {
            return Err(Self::unreachable_error());
        }
        Ok(())
    }

    async fn create_invoice(
        &self,
        description: &str,
        amount: Satoshis,
        expiry_secs: u64,
    ) -> Result<NewInvoice, BackendError> {
        let mut node = self.node();
        if !node.reachable {
            return Err(Self::unreachable_error());
        }
        node.invoices_issued += 1;
        let n = node.invoices_issued;
        node.requests.push((description.to_string(), amount, expiry_secs));
        let mut hash = [0u8; 32];
        hash[24..].copy_from_slice(&n.to_be_bytes());
        Ok(NewInvoice { invoice: format!("lnsim{}n1p{n}", amount.value()), payment_hash: PaymentHash::from(hash) })
    }

    async fn check_settled(&self, payment_hash: &PaymentHash) -> Result<bool, BackendError> {
        let node = self.node();
        if !node.reachable {
            return Err(Self::unreachable_error());
        }
        if node.failing_lookups.contains(payment_hash) {
            return Err(BackendError::Rpc { status: 500, message: format!("Lookup of {payment_hash} failed") });
        }
        Ok(node.settled.contains(payment_hash))
    }

    async fn subscribe_settlements(&self, listener: &dyn SettlementListener) -> BackendError {
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut node = self.node();
            if !node.reachable {
                return Self::unreachable_error();
            }
            node.stream = Some(tx);
        }
        listener.on_resubscribed().await;
        self.subscriptions.send_modify(|n| *n += 1);
        while let Some(command) = rx.recv().await {
            match command {
                StreamCommand::Settle(hash) => listener.on_settled(hash).await,
                StreamCommand::Terminate(reason) => {
                    debug!("🔌️ Simulated stream terminated: {reason}");
                    return BackendError::StreamTerminated(reason);
                },
            }
        }
        BackendError::StreamTerminated("The simulated stream was dropped".into())
    }

    async fn keep_alive(&self) -> Result<(), BackendError> {
        self.keepalives.fetch_add(1, Ordering::SeqCst);
        let node = self.node();
        if node.keepalive_failing || !node.reachable {
            return Err(BackendError::Rpc { status: 503, message: "Simulated keepalive failure".into() });
        }
        Ok(())
    }
}
