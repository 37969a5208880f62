//! Event discovery for one predicate instance: ordered historical reads
//! and cancellable live subscriptions with transport-adaptive polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{Address, Filter, Log};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::chain::{ChainAccess, TransportKind};
use crate::error::Result;

/// Baseline polling interval for request/response transports.
pub const POLL_INTERVAL_MS: u64 = 1_000;
/// Widened interval for batching/rate-limited transports.
pub const BATCHING_POLL_INTERVAL_MS: u64 = 5_000;

const SUBSCRIBE_CHANNEL_CAPACITY: usize = 64;

/// Cancellation handle for a live subscription.
///
/// `cancel` is synchronous and idempotent: repeated calls, or calls after
/// the subscription has naturally ended, are no-ops. Cancelling stops
/// further batch delivery between batches; it never aborts work already
/// handed to a consumer.
#[derive(Clone)]
pub struct Subscription {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Subscription {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Log source bound to one deployed predicate instance.
pub struct EventSource<C: ChainAccess> {
    chain: Arc<C>,
    address: Address,
}

impl<C: ChainAccess> Clone for EventSource<C> {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            address: self.address,
        }
    }
}

impl<C: ChainAccess> EventSource<C> {
    pub fn new(chain: Arc<C>, address: Address) -> Self {
        Self { chain, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Historical logs matching `filter` over the inclusive block range
    /// `from..=to` (`to` defaulting to the current tip), in chronological
    /// order.
    pub async fn read_past(&self, filter: Filter, from: u64, to: Option<u64>) -> Result<Vec<Log>> {
        let to = match to {
            Some(block) => block,
            None => self.chain.latest_block().await?,
        };
        let filter = filter.address(self.address).from_block(from).to_block(to);
        let mut logs = self.chain.read_logs(&filter).await?;
        sort_chronologically(&mut logs);
        debug!(count = logs.len(), from, to, "Read historical events");
        Ok(logs)
    }

    /// Opens a live subscription for `filter`, delivering non-empty
    /// batches in arrival order. Push transports delegate to the chain's
    /// native subscription; polling transports scan forward from the
    /// current tip at a transport-appropriate interval.
    pub async fn subscribe(&self, filter: Filter) -> Result<(Subscription, mpsc::Receiver<Vec<Log>>)> {
        let filter = filter.address(self.address);
        let subscription = Subscription::new();
        let (sink, stream) = mpsc::channel(SUBSCRIBE_CHANNEL_CAPACITY);

        match self.chain.transport() {
            TransportKind::Push => {
                let upstream = self.chain.subscribe_logs(&filter).await?;
                tokio::spawn(forward_batches(upstream, sink, subscription.clone()));
            }
            kind @ (TransportKind::Polling | TransportKind::Batching) => {
                let interval = match kind {
                    TransportKind::Batching => Duration::from_millis(BATCHING_POLL_INTERVAL_MS),
                    _ => Duration::from_millis(POLL_INTERVAL_MS),
                };
                let next = self.chain.latest_block().await? + 1;
                tokio::spawn(poll_batches(
                    self.chain.clone(),
                    filter,
                    interval,
                    next,
                    sink,
                    subscription.clone(),
                ));
            }
        }
        Ok((subscription, stream))
    }
}

async fn forward_batches(
    mut upstream: mpsc::Receiver<Vec<Log>>,
    sink: mpsc::Sender<Vec<Log>>,
    subscription: Subscription,
) {
    loop {
        let batch = tokio::select! {
            _ = subscription.notify.notified() => break,
            batch = upstream.recv() => match batch {
                Some(batch) => batch,
                None => break,
            },
        };
        if subscription.is_cancelled() {
            break;
        }
        if batch.is_empty() {
            continue;
        }
        if sink.send(batch).await.is_err() {
            break;
        }
    }
    debug!("Push subscription ended");
}

async fn poll_batches<C: ChainAccess>(
    chain: Arc<C>,
    filter: Filter,
    interval: Duration,
    mut next: u64,
    sink: mpsc::Sender<Vec<Log>>,
    subscription: Subscription,
) {
    loop {
        tokio::select! {
            _ = subscription.notify.notified() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        if subscription.is_cancelled() {
            break;
        }

        let tip = match chain.latest_block().await {
            Ok(tip) => tip,
            Err(e) => {
                warn!(error = %e, "Tip query failed; retrying next interval");
                continue;
            }
        };
        if tip < next {
            continue;
        }

        let window = filter.clone().from_block(next).to_block(tip);
        match chain.read_logs(&window).await {
            Ok(mut batch) => {
                if !batch.is_empty() {
                    sort_chronologically(&mut batch);
                    if sink.send(batch).await.is_err() {
                        break;
                    }
                }
                next = tip + 1;
            }
            Err(e) => {
                warn!(error = %e, from = next, to = tip, "Log poll failed; retrying");
            }
        }
    }
    debug!("Polling subscription ended");
}

fn sort_chronologically(logs: &mut [Log]) {
    logs.sort_by_key(|log| {
        (
            log.block_number.unwrap_or_default(),
            log.log_index.unwrap_or_default(),
        )
    });
}
