// This file is part of Chainrelay.
//
// Chainrelay is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Chainrelay is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Chainrelay.
// If not, see https://www.gnu.org/licenses/.

//! Polling block tracker.
//!
//! Keeps a best-effort view of the chain head by polling `eth_getBlockByNumber("latest")`
//! on the remote provider, and notifies subscribers whenever the head advances.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chainrelay_types::{BlockHead, HeadChange, Id, RpcError, RpcRequest};
use chainrelay_utils::retry::{BackoffOpts, ExponentialBackoff};
use metrics::{Counter, Gauge};
use metrics_derive::Metrics;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::{
    sync::broadcast::{self, error::RecvError, error::TryRecvError},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{Platform, RemoteProvider};

const HEAD_CHANGE_CAPACITY: usize = 64;

/// Block tracker settings
#[derive(Clone, Copy, Debug)]
pub struct TrackerSettings {
    /// Interval between head polls while polling is active
    pub poll_interval: Duration,
    /// Backoff applied between failed polls
    pub backoff: BackoffOpts,
    /// How long an observed head is reused without polling once polling has stopped
    pub block_reset_duration: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(20),
            backoff: BackoffOpts {
                min_wait: Duration::from_secs(1),
                max_wait: Duration::from_secs(30),
                max_jitter: Duration::from_millis(500),
            },
            block_reset_duration: Duration::from_secs(20),
        }
    }
}

/// Tracks the chain head of one remote provider.
///
/// Cloning is cheap, clones share the same head state and polling loop.
/// Polling runs only while at least one [`HeadSubscription`] is alive; queries made
/// without a subscriber poll on demand.
#[derive(Clone)]
pub struct BlockTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    provider: Arc<dyn RemoteProvider>,
    platform: Arc<dyn Platform>,
    settings: TrackerSettings,
    head: RwLock<Option<ObservedHead>>,
    sender: broadcast::Sender<HeadChange>,
    poll_lock: tokio::sync::Mutex<()>,
    consumers: Mutex<Consumers>,
    next_id: AtomicU64,
    metrics: TrackerMetrics,
}

#[derive(Clone, Copy)]
struct ObservedHead {
    head: BlockHead,
    observed_at: Instant,
}

#[derive(Default)]
struct Consumers {
    count: usize,
    token: Option<CancellationToken>,
}

#[derive(Metrics)]
#[metrics(scope = "block_tracker")]
struct TrackerMetrics {
    #[metric(describe = "the latest head number observed.")]
    head_number: Gauge,
    #[metric(describe = "the count of head polls.")]
    polls: Counter,
    #[metric(describe = "the count of failed head polls.")]
    poll_failures: Counter,
}

impl fmt::Debug for BlockTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockTracker")
            .field("head", &self.get_current_block())
            .field("running", &self.is_running())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

impl BlockTracker {
    /// Create a tracker polling `provider`, scheduling its timers on `platform`.
    ///
    /// Nothing is polled until the head is queried or a subscriber attaches.
    pub fn new(
        provider: Arc<dyn RemoteProvider>,
        platform: Arc<dyn Platform>,
        settings: TrackerSettings,
    ) -> Self {
        let (sender, _) = broadcast::channel(HEAD_CHANGE_CAPACITY);
        Self {
            inner: Arc::new(TrackerInner {
                provider,
                platform,
                settings,
                head: RwLock::new(None),
                sender,
                poll_lock: tokio::sync::Mutex::new(()),
                consumers: Mutex::new(Consumers::default()),
                next_id: AtomicU64::new(1),
                metrics: TrackerMetrics::default(),
            }),
        }
    }

    /// The last observed head, or `None` if no poll has succeeded yet. Never blocks.
    pub fn get_current_block(&self) -> Option<BlockHead> {
        (*self.inner.head.read()).map(|o| o.head)
    }

    /// The current head, polling first unless a fresh head is already known.
    ///
    /// A head is fresh while polling is running, or for `block_reset_duration` after it
    /// was last observed. Concurrent callers share a single poll.
    pub async fn get_latest_block(&self) -> Result<BlockHead, RpcError> {
        if let Some(head) = self.inner.fresh_head() {
            return Ok(head);
        }
        let _guard = self.inner.poll_lock.lock().await;
        if let Some(head) = self.inner.fresh_head() {
            return Ok(head);
        }
        self.inner.poll().await
    }

    /// Poll the remote provider now, regardless of freshness.
    ///
    /// Returns the head the provider reported, which may be lower than the tracked head if
    /// the answering node lags. The tracked head itself only ever moves forward.
    pub async fn check_for_latest_block(&self) -> Result<BlockHead, RpcError> {
        let _guard = self.inner.poll_lock.lock().await;
        self.inner.poll().await
    }

    /// Poll the remote provider if block `number` is above the tracked head.
    ///
    /// The head is checked again once the poll lock is held, so callers racing on the same
    /// stale head share the first poll. Returns `None` when no poll was needed, including
    /// when no head has been observed yet.
    pub async fn check_if_behind(&self, number: u64) -> Result<Option<BlockHead>, RpcError> {
        if !self.is_behind(number) {
            return Ok(None);
        }
        let _guard = self.inner.poll_lock.lock().await;
        if !self.is_behind(number) {
            return Ok(None);
        }
        self.inner.poll().await.map(Some)
    }

    fn is_behind(&self, number: u64) -> bool {
        self.get_current_block()
            .is_some_and(|head| number > head.number)
    }

    /// Subscribe to head changes, starting the polling loop if this is the first consumer.
    ///
    /// Polling stops once every subscription has been dropped.
    pub fn subscribe(&self) -> HeadSubscription {
        let receiver = self.inner.sender.subscribe();
        let mut consumers = self.inner.consumers.lock();
        consumers.count += 1;
        if consumers.count == 1 {
            let token = CancellationToken::new();
            tokio::spawn(poll_loop(self.inner.clone(), token.clone()));
            consumers.token = Some(token);
            info!("block tracker started polling");
        }
        HeadSubscription {
            receiver,
            inner: self.inner.clone(),
        }
    }

    /// True while at least one subscriber keeps the polling loop alive
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }
}

impl TrackerInner {
    fn is_running(&self) -> bool {
        self.consumers.lock().count > 0
    }

    fn fresh_head(&self) -> Option<BlockHead> {
        let observed = (*self.head.read())?;
        if self.is_running() || observed.observed_at.elapsed() < self.settings.block_reset_duration
        {
            Some(observed.head)
        } else {
            None
        }
    }

    async fn poll(&self) -> Result<BlockHead, RpcError> {
        self.metrics.polls.increment(1);
        let id = Id::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = RpcRequest::new(id, "eth_getBlockByNumber", vec![json!("latest"), json!(false)]);
        let block = self.provider.request(request).await?;
        let head = BlockHead::from_rpc_block(&block).ok_or_else(|| {
            RpcError::Deserialization("latest block is missing its number or hash".to_string())
        })?;
        self.observe(head);
        Ok(head)
    }

    /// Record a polled head. Emits a change only when the number strictly increases.
    fn observe(&self, head: BlockHead) -> Option<HeadChange> {
        let now = Instant::now();
        let mut state = self.head.write();
        let previous = (*state).map(|o| o.head);
        match previous {
            Some(prev) if head.number <= prev.number => {
                if head.number < prev.number {
                    debug!(
                        polled = head.number,
                        tracked = prev.number,
                        "polled head behind tracked head, ignoring"
                    );
                }
                *state = Some(ObservedHead {
                    head: prev,
                    observed_at: now,
                });
                None
            }
            _ => {
                *state = Some(ObservedHead {
                    head,
                    observed_at: now,
                });
                self.metrics.head_number.set(head.number as f64);
                let change = HeadChange {
                    previous,
                    current: head,
                };
                // sent under the lock so subscribers see changes in head order
                let _ = self.sender.send(change);
                debug!(number = head.number, hash = %head.hash, "new head");
                Some(change)
            }
        }
    }

    fn release_consumer(&self) {
        let mut consumers = self.consumers.lock();
        consumers.count = consumers.count.saturating_sub(1);
        if consumers.count == 0 {
            if let Some(token) = consumers.token.take() {
                token.cancel();
                info!("block tracker stopped polling");
            }
        }
    }
}

async fn poll_loop(inner: Arc<TrackerInner>, token: CancellationToken) {
    let mut backoff = ExponentialBackoff::new(inner.settings.backoff);
    loop {
        let result = {
            let _guard = inner.poll_lock.lock().await;
            if token.is_cancelled() {
                break;
            }
            inner.poll().await
        };
        let wait = match result {
            Ok(_) => {
                backoff.reset();
                inner.settings.poll_interval
            }
            Err(error) => {
                inner.metrics.poll_failures.increment(1);
                let wait = backoff.next_wait();
                warn!(
                    failures = backoff.failures(),
                    "block tracker poll failed: {error}"
                );
                trace!(wait_millis = wait.as_millis(), "backing off before next poll");
                wait
            }
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = inner.platform.sleep(wait) => {}
        }
    }
}

/// A live subscription to head changes. Dropping it releases the polling loop.
pub struct HeadSubscription {
    receiver: broadcast::Receiver<HeadChange>,
    inner: Arc<TrackerInner>,
}

impl HeadSubscription {
    /// Wait for the next head change.
    ///
    /// If this subscriber fell behind, the missed changes are skipped and the next
    /// retained change is returned.
    pub async fn recv(&mut self) -> Option<HeadChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) => return Some(change),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "head subscription lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// The next buffered head change, if any
    pub fn try_recv(&mut self) -> Option<HeadChange> {
        loop {
            match self.receiver.try_recv() {
                Ok(change) => return Some(change),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

impl fmt::Debug for HeadSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadSubscription").finish_non_exhaustive()
    }
}

impl Drop for HeadSubscription {
    fn drop(&mut self) {
        self.inner.release_consumer();
    }
}
