//! Synchronization loop.
//!
//! One [`SyncLoop`] per registry. Each `start(key)` spawns a fresh instance
//! with its own `CancellationToken` and store epoch; the previous instance
//! is cancelled first. Per instance:
//!
//! ```text
//! Idle -> Fetching -> Applying -> Idle
//!            |
//!            +-> Failed -> (next tick) Idle
//! ```
//!
//! The loop body awaits each cycle before the next tick, so ticks that fire
//! during a fetch are skipped by the interval, never queued. A panicking
//! cycle is recorded as a failure and the instance keeps ticking. Manual refreshes share
//! the same in-flight flag. A result is applied only if its instance is
//! still live and its epoch is still the store's current one; late results
//! from a replaced instance are dropped.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mdash_api::{OfferSource, PositionSource};
use mdash_core::{AccountId, MarketOffer, Position, StatusFilter};
use mdash_feed::{NormalizedBatch, OfferNormalizer, PositionNormalizer};
use mdash_telemetry::Metrics;

use crate::error::SyncResult;
use crate::markets::MarketRegistry;
use crate::positions::{dedup_by_id, PositionRegistry};
use crate::store::Store;

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Idle,
    Fetching,
    Applying,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Fetching => "fetching",
            Self::Applying => "applying",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Applied this many entities.
    Applied(usize),
    Failed,
    /// Result discarded: the instance was cancelled or superseded.
    Stale,
    /// Another fetch was already in flight.
    Skipped,
}

impl CycleOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Applied(_) => "applied",
            Self::Failed => "failed",
            Self::Stale => "stale",
            Self::Skipped => "skipped",
        }
    }
}

// ============================================================================
// SyncTarget
// ============================================================================

/// A registry together with the source that feeds it.
#[async_trait]
pub trait SyncTarget: Send + Sync + 'static {
    /// Parameters a loop instance is started with.
    type Key: Clone + fmt::Debug + Send + Sync + 'static;
    type Item: Clone + Send + Sync + 'static;

    /// Label for logs and metrics.
    fn name(&self) -> &'static str;

    fn store(&self) -> &Store<Self::Item>;

    /// Fetch and normalize one full set.
    async fn fetch(&self, key: &Self::Key) -> SyncResult<Vec<Self::Item>>;

    /// Fold a fetched set into the store contents. Runs under the store's
    /// write lock.
    fn merge(&self, current: &mut Vec<Self::Item>, fetched: Vec<Self::Item>) {
        *current = fetched;
    }

    /// Called after a successful apply.
    fn on_applied(&self) {}
}

fn record_drops<T>(kind: &str, batch: &NormalizedBatch<T>) {
    for dropped in &batch.dropped {
        Metrics::record_dropped(kind, dropped.error.kind());
    }
}

/// Position loop key: whose positions, with which status filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PositionKey {
    pub account: AccountId,
    pub status: StatusFilter,
}

impl PositionKey {
    pub fn new(account: AccountId, status: StatusFilter) -> Self {
        Self { account, status }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account.short(), self.status)
    }
}

pub struct PositionSyncTarget {
    registry: Arc<PositionRegistry>,
    source: Arc<dyn PositionSource>,
    normalizer: PositionNormalizer,
}

impl PositionSyncTarget {
    pub fn new(
        registry: Arc<PositionRegistry>,
        source: Arc<dyn PositionSource>,
        normalizer: PositionNormalizer,
    ) -> Self {
        Self {
            registry,
            source,
            normalizer,
        }
    }

    pub fn registry(&self) -> &Arc<PositionRegistry> {
        &self.registry
    }

    pub fn normalizer(&self) -> &PositionNormalizer {
        &self.normalizer
    }
}

#[async_trait]
impl SyncTarget for PositionSyncTarget {
    type Key = PositionKey;
    type Item = Position;

    fn name(&self) -> &'static str {
        "positions"
    }

    fn store(&self) -> &Store<Position> {
        self.registry.store()
    }

    async fn fetch(&self, key: &PositionKey) -> SyncResult<Vec<Position>> {
        let raw = self
            .source
            .fetch_raw_positions(&key.account, key.status)
            .await?;
        let batch = self
            .normalizer
            .normalize_batch(&raw, Some(&key.account), Utc::now());
        record_drops("position", &batch);
        Ok(batch.items)
    }

    fn merge(&self, current: &mut Vec<Position>, fetched: Vec<Position>) {
        *current = dedup_by_id(fetched);
    }

    fn on_applied(&self) {
        Metrics::tracked_entities(self.name(), self.registry.len());
        Metrics::portfolio(
            self.registry.aggregate_pnl().to_f64().unwrap_or_default(),
            self.registry.aggregate_collateral().to_f64().unwrap_or_default(),
        );
    }
}

pub struct OfferSyncTarget {
    registry: Arc<MarketRegistry>,
    source: Arc<dyn OfferSource>,
    normalizer: OfferNormalizer,
}

impl OfferSyncTarget {
    pub fn new(
        registry: Arc<MarketRegistry>,
        source: Arc<dyn OfferSource>,
        normalizer: OfferNormalizer,
    ) -> Self {
        Self {
            registry,
            source,
            normalizer,
        }
    }

    pub fn registry(&self) -> &Arc<MarketRegistry> {
        &self.registry
    }
}

#[async_trait]
impl SyncTarget for OfferSyncTarget {
    type Key = ();
    type Item = MarketOffer;

    fn name(&self) -> &'static str {
        "offers"
    }

    fn store(&self) -> &Store<MarketOffer> {
        self.registry.store()
    }

    async fn fetch(&self, _key: &()) -> SyncResult<Vec<MarketOffer>> {
        let raw = self.source.fetch_raw_offers().await?;
        let batch = self.normalizer.normalize_batch(&raw);
        record_drops("offer", &batch);
        Ok(batch.items)
    }

    fn merge(&self, current: &mut Vec<MarketOffer>, mut fetched: Vec<MarketOffer>) {
        self.registry.annotate(&mut fetched);
        *current = fetched;
    }

    fn on_applied(&self) {
        Metrics::tracked_entities(self.name(), self.registry.len());
    }
}

// ============================================================================
// SyncLoop
// ============================================================================

/// State of one started instance.
struct Instance<K> {
    key: K,
    epoch: u64,
    token: CancellationToken,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag on drop.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Running<K> {
    instance: Arc<Instance<K>>,
    handle: JoinHandle<()>,
}

pub struct SyncLoop<T: SyncTarget> {
    target: Arc<T>,
    interval: Duration,
    running: Mutex<Option<Running<T::Key>>>,
    status: Arc<watch::Sender<SyncStatus>>,
}

impl<T: SyncTarget> SyncLoop<T> {
    pub fn new(target: Arc<T>, interval: Duration) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            target,
            interval,
            running: Mutex::new(None),
            status: Arc::new(status),
        }
    }

    pub fn target(&self) -> &Arc<T> {
        &self.target
    }

    /// Start syncing `key`, replacing any running instance. The first fetch
    /// happens immediately. Must be called inside a tokio runtime.
    pub fn start(&self, key: T::Key) {
        let mut running = self.running.lock();
        if let Some(old) = running.take() {
            old.instance.token.cancel();
            debug!(registry = self.target.name(), key = ?old.instance.key, "Replacing sync instance");
        }

        let instance = Arc::new(Instance {
            key,
            epoch: self.target.store().begin_epoch(),
            token: CancellationToken::new(),
            in_flight: AtomicBool::new(false),
        });
        info!(
            registry = self.target.name(),
            key = ?instance.key,
            epoch = instance.epoch,
            interval_ms = self.interval.as_millis() as u64,
            "Starting sync"
        );

        let handle = tokio::spawn(run_instance(
            Arc::clone(&self.target),
            Arc::clone(&instance),
            self.interval,
            Arc::clone(&self.status),
        ));
        *running = Some(Running { instance, handle });
    }

    /// Cancel the running instance. In-flight results are discarded.
    pub fn stop(&self) {
        let Some(old) = self.running.lock().take() else {
            return;
        };
        old.instance.token.cancel();
        let store = self.target.store();
        store.begin_epoch();
        store.set_loading(false);
        self.status.send_replace(SyncStatus::Idle);
        info!(registry = self.target.name(), key = ?old.instance.key, "Stopped sync");
    }

    /// Run one cycle now on the running instance, unless one is already in
    /// flight. Returns `None` when no instance is running.
    pub async fn refresh_now(&self) -> Option<CycleOutcome> {
        let instance = self
            .running
            .lock()
            .as_ref()
            .map(|r| Arc::clone(&r.instance))?;
        Some(run_cycle(self.target.as_ref(), &instance, &self.status).await)
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Whether a live instance is syncing `key`. An instance whose task
    /// has finished does not count.
    pub fn is_tracking(&self, key: &T::Key) -> bool
    where
        T::Key: PartialEq,
    {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| r.instance.key == *key && !r.handle.is_finished())
    }

    pub fn current_key(&self) -> Option<T::Key> {
        self.running.lock().as_ref().map(|r| r.instance.key.clone())
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }
}

impl<T: SyncTarget> Drop for SyncLoop<T> {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.instance.token.cancel();
        }
    }
}

async fn run_instance<T: SyncTarget>(
    target: Arc<T>,
    instance: Arc<Instance<T::Key>>,
    interval: Duration,
    status: Arc<watch::Sender<SyncStatus>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = instance.token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        // Not raced against cancellation: a late result is checked and
        // discarded inside the cycle. The cycle runs in its own task so a
        // panic fails that cycle instead of ending the instance.
        let cycle = tokio::spawn({
            let target = Arc::clone(&target);
            let instance = Arc::clone(&instance);
            let status = Arc::clone(&status);
            async move { run_cycle(target.as_ref(), &instance, &status).await }
        });
        if let Err(e) = cycle.await {
            if e.is_panic() {
                recover_from_panic(target.as_ref(), &instance, &status);
            }
        }
    }

    debug!(registry = target.name(), key = ?instance.key, "Sync instance exited");
}

/// Leave the registry and status as a failed cycle would.
fn recover_from_panic<T: SyncTarget>(
    target: &T,
    instance: &Instance<T::Key>,
    status: &watch::Sender<SyncStatus>,
) {
    error!(
        registry = target.name(),
        key = ?instance.key,
        epoch = instance.epoch,
        "Sync cycle panicked, keeping previous snapshot"
    );
    Metrics::sync_cycle(target.name(), "panicked");
    target
        .store()
        .set_error_if_current(instance.epoch, "sync cycle panicked".to_string());
    if !instance.token.is_cancelled() {
        status.send_replace(SyncStatus::Failed);
        Metrics::sync_state_set(target.name(), SyncStatus::Failed.as_str());
    }
}

async fn run_cycle<T: SyncTarget>(
    target: &T,
    instance: &Instance<T::Key>,
    status: &watch::Sender<SyncStatus>,
) -> CycleOutcome {
    let outcome = cycle(target, instance, status).await;
    Metrics::sync_cycle(target.name(), outcome.label());
    outcome
}

async fn cycle<T: SyncTarget>(
    target: &T,
    instance: &Instance<T::Key>,
    status: &watch::Sender<SyncStatus>,
) -> CycleOutcome {
    let Some(_guard) = InFlight::acquire(&instance.in_flight) else {
        debug!(registry = target.name(), "Fetch already in flight, skipping");
        return CycleOutcome::Skipped;
    };

    let set_status = |next: SyncStatus| {
        if !instance.token.is_cancelled() {
            status.send_replace(next);
            Metrics::sync_state_set(target.name(), next.as_str());
        }
    };

    let was_failed = *status.borrow() == SyncStatus::Failed;
    if was_failed {
        set_status(SyncStatus::Idle);
    }
    set_status(SyncStatus::Fetching);

    let store = target.store();
    store.set_loading_if_current(instance.epoch, true);

    let started = Instant::now();
    let result = target.fetch(&instance.key).await;
    Metrics::sync_fetch_latency(target.name(), started.elapsed().as_secs_f64() * 1000.0);

    if instance.token.is_cancelled() || store.current_epoch() != instance.epoch {
        debug!(
            registry = target.name(),
            key = ?instance.key,
            epoch = instance.epoch,
            "Discarding stale fetch result"
        );
        Metrics::stale_discarded(target.name());
        return CycleOutcome::Stale;
    }

    match result {
        Ok(items) => {
            set_status(SyncStatus::Applying);
            let count = items.len();
            let applied =
                store.apply_if_current(instance.epoch, |current| target.merge(current, items));
            if !applied {
                Metrics::stale_discarded(target.name());
                return CycleOutcome::Stale;
            }
            target.on_applied();
            set_status(SyncStatus::Idle);
            debug!(registry = target.name(), key = ?instance.key, count, "Applied sync result");
            CycleOutcome::Applied(count)
        }
        Err(e) => {
            warn!(
                registry = target.name(),
                key = ?instance.key,
                error = %e,
                "Sync fetch failed, keeping previous snapshot"
            );
            store.set_error_if_current(instance.epoch, e.to_string());
            set_status(SyncStatus::Failed);
            CycleOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let flag = AtomicBool::new(false);
        let guard = InFlight::acquire(&flag).unwrap();
        assert!(InFlight::acquire(&flag).is_none());
        drop(guard);
        assert!(InFlight::acquire(&flag).is_some());
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(SyncStatus::default(), SyncStatus::Idle);
        assert_eq!(SyncStatus::Applying.to_string(), "applying");
        assert_eq!(CycleOutcome::Applied(3).label(), "applied");
    }

    struct Fixed {
        store: Store<u32>,
    }

    #[async_trait]
    impl SyncTarget for Fixed {
        type Key = u8;
        type Item = u32;

        fn name(&self) -> &'static str {
            "fixed"
        }

        fn store(&self) -> &Store<u32> {
            &self.store
        }

        async fn fetch(&self, _key: &u8) -> SyncResult<Vec<u32>> {
            Ok(vec![1, 2])
        }
    }

    #[tokio::test]
    async fn test_finished_instance_is_not_tracking() {
        let target = Arc::new(Fixed {
            store: Store::default(),
        });
        let sync = SyncLoop::new(target, Duration::from_secs(3600));
        sync.start(7);
        assert!(sync.is_tracking(&7));
        assert!(!sync.is_tracking(&8));

        // End the task without going through stop().
        if let Some(running) = sync.running.lock().as_ref() {
            running.handle.abort();
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            while sync.is_running() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(sync.current_key(), Some(7));
        assert!(!sync.is_tracking(&7));

        sync.start(7);
        assert!(sync.is_tracking(&7));
        assert!(sync.is_running());
    }
}
