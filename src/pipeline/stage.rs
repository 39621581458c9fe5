use async_trait::async_trait;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::wait_cancelled;
use crate::constants::{DEFAULT_QUEUE_CAPACITY, DEFAULT_SHUTDOWN_GRACE_MS, DEFAULT_WORKERS};
use crate::error::ItemError;

/// Anything that can flow through the pipeline. Items are single-owner
/// values; the engine only needs an identity for logging and a way to divert
/// an item to its failed terminal state.
pub trait PipelineItem: Send + 'static {
    fn id(&self) -> Uuid;
    fn into_failed(self) -> Self;
}

/// Outcome of one transform invocation. Created per item, consumed
/// immediately by the stage runtime, never persisted.
///
/// `Transient` hands the item back so the runtime can offer it to the
/// stage's fallback; `Fatal` means the item is unprocessable and must be
/// dropped with a diagnostic.
pub enum StageResult<T> {
    Ok(T),
    Skip,
    Transient { item: T, error: ItemError },
    Fatal(ItemError),
}

/// Result of a fallback attempt. The item always comes back, so an
/// unrecovered one can be tagged failed and still forwarded downstream.
pub enum FallbackOutcome<T> {
    Recovered(T),
    Unrecovered(T),
}

/// One async transform plus an optional fallback, as wrapped by a [`Stage`].
#[async_trait]
pub trait StageTransform<T: PipelineItem>: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn apply(&self, item: T) -> StageResult<T>;

    /// Local substitute applied when `apply` reports a transient error. The
    /// default is "no fallback configured".
    async fn fallback(&self, item: T, error: &ItemError) -> FallbackOutcome<T> {
        let _ = error;
        FallbackOutcome::Unrecovered(item)
    }
}

#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Input queue capacity. A full queue suspends the submitter.
    pub queue_capacity: usize,
    /// Worker concurrency. Queued-or-in-flight items never exceed
    /// `queue_capacity + workers`.
    pub workers: usize,
    /// How long in-flight work may keep running after cancellation.
    pub shutdown_grace: Duration,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: DEFAULT_WORKERS,
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
        }
    }
}

/// Per-stage tallies reported once the stage has drained.
#[derive(Debug, Clone, Default)]
pub struct StageStats {
    pub name: &'static str,
    pub admitted: u64,
    pub forwarded: u64,
    pub recovered: u64,
    pub failed: u64,
    pub dropped: u64,
    pub skipped: u64,
    pub cancelled: bool,
}

enum ItemOutcome {
    Forwarded,
    Recovered,
    FailedForwarded,
    Dropped,
    Skipped,
}

pub struct Stage;

impl Stage {
    /// Spawn a stage task. Returns the stage's input sender and the join
    /// handle that resolves with the stage's stats once it has drained and
    /// closed its downstream link.
    ///
    /// Dropping every clone of the returned sender is the completion signal:
    /// the stage finishes queued and in-flight items, then drops
    /// `downstream` so the next stage sees its own input exhausted only
    /// after this one has fully drained.
    pub fn spawn<T: PipelineItem>(
        transform: Arc<dyn StageTransform<T>>,
        config: StageConfig,
        downstream: mpsc::Sender<T>,
        cancel: watch::Receiver<bool>,
    ) -> (mpsc::Sender<T>, JoinHandle<StageStats>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let handle = tokio::spawn(run_stage(transform, config, rx, downstream, cancel));
        (tx, handle)
    }
}

async fn run_stage<T: PipelineItem>(
    transform: Arc<dyn StageTransform<T>>,
    config: StageConfig,
    mut rx: mpsc::Receiver<T>,
    downstream: mpsc::Sender<T>,
    mut cancel: watch::Receiver<bool>,
) -> StageStats {
    let name = transform.name();
    let semaphore = Arc::new(Semaphore::new(config.workers));
    let mut workers: JoinSet<ItemOutcome> = JoinSet::new();
    let mut stats = StageStats {
        name,
        ..Default::default()
    };
    let mut cancelled = false;

    debug!(
        stage = name,
        capacity = config.queue_capacity,
        workers = config.workers,
        "stage started"
    );

    loop {
        // Reap finished workers so the join set stays bounded on long runs
        while let Some(res) = workers.try_join_next() {
            tally(&mut stats, res);
        }

        // A permit is acquired before pulling an item, so the stage never
        // holds more than a queue's worth plus a pool's worth of items.
        let permit = tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancel) => {
                cancelled = true;
                break;
            }
            permit = semaphore.clone().acquire_owned() => {
                permit.expect("stage semaphore closed")
            }
        };

        let item = tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancel) => {
                cancelled = true;
                break;
            }
            maybe = rx.recv() => match maybe {
                Some(item) => item,
                None => break,
            }
        };

        stats.admitted += 1;
        let transform = Arc::clone(&transform);
        let downstream = downstream.clone();
        workers.spawn(async move {
            let outcome = process_item(transform, item, downstream).await;
            drop(permit);
            outcome
        });
    }

    // Stop admitting; queued-but-unprocessed items are released here on the
    // cancellation path, which also unblocks any suspended submitter.
    drop(rx);

    // Full drain after normal completion, still watching for a cancellation
    // that arrives while a slow transform is finishing up
    if !cancelled {
        loop {
            tokio::select! {
                biased;
                _ = wait_cancelled(&mut cancel) => {
                    cancelled = true;
                    break;
                }
                res = workers.join_next() => match res {
                    Some(res) => tally(&mut stats, res),
                    None => break,
                }
            }
        }
    }

    if cancelled {
        info!(stage = name, "stage cancelled, draining in-flight work");
        let deadline = tokio::time::Instant::now() + config.shutdown_grace;
        loop {
            match tokio::time::timeout_at(deadline, workers.join_next()).await {
                Ok(Some(res)) => tally(&mut stats, res),
                Ok(None) => break,
                Err(_) => {
                    warn!(stage = name, "grace period elapsed, aborting in-flight work");
                    workers.abort_all();
                    while let Some(res) = workers.join_next().await {
                        tally(&mut stats, res);
                    }
                    break;
                }
            }
        }
    }

    stats.cancelled = cancelled;
    // The next stage sees end of input only after this one has fully drained
    drop(downstream);

    info!(
        stage = name,
        admitted = stats.admitted,
        forwarded = stats.forwarded,
        recovered = stats.recovered,
        failed = stats.failed,
        dropped = stats.dropped,
        skipped = stats.skipped,
        cancelled = stats.cancelled,
        "stage drained"
    );
    stats
}

async fn process_item<T: PipelineItem>(
    transform: Arc<dyn StageTransform<T>>,
    item: T,
    downstream: mpsc::Sender<T>,
) -> ItemOutcome {
    let name = transform.name();
    let id = item.id();

    match transform.apply(item).await {
        StageResult::Ok(next) => {
            forward(name, id, next, &downstream, ItemOutcome::Forwarded).await
        }
        StageResult::Skip => {
            debug!(stage = name, item = %id, "item skipped");
            counter!("ledgerflow_items_skipped_total", "stage" => name).increment(1);
            ItemOutcome::Skipped
        }
        StageResult::Transient { item, error } => {
            warn!(stage = name, item = %id, error = %error, "transform failed, trying fallback");
            counter!("ledgerflow_item_errors_total", "stage" => name).increment(1);
            match transform.fallback(item, &error).await {
                FallbackOutcome::Recovered(next) => {
                    debug!(stage = name, item = %id, "fallback recovered item");
                    counter!("ledgerflow_items_recovered_total", "stage" => name).increment(1);
                    forward(name, id, next, &downstream, ItemOutcome::Recovered).await
                }
                FallbackOutcome::Unrecovered(item) => {
                    warn!(stage = name, item = %id, "no fallback recovery, forwarding as failed");
                    forward(
                        name,
                        id,
                        item.into_failed(),
                        &downstream,
                        ItemOutcome::FailedForwarded,
                    )
                    .await
                }
            }
        }
        StageResult::Fatal(error) => {
            error!(stage = name, item = %id, error = %error, "unprocessable item dropped");
            counter!("ledgerflow_items_dropped_total", "stage" => name).increment(1);
            ItemOutcome::Dropped
        }
    }
}

async fn forward<T: PipelineItem>(
    name: &'static str,
    id: Uuid,
    item: T,
    downstream: &mpsc::Sender<T>,
    outcome: ItemOutcome,
) -> ItemOutcome {
    if downstream.send(item).await.is_err() {
        warn!(stage = name, item = %id, "downstream closed, item not delivered");
        return ItemOutcome::Dropped;
    }
    debug!(stage = name, item = %id, "item forwarded");
    counter!("ledgerflow_items_forwarded_total", "stage" => name).increment(1);
    outcome
}

fn tally(stats: &mut StageStats, res: Result<ItemOutcome, tokio::task::JoinError>) {
    match res {
        Ok(ItemOutcome::Forwarded) => stats.forwarded += 1,
        Ok(ItemOutcome::Recovered) => stats.recovered += 1,
        Ok(ItemOutcome::FailedForwarded) => stats.failed += 1,
        Ok(ItemOutcome::Dropped) => stats.dropped += 1,
        Ok(ItemOutcome::Skipped) => stats.skipped += 1,
        Err(err) if err.is_cancelled() => stats.dropped += 1,
        Err(err) => {
            error!(stage = stats.name, error = %err, "stage worker panicked");
            stats.dropped += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testutil::TestItem;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    struct Passthrough;

    #[async_trait]
    impl StageTransform<TestItem> for Passthrough {
        fn name(&self) -> &'static str {
            "passthrough"
        }

        async fn apply(&self, item: TestItem) -> StageResult<TestItem> {
            StageResult::Ok(item)
        }
    }

    /// Sleeps for `10ms * value` before forwarding, so higher values finish
    /// later when workers overlap.
    struct ValueDelay;

    #[async_trait]
    impl StageTransform<TestItem> for ValueDelay {
        fn name(&self) -> &'static str {
            "value_delay"
        }

        async fn apply(&self, item: TestItem) -> StageResult<TestItem> {
            tokio::time::sleep(Duration::from_millis(10 * item.value as u64)).await;
            StageResult::Ok(item)
        }
    }

    /// Always reports a transient error; recovers via fallback when built
    /// with `recover = true`.
    struct AlwaysTransient {
        recover: bool,
    }

    #[async_trait]
    impl StageTransform<TestItem> for AlwaysTransient {
        fn name(&self) -> &'static str {
            "always_transient"
        }

        async fn apply(&self, item: TestItem) -> StageResult<TestItem> {
            StageResult::Transient {
                item,
                error: ItemError::transient("test", "scripted outage"),
            }
        }

        async fn fallback(&self, mut item: TestItem, _error: &ItemError) -> FallbackOutcome<TestItem> {
            if self.recover {
                item.value += 100;
                FallbackOutcome::Recovered(item)
            } else {
                FallbackOutcome::Unrecovered(item)
            }
        }
    }

    struct RejectAll;

    #[async_trait]
    impl StageTransform<TestItem> for RejectAll {
        fn name(&self) -> &'static str {
            "reject_all"
        }

        async fn apply(&self, _item: TestItem) -> StageResult<TestItem> {
            StageResult::Fatal(ItemError::malformed("scripted rejection"))
        }
    }

    /// Parks every item until the shared notify is released.
    struct Gate {
        open: Arc<Notify>,
    }

    #[async_trait]
    impl StageTransform<TestItem> for Gate {
        fn name(&self) -> &'static str {
            "gate"
        }

        async fn apply(&self, item: TestItem) -> StageResult<TestItem> {
            self.open.notified().await;
            StageResult::Ok(item)
        }
    }

    fn small_config(queue_capacity: usize, workers: usize) -> StageConfig {
        StageConfig {
            queue_capacity,
            workers,
            shutdown_grace: Duration::from_millis(200),
        }
    }

    fn cancel_pair() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    async fn drain<T>(mut rx: mpsc::Receiver<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn forwards_transformed_items_and_reports_stats() {
        let (cancel_tx, cancel_rx) = cancel_pair();
        let (down_tx, down_rx) = mpsc::channel(16);
        let (tx, join) = Stage::spawn(
            Arc::new(Passthrough),
            small_config(4, 2),
            down_tx,
            cancel_rx,
        );

        for value in 0..5 {
            tx.send(TestItem::new(value)).await.unwrap();
        }
        drop(tx);

        let stats = join.await.unwrap();
        assert_eq!(stats.admitted, 5);
        assert_eq!(stats.forwarded, 5);
        assert!(!stats.cancelled);
        assert_eq!(drain(down_rx).await.len(), 5);
        drop(cancel_tx);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn completion_order_is_not_admission_order_when_workers_overlap() {
        let (cancel_tx, cancel_rx) = cancel_pair();
        let (down_tx, down_rx) = mpsc::channel(16);
        let (tx, join) = Stage::spawn(
            Arc::new(ValueDelay),
            small_config(8, 4),
            down_tx,
            cancel_rx,
        );

        // Admitted slowest-first: 20, 1, 2, 3
        for value in [20, 1, 2, 3] {
            tx.send(TestItem::new(value)).await.unwrap();
        }
        drop(tx);
        join.await.unwrap();

        let arrived: Vec<u32> = drain(down_rx).await.into_iter().map(|i| i.value).collect();
        assert_eq!(arrived.len(), 4);
        // The slow head of the queue must not arrive first
        assert_ne!(arrived[0], 20);
        assert_eq!(*arrived.last().unwrap(), 20);
        drop(cancel_tx);
    }

    #[tokio::test]
    async fn fallback_recovers_transient_failures() {
        let (cancel_tx, cancel_rx) = cancel_pair();
        let (down_tx, down_rx) = mpsc::channel(16);
        let (tx, join) = Stage::spawn(
            Arc::new(AlwaysTransient { recover: true }),
            small_config(4, 1),
            down_tx,
            cancel_rx,
        );

        tx.send(TestItem::new(7)).await.unwrap();
        drop(tx);

        let stats = join.await.unwrap();
        assert_eq!(stats.recovered, 1);
        assert_eq!(stats.failed, 0);

        let out = drain(down_rx).await;
        assert_eq!(out[0].value, 107);
        assert!(!out[0].failed);
        drop(cancel_tx);
    }

    #[tokio::test]
    async fn unrecovered_items_are_forwarded_failed_not_dropped() {
        let (cancel_tx, cancel_rx) = cancel_pair();
        let (down_tx, down_rx) = mpsc::channel(16);
        let (tx, join) = Stage::spawn(
            Arc::new(AlwaysTransient { recover: false }),
            small_config(4, 1),
            down_tx,
            cancel_rx,
        );

        tx.send(TestItem::new(7)).await.unwrap();
        drop(tx);

        let stats = join.await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.dropped, 0);

        let out = drain(down_rx).await;
        assert_eq!(out.len(), 1);
        assert!(out[0].failed);
        drop(cancel_tx);
    }

    #[tokio::test]
    async fn fatal_items_are_dropped_and_processing_continues() {
        let (cancel_tx, cancel_rx) = cancel_pair();
        let (down_tx, down_rx) = mpsc::channel(16);
        let (tx, join) = Stage::spawn(
            Arc::new(RejectAll),
            small_config(4, 2),
            down_tx,
            cancel_rx,
        );

        for value in 0..3 {
            tx.send(TestItem::new(value)).await.unwrap();
        }
        drop(tx);

        let stats = join.await.unwrap();
        assert_eq!(stats.dropped, 3);
        assert!(drain(down_rx).await.is_empty());
        drop(cancel_tx);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn submit_suspends_once_queue_and_workers_are_full() {
        let open = Arc::new(Notify::new());
        let (cancel_tx, cancel_rx) = cancel_pair();
        let (down_tx, down_rx) = mpsc::channel(16);
        // K = 2, P = 1: three items fit (one in flight, two queued)
        let (tx, join) = Stage::spawn(
            Arc::new(Gate {
                open: Arc::clone(&open),
            }),
            small_config(2, 1),
            down_tx,
            cancel_rx,
        );

        for value in 0..3 {
            tx.send(TestItem::new(value)).await.unwrap();
        }

        // With the queue and the lone worker full, the next submission
        // must suspend on backpressure
        let blocked = timeout(Duration::from_millis(100), tx.send(TestItem::new(3))).await;
        assert!(blocked.is_err(), "fourth submit should have suspended");

        // Release the gate; every item drains through
        open.notify_waiters();
        let unblocked = timeout(Duration::from_secs(2), tx.send(TestItem::new(3))).await;
        assert!(unblocked.is_ok_and(|sent| sent.is_ok()));
        drop(tx);

        // Keep waking workers that park after earlier releases
        let notifier = {
            let open = Arc::clone(&open);
            tokio::spawn(async move {
                loop {
                    open.notify_waiters();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };
        let stats = join.await.unwrap();
        notifier.abort();
        assert_eq!(stats.forwarded, 4);
        assert_eq!(drain(down_rx).await.len(), 4);
        drop(cancel_tx);
    }

    #[tokio::test]
    async fn cancellation_stops_admission_and_reports_cancelled() {
        let open = Arc::new(Notify::new());
        let (cancel_tx, cancel_rx) = cancel_pair();
        let (down_tx, down_rx) = mpsc::channel(16);
        let (tx, join) = Stage::spawn(
            Arc::new(Gate {
                open: Arc::clone(&open),
            }),
            small_config(4, 1),
            down_tx,
            cancel_rx,
        );

        for value in 0..3 {
            tx.send(TestItem::new(value)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel_tx.send(true).unwrap();

        let stats = join.await.unwrap();
        assert!(stats.cancelled);
        // The gated worker never finished; nothing was forwarded
        assert_eq!(stats.forwarded, 0);
        assert!(drain(down_rx).await.is_empty());
    }
}
