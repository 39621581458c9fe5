use async_trait::async_trait;
use metrics::{counter, histogram};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL_SECS, DEFAULT_QUEUE_CAPACITY};
use crate::error::Result;

/// Persistence collaborator invoked once per flushed batch. A batch write is
/// all-or-nothing: implementations must not leave a partially-written batch
/// observable to readers of the output artifact.
#[async_trait]
pub trait BatchWriter<T>: Send + Sync + 'static {
    async fn write_batch(&self, batch: &[T]) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Input queue capacity, same backpressure semantics as any stage.
    pub queue_capacity: usize,
    /// Buffer size that triggers a flush.
    pub batch_size: usize,
    /// Periodic flush interval for partially-filled buffers.
    pub flush_interval: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
        }
    }
}

/// Tallies reported by the sink task once its input is exhausted.
#[derive(Debug, Clone, Default)]
pub struct SinkStats {
    pub received: u64,
    pub flushes: u64,
    pub written: u64,
    pub write_errors: u64,
}

struct SinkShared<T> {
    buffer: Mutex<Vec<T>>,
    /// Serializes flushes. Triggered flushes take it with `try_lock` so a
    /// trigger arriving mid-flush is coalesced instead of queued.
    flush_gate: Mutex<()>,
    writer: Arc<dyn BatchWriter<T>>,
    batch_size: usize,
    flushes: AtomicU64,
    written: AtomicU64,
    write_errors: AtomicU64,
}

impl<T: Send + 'static> SinkShared<T> {
    /// Size- or timer-triggered flush; a no-op when empty or when another
    /// flush is already in progress.
    async fn flush(&self) {
        let Ok(_gate) = self.flush_gate.try_lock() else {
            debug!("flush already in progress, trigger coalesced");
            return;
        };
        self.flush_locked().await;
    }

    /// Drains whatever remains in the buffer. Waits for any in-progress
    /// flush first, and is idempotent: an empty buffer writes nothing.
    async fn final_flush(&self) {
        let _gate = self.flush_gate.lock().await;
        self.flush_locked().await;
    }

    async fn flush_locked(&self) {
        let batch = {
            let mut buffer = self.buffer.lock().await;
            if buffer.is_empty() {
                return;
            }
            std::mem::take(&mut *buffer)
        };
        let len = batch.len();
        let start = std::time::Instant::now();

        match self.writer.write_batch(&batch).await {
            Ok(()) => {
                self.flushes.fetch_add(1, Ordering::Relaxed);
                self.written.fetch_add(len as u64, Ordering::Relaxed);
                counter!("ledgerflow_items_flushed_total").increment(len as u64);
                histogram!("ledgerflow_flush_duration_seconds")
                    .record(start.elapsed().as_secs_f64());
                info!(batch = len, "flushed batch");
            }
            Err(err) => {
                self.write_errors.fetch_add(1, Ordering::Relaxed);
                counter!("ledgerflow_flush_errors_total").increment(1);
                error!(batch = len, error = %err, "batch write failed, re-queueing batch");
                // Put the batch back at the front so a later trigger (or the
                // final flush) retries it ahead of newer items.
                let mut buffer = self.buffer.lock().await;
                let mut restored = batch;
                restored.append(&mut buffer);
                *buffer = restored;
            }
        }
    }

    fn stats(&self, received: u64) -> SinkStats {
        SinkStats {
            received,
            flushes: self.flushes.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }
}

/// Handle kept by the orchestrator for the deadline path: it can force a
/// final flush and read progress without waiting for the sink task.
pub struct SinkHandle<T> {
    shared: Arc<SinkShared<T>>,
}

impl<T: Send + 'static> SinkHandle<T> {
    pub async fn final_flush(&self) {
        self.shared.final_flush().await;
    }

    pub fn written(&self) -> u64 {
        self.shared.written.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.shared.write_errors.load(Ordering::Relaxed)
    }
}

pub struct BufferedSink;

impl BufferedSink {
    /// Spawn the terminal sink task. The task drains its input until every
    /// upstream sender is dropped, then performs the final flush and
    /// resolves with its stats. Cancellation is handled upstream: once the
    /// stages close their downstream links the sink winds down on its own,
    /// and the orchestrator can force a flush through the [`SinkHandle`] at
    /// any point.
    pub fn spawn<T: Send + 'static>(
        config: SinkConfig,
        writer: Arc<dyn BatchWriter<T>>,
    ) -> (mpsc::Sender<T>, JoinHandle<SinkStats>, SinkHandle<T>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let shared = Arc::new(SinkShared {
            buffer: Mutex::new(Vec::new()),
            flush_gate: Mutex::new(()),
            writer,
            batch_size: config.batch_size,
            flushes: AtomicU64::new(0),
            written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
        });
        let handle = SinkHandle {
            shared: Arc::clone(&shared),
        };
        let join = tokio::spawn(run_sink(config, shared, rx));
        (tx, join, handle)
    }
}

async fn run_sink<T: Send + 'static>(
    config: SinkConfig,
    shared: Arc<SinkShared<T>>,
    mut rx: mpsc::Receiver<T>,
) -> SinkStats {
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of an interval is immediate; push it out one period so
    // a freshly started sink never time-flushes a buffer it just opened
    ticker.reset();
    let mut received: u64 = 0;

    debug!(
        batch_size = config.batch_size,
        interval_secs = config.flush_interval.as_secs(),
        "sink started"
    );

    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(item) => {
                    received += 1;
                    let should_flush = {
                        let mut buffer = shared.buffer.lock().await;
                        buffer.push(item);
                        buffer.len() >= shared.batch_size
                    };
                    if should_flush {
                        shared.flush().await;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                shared.flush().await;
            }
        }
    }

    shared.final_flush().await;
    let stats = shared.stats(received);
    info!(
        received = stats.received,
        written = stats.written,
        flushes = stats.flushes,
        write_errors = stats.write_errors,
        "sink drained"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testutil::{CollectingWriter, TestItem};

    fn config(batch_size: usize, flush_interval: Duration) -> SinkConfig {
        SinkConfig {
            queue_capacity: 16,
            batch_size,
            flush_interval,
        }
    }

    #[tokio::test]
    async fn size_triggered_flushes_then_final_flush_emit_everything_once() {
        let writer = Arc::new(CollectingWriter::new());
        let (tx, join, _handle) = BufferedSink::spawn(
            config(3, Duration::from_secs(600)),
            writer.clone() as Arc<dyn BatchWriter<TestItem>>,
        );

        for value in 0..7 {
            tx.send(TestItem::new(value)).await.unwrap();
        }
        drop(tx);

        let stats = join.await.unwrap();
        assert_eq!(stats.received, 7);
        assert_eq!(stats.written, 7);
        assert_eq!(stats.flushes, 3);

        let batches = writer.batches();
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);

        let mut all: Vec<u32> = batches.into_iter().flatten().collect();
        all.sort_unstable();
        assert_eq!(all, (0..7).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn final_flush_is_idempotent() {
        let writer = Arc::new(CollectingWriter::new());
        let (tx, join, handle) = BufferedSink::spawn(
            config(3, Duration::from_secs(600)),
            writer.clone() as Arc<dyn BatchWriter<TestItem>>,
        );

        for value in 0..4 {
            tx.send(TestItem::new(value)).await.unwrap();
        }
        drop(tx);
        let stats = join.await.unwrap();
        assert_eq!(stats.written, 4);
        let flushes_after_drain = writer.batches().len();

        // Defensive second (and third) final flush: zero additional writes
        handle.final_flush().await;
        handle.final_flush().await;
        assert_eq!(writer.batches().len(), flushes_after_drain);
        assert_eq!(handle.written(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_partial_buffers() {
        let writer = Arc::new(CollectingWriter::new());
        let (tx, join, _handle) = BufferedSink::spawn(
            config(100, Duration::from_millis(100)),
            writer.clone() as Arc<dyn BatchWriter<TestItem>>,
        );

        tx.send(TestItem::new(1)).await.unwrap();
        tx.send(TestItem::new(2)).await.unwrap();

        // Sleeping past the interval lets the paused clock advance and the
        // timer fire while the buffer holds two items
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(writer.batches(), vec![vec![1, 2]]);

        drop(tx);
        let stats = join.await.unwrap();
        // The final flush found an empty buffer and wrote nothing more
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.written, 2);
    }

    #[tokio::test]
    async fn failed_batch_is_requeued_and_retried_by_final_flush() {
        let writer = Arc::new(CollectingWriter::failing_first(1));
        let (tx, join, _handle) = BufferedSink::spawn(
            config(2, Duration::from_secs(600)),
            writer.clone() as Arc<dyn BatchWriter<TestItem>>,
        );

        tx.send(TestItem::new(1)).await.unwrap();
        tx.send(TestItem::new(2)).await.unwrap();
        drop(tx);

        let stats = join.await.unwrap();
        assert_eq!(stats.write_errors, 1);
        assert_eq!(stats.written, 2);
        assert_eq!(writer.batches(), vec![vec![1, 2]]);
    }
}
