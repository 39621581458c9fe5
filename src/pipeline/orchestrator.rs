use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::sink::{BatchWriter, BufferedSink, SinkConfig, SinkHandle, SinkStats};
use super::stage::{PipelineItem, Stage, StageConfig, StageStats, StageTransform};
use crate::constants::DEFAULT_SHUTDOWN_GRACE_MS;
use crate::error::{EnricherError, Result};

/// Declares an ordered chain of stages ending in a buffered sink. Stage i's
/// output queue becomes stage i+1's input; the chain is wired back-to-front
/// at build time so every link exists before the first item is submitted.
pub struct PipelineBuilder<T: PipelineItem> {
    stages: Vec<(Arc<dyn StageTransform<T>>, StageConfig)>,
    sink: Option<(SinkConfig, Arc<dyn BatchWriter<T>>)>,
    shutdown_grace: Duration,
}

impl<T: PipelineItem> PipelineBuilder<T> {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            sink: None,
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
        }
    }

    pub fn stage(mut self, transform: impl StageTransform<T>, config: StageConfig) -> Self {
        self.stages.push((Arc::new(transform), config));
        self
    }

    pub fn sink(mut self, config: SinkConfig, writer: Arc<dyn BatchWriter<T>>) -> Self {
        self.sink = Some((config, writer));
        self
    }

    /// Bound on how long the deadline path waits for stages to wind down
    /// and for the terminal flush.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn build(self) -> Result<Pipeline<T>> {
        if self.stages.is_empty() {
            return Err(EnricherError::Config(
                "pipeline must have at least one stage".to_string(),
            ));
        }
        let (sink_config, writer) = self.sink.ok_or_else(|| {
            EnricherError::Config("pipeline must end in a buffered sink".to_string())
        })?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (sink_tx, sink_join, sink) = BufferedSink::spawn(sink_config, writer);

        let mut next_input = sink_tx;
        let mut stage_joins = Vec::with_capacity(self.stages.len());
        for (transform, config) in self.stages.into_iter().rev() {
            let (tx, join) = Stage::spawn(transform, config, next_input, cancel_rx.clone());
            next_input = tx;
            stage_joins.push(join);
        }
        stage_joins.reverse();

        Ok(Pipeline {
            input: next_input,
            stage_joins,
            sink_join,
            sink,
            cancel_tx,
            shutdown_grace: self.shutdown_grace,
        })
    }
}

impl<T: PipelineItem> Default for PipelineBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A fully wired stage chain, ready for one run.
pub struct Pipeline<T: PipelineItem> {
    input: mpsc::Sender<T>,
    stage_joins: Vec<JoinHandle<StageStats>>,
    sink_join: JoinHandle<SinkStats>,
    sink: SinkHandle<T>,
    cancel_tx: watch::Sender<bool>,
    shutdown_grace: Duration,
}

impl<T: PipelineItem> Pipeline<T> {
    /// Feed every item from `source` through the chain and wait for the
    /// terminal sink to drain, or for `deadline` to elapse, whichever comes
    /// first. The deadline is a race against a timer, not thread
    /// termination: on expiry the stages are cancelled, in-flight work gets
    /// the shutdown grace, and the sink performs a bounded final flush
    /// before the timeout error is returned.
    ///
    /// Per-item failures never surface here; they are visible as counts in
    /// the returned [`RunSummary`].
    pub async fn run<I>(self, source: I, deadline: Duration) -> Result<RunSummary>
    where
        I: IntoIterator<Item = T> + Send + 'static,
        I::IntoIter: Send,
    {
        let Pipeline {
            input,
            mut stage_joins,
            mut sink_join,
            sink,
            cancel_tx,
            shutdown_grace,
        } = self;

        let started_at = Utc::now();
        info!(
            stages = stage_joins.len(),
            deadline_secs = deadline.as_secs(),
            "pipeline run started"
        );

        // The feeder owns the only external sender into stage one; dropping
        // it when the source is exhausted is the completion signal that then
        // cascades stage by stage as each one drains.
        let mut feeder: JoinHandle<usize> = tokio::spawn(async move {
            let mut submitted = 0usize;
            for item in source {
                if input.send(item).await.is_err() {
                    warn!("pipeline input closed before the source was exhausted");
                    break;
                }
                submitted += 1;
            }
            submitted
        });

        let outcome = {
            let drain = async {
                let submitted = (&mut feeder).await?;
                let mut stage_stats = Vec::with_capacity(stage_joins.len());
                for join in &mut stage_joins {
                    stage_stats.push(join.await?);
                }
                let sink_stats = (&mut sink_join).await?;
                Ok::<_, EnricherError>((submitted, stage_stats, sink_stats))
            };
            tokio::pin!(drain);
            tokio::time::timeout(deadline, &mut drain).await
        };

        match outcome {
            Ok(Ok((submitted, stage_stats, sink_stats))) => {
                let summary =
                    RunSummary::from_parts(started_at, submitted, stage_stats, sink_stats);
                info!(
                    exported = summary.exported,
                    recovered = summary.recovered,
                    failed = summary.failed,
                    dropped = summary.dropped,
                    success = summary.success,
                    "pipeline run completed"
                );
                Ok(summary)
            }
            Ok(Err(err)) => {
                error!(error = %err, "pipeline task failed, flushing what was buffered");
                let _ = cancel_tx.send(true);
                let _ = tokio::time::timeout(shutdown_grace, sink.final_flush()).await;
                Err(err)
            }
            Err(_elapsed) => {
                warn!(
                    deadline_secs = deadline.as_secs(),
                    "pipeline deadline elapsed, cancelling stages"
                );
                let _ = cancel_tx.send(true);

                // Bounded wind-down: let stages drain in-flight work, then
                // make sure already-buffered output is not lost.
                feeder.abort();
                let _ = tokio::time::timeout(shutdown_grace, async {
                    for join in &mut stage_joins {
                        let _ = join.await;
                    }
                    let _ = (&mut sink_join).await;
                })
                .await;
                let _ = tokio::time::timeout(shutdown_grace, sink.final_flush()).await;

                let exported = sink.written();
                error!(exported, "pipeline timed out");
                Err(EnricherError::Timeout {
                    deadline_secs: deadline.as_secs(),
                    exported,
                })
            }
        }
    }
}

/// What one pipeline run did, in operator-facing terms. Degraded success
/// (items recovered by fallback or forwarded failed) is distinguishable
/// from full success by the per-outcome counts.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub submitted: usize,
    pub exported: u64,
    pub recovered: u64,
    pub failed: u64,
    pub dropped: u64,
    pub skipped: u64,
    pub flushes: u64,
    pub write_errors: u64,
    pub stages: Vec<StageStats>,
}

impl RunSummary {
    fn from_parts(
        started_at: DateTime<Utc>,
        submitted: usize,
        stages: Vec<StageStats>,
        sink: SinkStats,
    ) -> Self {
        let recovered = stages.iter().map(|s| s.recovered).sum();
        let failed = stages.iter().map(|s| s.failed).sum();
        let dropped = stages.iter().map(|s| s.dropped).sum();
        let skipped = stages.iter().map(|s| s.skipped).sum();
        Self {
            started_at,
            finished_at: Utc::now(),
            success: sink.write_errors == 0,
            submitted,
            exported: sink.written,
            recovered,
            failed,
            dropped,
            skipped,
            flushes: sink.flushes,
            write_errors: sink.write_errors,
            stages,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
