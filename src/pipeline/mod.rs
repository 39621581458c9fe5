//! The staged pipeline engine: bounded-concurrency stages, the orchestrator
//! that wires and drains them, and the buffered terminal sink.

pub mod orchestrator;
pub mod sink;
pub mod stage;
pub mod stages;

pub use orchestrator::{Pipeline, PipelineBuilder, RunSummary};
pub use sink::{BatchWriter, BufferedSink, SinkConfig, SinkHandle, SinkStats};
pub use stage::{
    FallbackOutcome, PipelineItem, Stage, StageConfig, StageResult, StageStats, StageTransform,
};

use tokio::sync::watch;

/// Resolves once the shared cancellation signal is raised. If the signal
/// source goes away without cancelling, this never resolves, so callers can
/// safely keep it in a `select!` arm.
pub(crate) async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
