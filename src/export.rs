use async_trait::async_trait;
use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;

use crate::error::Result;
use crate::pipeline::BatchWriter;
use crate::types::{Status, Transaction};

const EXPORT_HEADER: [&str; 10] = [
    "id",
    "date",
    "amount",
    "description",
    "cleaned_description",
    "email_subject",
    "category",
    "confidence",
    "category_source",
    "status",
];

#[derive(Default)]
struct ExporterState {
    part: u32,
    files: Vec<PathBuf>,
}

/// Persistence collaborator for the buffered sink: each flushed batch
/// becomes one CSV part file with a fixed header row. Files are written to
/// a temp path and renamed into place, so readers of the output directory
/// never observe a partially-written batch. Names embed the run timestamp
/// to avoid collisions between runs.
pub struct CsvExporter {
    output_dir: PathBuf,
    prefix: String,
    run_stamp: String,
    state: Mutex<ExporterState>,
}

impl CsvExporter {
    pub fn new(output_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)?;
        Ok(Self {
            output_dir,
            prefix: prefix.into(),
            run_stamp: Utc::now().format("%Y%m%d_%H%M%S").to_string(),
            state: Mutex::new(ExporterState::default()),
        })
    }

    pub fn written_files(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().files.clone()
    }

    fn render(batch: &[Transaction]) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(EXPORT_HEADER)?;
        for transaction in batch {
            // Reaching durable output is what "exported" means; failed
            // items keep their terminal status in the artifact.
            let status = if transaction.status == Status::Failed {
                Status::Failed
            } else {
                Status::Exported
            };
            writer.write_record([
                transaction.id.to_string(),
                transaction.date.to_string(),
                format!("{:.2}", transaction.amount),
                transaction.description.clone(),
                transaction.cleaned_description.clone().unwrap_or_default(),
                transaction.email_subject.clone().unwrap_or_default(),
                transaction.category.clone().unwrap_or_default(),
                transaction
                    .category_confidence
                    .map(|c| format!("{c:.2}"))
                    .unwrap_or_default(),
                transaction
                    .category_source
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
                status.to_string(),
            ])?;
        }
        writer
            .into_inner()
            .map_err(|err| crate::error::EnricherError::Io(err.into_error()))
    }
}

#[async_trait]
impl BatchWriter<Transaction> for CsvExporter {
    async fn write_batch(&self, batch: &[Transaction]) -> Result<()> {
        let rendered = Self::render(batch)?;

        let (tmp_path, final_path) = {
            let mut state = self.state.lock().unwrap();
            state.part += 1;
            let name = format!(
                "{}_{}_part-{:03}.csv",
                self.prefix, self.run_stamp, state.part
            );
            (
                self.output_dir.join(format!(".{name}.tmp")),
                self.output_dir.join(name),
            )
        };

        // Atomic batch write: all rows land, or the rename never happens
        fs::write(&tmp_path, &rendered)?;
        fs::rename(&tmp_path, &final_path)?;

        self.state.lock().unwrap().files.push(final_path.clone());
        info!(path = %final_path.display(), rows = batch.len(), "exported batch");
        Ok(())
    }
}

/// In-memory batch writer for development and testing.
pub struct MemoryWriter {
    batches: Mutex<Vec<Vec<Transaction>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn batches(&self) -> Vec<Vec<Transaction>> {
        self.batches.lock().unwrap().clone()
    }

    /// All stored transactions, flattened in flush order.
    pub fn items(&self) -> Vec<Transaction> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

impl Default for MemoryWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatchWriter<Transaction> for MemoryWriter {
    async fn write_batch(&self, batch: &[Transaction]) -> Result<()> {
        let stored = batch
            .iter()
            .cloned()
            .map(|transaction| transaction.advanced(Status::Exported))
            .collect();
        self.batches.lock().unwrap().push(stored);
        Ok(())
    }
}
