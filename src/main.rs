use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, warn};

use ledgerflow::categorize::{Categorizer, RuleCategorizer};
use ledgerflow::config::AppConfig;
use ledgerflow::constants::CATEGORY_LABELS;
use ledgerflow::context::{ContextProvider, NoopContextProvider};
use ledgerflow::error::EnricherError;
use ledgerflow::export::CsvExporter;
use ledgerflow::infra::{HttpCategorizer, HttpContextProvider};
use ledgerflow::logging;
use ledgerflow::pipeline::stages::{CategorizeTransform, CleanTransform, EnrichTransform};
use ledgerflow::pipeline::{BatchWriter, PipelineBuilder, RunSummary};
use ledgerflow::source::CsvSource;
use ledgerflow::types::Transaction;

#[derive(Parser)]
#[command(name = "ledgerflow")]
#[command(about = "Financial transaction enrichment pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the enrichment pipeline over a CSV of raw transactions
    Run {
        /// Input CSV with date, amount, description columns
        #[arg(long)]
        input: String,
        /// Directory for exported CSV batches
        #[arg(long)]
        output_dir: Option<String>,
        /// Optional TOML config file (defaults to ledgerflow.toml if present)
        #[arg(long)]
        config: Option<String>,
        /// Skip remote collaborators and categorize with local rules only
        #[arg(long)]
        offline: bool,
        /// Worker concurrency per stage
        #[arg(long)]
        workers: Option<usize>,
        /// Stage queue capacity
        #[arg(long)]
        queue_capacity: Option<usize>,
        /// Sink batch size
        #[arg(long)]
        batch_size: Option<usize>,
        /// Sink flush interval in seconds
        #[arg(long)]
        flush_interval_secs: Option<u64>,
        /// Overall pipeline deadline in seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
    /// List the closed set of category labels the rule fallback can emit
    Categories,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            input,
            output_dir,
            config,
            offline,
            workers,
            queue_capacity,
            batch_size,
            flush_interval_secs,
            deadline_secs,
        } => {
            let mut app_config = AppConfig::load(config.as_deref())?;
            if let Some(dir) = output_dir {
                app_config.export.output_dir = dir;
            }
            if let Some(workers) = workers {
                app_config.pipeline.workers = workers;
            }
            if let Some(capacity) = queue_capacity {
                app_config.pipeline.queue_capacity = capacity;
            }
            if let Some(batch) = batch_size {
                app_config.sink.batch_size = batch;
            }
            if let Some(interval) = flush_interval_secs {
                app_config.sink.flush_interval_secs = interval;
            }
            if let Some(deadline) = deadline_secs {
                app_config.pipeline.deadline_secs = deadline;
            }
            app_config.validate()?;

            run_enrichment(&input, app_config, offline).await?;
        }
        Commands::Categories => {
            println!("📂 Category labels:");
            for label in CATEGORY_LABELS {
                println!("   - {label}");
            }
        }
    }

    Ok(())
}

async fn run_enrichment(input: &str, config: AppConfig, offline: bool) -> anyhow::Result<()> {
    let batch = CsvSource::load(input)?;
    println!(
        "🚀 Starting enrichment pipeline: {} transactions ({} rejected at parse)",
        batch.transactions.len(),
        batch.rejected
    );

    let categorizer: Arc<dyn Categorizer> = match (&config.remote.categorizer_url, offline) {
        (Some(url), false) => {
            info!(endpoint = %url, "using remote categorizer");
            Arc::new(HttpCategorizer::new(url.clone(), config.request_timeout())?)
        }
        _ => {
            if !offline {
                warn!("no categorizer endpoint configured, using rule-based categorization");
            }
            Arc::new(RuleCategorizer::new())
        }
    };
    let provider: Arc<dyn ContextProvider> = match (&config.remote.email_search_url, offline) {
        (Some(url), false) => {
            info!(endpoint = %url, "using email context search");
            Arc::new(HttpContextProvider::new(url.clone(), config.request_timeout())?)
        }
        _ => Arc::new(NoopContextProvider),
    };

    let exporter = Arc::new(CsvExporter::new(
        &config.export.output_dir,
        &config.export.file_prefix,
    )?);

    let pipeline = PipelineBuilder::new()
        .stage(CleanTransform::new(), config.stage_config())
        .stage(EnrichTransform::new(provider), config.stage_config())
        .stage(CategorizeTransform::new(categorizer), config.stage_config())
        .sink(
            config.sink_config(),
            Arc::clone(&exporter) as Arc<dyn BatchWriter<Transaction>>,
        )
        .shutdown_grace(config.shutdown_grace())
        .build()?;

    match pipeline.run(batch.transactions, config.deadline()).await {
        Ok(summary) => {
            print_summary(&summary);
            for file in exporter.written_files() {
                println!("   Output file: {}", file.display());
            }
            if !summary.success {
                warn!("run finished with write errors");
            }
            Ok(())
        }
        Err(err @ EnricherError::Timeout { .. }) => {
            error!(error = %err, "pipeline run timed out");
            println!("💥 Pipeline timed out: {err}");
            for file in exporter.written_files() {
                println!("   Output file (partial): {}", file.display());
            }
            Err(err.into())
        }
        Err(err) => {
            error!(error = %err, "pipeline run failed");
            Err(err.into())
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("\n📊 Pipeline Results:");
    println!("   Submitted: {}", summary.submitted);
    println!("   Exported: {}", summary.exported);
    println!("   Recovered via fallback: {}", summary.recovered);
    println!("   Forwarded failed: {}", summary.failed);
    println!("   Dropped (fatal): {}", summary.dropped);
    println!("   Flushes: {}", summary.flushes);
    if summary.write_errors > 0 {
        println!("   ⚠️  Write errors: {}", summary.write_errors);
    }
    println!(
        "   Duration: {}ms",
        summary.duration().num_milliseconds()
    );
}
