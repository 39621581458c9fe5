//! ledgerflow: a staged, bounded-concurrency enrichment pipeline for
//! financial transactions.
//!
//! Raw transactions flow through cleaning, email-context lookup and
//! categorization stages into a buffered CSV sink. Each stage runs a bounded
//! worker pool behind a bounded queue, so memory stays flat under load and a
//! slow collaborator backpressures the producer instead of piling items up.
//! Per-item failures are isolated inside the owning stage; the run summary
//! distinguishes full from degraded success.

pub mod categorize;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod export;
pub mod infra;
pub mod logging;
pub mod pipeline;
pub mod source;
pub mod types;
