//! Domain transforms the orchestrator chains together: cleaning, email
//! context lookup, and categorization.

pub mod categorize;
pub mod clean;
pub mod enrich;

pub use categorize::CategorizeTransform;
pub use clean::CleanTransform;
pub use enrich::EnrichTransform;
