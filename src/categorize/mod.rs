use async_trait::async_trait;

use crate::error::ItemError;
use crate::types::{CategoryGuess, EmailContext};

pub mod rules;

pub use rules::RuleCategorizer;

/// Narrow contract for the remote categorization collaborator. Network and
/// quota failures surface as `ItemError::Transient` so the owning stage can
/// fall back to local rules.
#[async_trait]
pub trait Categorizer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn categorize(
        &self,
        description: &str,
        context: Option<&EmailContext>,
    ) -> Result<CategoryGuess, ItemError>;
}
