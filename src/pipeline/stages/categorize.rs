use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::categorize::{Categorizer, RuleCategorizer};
use crate::error::ItemError;
use crate::pipeline::stage::{FallbackOutcome, StageResult, StageTransform};
use crate::types::{CategoryGuess, CategorySource, Status, Transaction};

/// Third stage: ask the remote categorizer for a label. Transient remote
/// failures are handed back to the stage runtime, which retries the item
/// through the keyword-rule fallback, so a degraded run still categorizes
/// and exports every non-fatal item.
pub struct CategorizeTransform {
    primary: Arc<dyn Categorizer>,
}

impl CategorizeTransform {
    pub fn new(primary: Arc<dyn Categorizer>) -> Self {
        Self { primary }
    }
}

#[async_trait]
impl StageTransform<Transaction> for CategorizeTransform {
    fn name(&self) -> &'static str {
        "categorize"
    }

    async fn apply(&self, transaction: Transaction) -> StageResult<Transaction> {
        let context = transaction.email_context();
        match self
            .primary
            .categorize(transaction.match_text(), context.as_ref())
            .await
        {
            Ok(guess) => {
                debug!(
                    item = %transaction.id,
                    category = %guess.category,
                    categorizer = self.primary.name(),
                    "categorized"
                );
                StageResult::Ok(
                    transaction
                        .with_category(guess, CategorySource::Remote)
                        .advanced(Status::Categorized),
                )
            }
            Err(error) if error.is_fatal() => StageResult::Fatal(error),
            Err(error) => StageResult::Transient {
                item: transaction,
                error,
            },
        }
    }

    async fn fallback(
        &self,
        transaction: Transaction,
        _error: &ItemError,
    ) -> FallbackOutcome<Transaction> {
        let (label, confidence) = RuleCategorizer::label_for(transaction.match_text());
        FallbackOutcome::Recovered(
            transaction
                .with_category(
                    CategoryGuess {
                        category: label.to_string(),
                        confidence,
                    },
                    CategorySource::Rules,
                )
                .advanced(Status::Categorized),
        )
    }
}
