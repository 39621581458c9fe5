use async_trait::async_trait;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::ContextProvider;
use crate::pipeline::stage::{StageResult, StageTransform};
use crate::types::{Status, Transaction};

/// Second stage: attach email subject/snippet context when the search
/// collaborator can find any. Lookup failures degrade to "no enrichment";
/// this stage never fails an item.
pub struct EnrichTransform {
    provider: Arc<dyn ContextProvider>,
}

impl EnrichTransform {
    pub fn new(provider: Arc<dyn ContextProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl StageTransform<Transaction> for EnrichTransform {
    fn name(&self) -> &'static str {
        "enrich"
    }

    async fn apply(&self, transaction: Transaction) -> StageResult<Transaction> {
        let enriched = match self.provider.lookup(&transaction).await {
            Ok(Some(context)) => {
                debug!(item = %transaction.id, provider = self.provider.name(), "context attached");
                counter!("ledgerflow_context_hits_total").increment(1);
                transaction.with_email_context(context)
            }
            Ok(None) => transaction,
            Err(err) => {
                warn!(
                    item = %transaction.id,
                    provider = self.provider.name(),
                    error = %err,
                    "context lookup failed, continuing without enrichment"
                );
                counter!("ledgerflow_context_errors_total").increment(1);
                transaction
            }
        };
        StageResult::Ok(enriched.advanced(Status::Enriched))
    }
}
