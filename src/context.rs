use async_trait::async_trait;

use crate::error::ItemError;
use crate::types::{EmailContext, Transaction};

/// Narrow contract for the email/context search collaborator. A lookup
/// failure degrades the item to "no enrichment" upstream; it never fails
/// the item.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn lookup(&self, transaction: &Transaction) -> Result<Option<EmailContext>, ItemError>;
}

/// Provider for offline runs: never finds anything.
pub struct NoopContextProvider;

#[async_trait]
impl ContextProvider for NoopContextProvider {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn lookup(&self, _transaction: &Transaction) -> Result<Option<EmailContext>, ItemError> {
        Ok(None)
    }
}
