use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::context::ContextProvider;
use crate::error::{ItemError, Result};
use crate::types::{EmailContext, Transaction};

#[derive(Serialize)]
struct SearchRequest<'a> {
    description: &'a str,
    date: String,
    amount: f64,
}

#[derive(Deserialize)]
struct SearchResponse {
    subject: String,
    snippet: String,
}

/// Email search client. A 204 means "nothing matched"; anything that is not
/// a clean hit or a clean miss is a transient error, which the enrich stage
/// downgrades to "no enrichment".
pub struct HttpContextProvider {
    client: Client,
    endpoint: String,
}

impl HttpContextProvider {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl ContextProvider for HttpContextProvider {
    fn name(&self) -> &'static str {
        "email_search"
    }

    async fn lookup(
        &self,
        transaction: &Transaction,
    ) -> std::result::Result<Option<EmailContext>, ItemError> {
        let request = SearchRequest {
            description: transaction.match_text(),
            date: transaction.date.to_string(),
            amount: transaction.amount,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|err| ItemError::transient("email_search", err.to_string()))?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ItemError::transient(
                "email_search",
                format!("status {}", response.status()),
            ));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|err| ItemError::transient("email_search", err.to_string()))?;
        Ok(Some(EmailContext {
            subject: body.subject,
            snippet: body.snippet,
        }))
    }
}
