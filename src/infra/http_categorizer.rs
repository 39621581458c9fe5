use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::categorize::Categorizer;
use crate::error::{ItemError, Result};
use crate::types::{CategoryGuess, EmailContext};

#[derive(Serialize)]
struct CategorizeRequest<'a> {
    description: &'a str,
    email_subject: Option<&'a str>,
    email_snippet: Option<&'a str>,
}

#[derive(Deserialize)]
struct CategorizeResponse {
    category: String,
    confidence: f64,
}

/// AI categorization service client. Every failure mode here (connect,
/// timeout, non-2xx, bad body) is a transient item error, which routes the
/// item through the rule fallback upstream.
pub struct HttpCategorizer {
    client: Client,
    endpoint: String,
}

impl HttpCategorizer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Categorizer for HttpCategorizer {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn categorize(
        &self,
        description: &str,
        context: Option<&EmailContext>,
    ) -> std::result::Result<CategoryGuess, ItemError> {
        let request = CategorizeRequest {
            description,
            email_subject: context.map(|c| c.subject.as_str()),
            email_snippet: context.map(|c| c.snippet.as_str()),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|err| ItemError::transient("categorizer", err.to_string()))?;

        if !response.status().is_success() {
            return Err(ItemError::transient(
                "categorizer",
                format!("status {}", response.status()),
            ));
        }

        let body: CategorizeResponse = response
            .json()
            .await
            .map_err(|err| ItemError::transient("categorizer", err.to_string()))?;
        Ok(CategoryGuess {
            category: body.category,
            confidence: body.confidence,
        })
    }
}
