use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::pipeline::PipelineItem;

/// Processing status of a transaction as it moves through the pipeline.
///
/// The chain is `Fetched -> Cleaned -> Enriched -> Categorized -> Exported`,
/// with `Failed` as a parallel terminal state reachable from any non-terminal
/// one. Status only ever moves forward; see [`Transaction::advanced`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Fetched,
    Cleaned,
    Enriched,
    Categorized,
    Exported,
    Failed,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Exported | Status::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Status::Fetched => 0,
            Status::Cleaned => 1,
            Status::Enriched => 2,
            Status::Categorized => 3,
            Status::Exported => 4,
            Status::Failed => 5,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Fetched => "fetched",
            Status::Cleaned => "cleaned",
            Status::Enriched => "enriched",
            Status::Categorized => "categorized",
            Status::Exported => "exported",
            Status::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Where a category label came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategorySource {
    Remote,
    Rules,
}

impl fmt::Display for CategorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategorySource::Remote => write!(f, "remote"),
            CategorySource::Rules => write!(f, "rules"),
        }
    }
}

/// Email metadata attached to a transaction by the context lookup stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailContext {
    pub subject: String,
    pub snippet: String,
}

/// A categorization guess with the categorizer's confidence in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryGuess {
    pub category: String,
    pub confidence: f64,
}

/// One financial transaction flowing through the pipeline.
///
/// Transactions are immutable values: every mutation consumes the value and
/// returns a new one, so no two concurrent workers ever observe the same
/// item. Ownership transfers through the stage channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub date: NaiveDate,
    pub amount: f64,
    pub description: String,
    pub cleaned_description: Option<String>,
    pub email_subject: Option<String>,
    pub email_snippet: Option<String>,
    pub category: Option<String>,
    pub category_confidence: Option<f64>,
    pub category_source: Option<CategorySource>,
    pub status: Status,
}

impl Transaction {
    pub fn new(date: NaiveDate, amount: f64, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            date,
            amount,
            description: description.into(),
            cleaned_description: None,
            email_subject: None,
            email_snippet: None,
            category: None,
            category_confidence: None,
            category_source: None,
            status: Status::Fetched,
        }
    }

    /// Advance the status tag. Regress attempts and updates to a terminal
    /// item are ignored, which keeps the observed status sequence
    /// non-decreasing regardless of stage ordering mistakes.
    pub fn advanced(mut self, next: Status) -> Self {
        if !self.status.is_terminal()
            && (next == Status::Failed || next.rank() > self.status.rank())
        {
            self.status = next;
        }
        self
    }

    pub fn with_cleaned_description(mut self, cleaned: impl Into<String>) -> Self {
        self.cleaned_description = Some(cleaned.into());
        self
    }

    pub fn with_email_context(mut self, context: EmailContext) -> Self {
        self.email_subject = Some(context.subject);
        self.email_snippet = Some(context.snippet);
        self
    }

    pub fn with_category(mut self, guess: CategoryGuess, source: CategorySource) -> Self {
        self.category = Some(guess.category);
        self.category_confidence = Some(guess.confidence);
        self.category_source = Some(source);
        self
    }

    /// The text categorization should match against: the cleaned description
    /// when cleaning has run, the raw one otherwise.
    pub fn match_text(&self) -> &str {
        self.cleaned_description
            .as_deref()
            .unwrap_or(&self.description)
    }

    pub fn email_context(&self) -> Option<EmailContext> {
        match (&self.email_subject, &self.email_snippet) {
            (Some(subject), Some(snippet)) => Some(EmailContext {
                subject: subject.clone(),
                snippet: snippet.clone(),
            }),
            _ => None,
        }
    }
}

impl PipelineItem for Transaction {
    fn id(&self) -> Uuid {
        self.id
    }

    fn into_failed(self) -> Self {
        self.advanced(Status::Failed)
    }
}
