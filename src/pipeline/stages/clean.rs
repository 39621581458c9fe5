use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ItemError;
use crate::pipeline::stage::{StageResult, StageTransform};
use crate::types::{Status, Transaction};

// Card-processor noise commonly prefixed to statement descriptions
static CARD_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(pos debit|pos purchase|checkcard|debit card purchase|purchase authorized on \d{2}/\d{2})\s+")
        .expect("card noise pattern")
});
static STORE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"#\s*\d+").expect("store number pattern"));
static LONG_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{4,}\b").expect("digit run pattern"));
static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").expect("whitespace pattern"));

/// Strip terminal/processor noise from a raw statement description.
pub fn clean_description(raw: &str) -> String {
    let mut text = CARD_NOISE.replace(raw.trim(), "").into_owned();
    text = STORE_NUMBER.replace_all(&text, "").into_owned();
    text = LONG_DIGITS.replace_all(&text, "").into_owned();
    text = text.replace(&['*', '~', '|'][..], " ");
    text = MULTI_SPACE.replace_all(text.trim(), " ").into_owned();
    text.trim().to_string()
}

/// First stage: normalize the raw description. Records with nothing usable
/// in them are unprocessable and get dropped here rather than carried
/// through the rest of the chain.
pub struct CleanTransform;

impl CleanTransform {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CleanTransform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StageTransform<Transaction> for CleanTransform {
    fn name(&self) -> &'static str {
        "clean"
    }

    async fn apply(&self, transaction: Transaction) -> StageResult<Transaction> {
        if transaction.description.trim().is_empty() {
            return StageResult::Fatal(ItemError::malformed("empty description"));
        }
        if !transaction.amount.is_finite() {
            return StageResult::Fatal(ItemError::malformed(format!(
                "non-finite amount on {}",
                transaction.id
            )));
        }

        let mut cleaned = clean_description(&transaction.description);
        if cleaned.is_empty() {
            // Nothing survived the scrub; the raw text is still better than nothing
            cleaned = transaction.description.trim().to_string();
        }
        StageResult::Ok(
            transaction
                .with_cleaned_description(cleaned)
                .advanced(Status::Cleaned),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn txn(description: &str) -> Transaction {
        Transaction::new(
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            10.0,
            description,
        )
    }

    #[test]
    fn strips_store_numbers_and_reference_digits() {
        assert_eq!(clean_description("MCDONALDS #4521 SEATTLE"), "MCDONALDS SEATTLE");
        assert_eq!(clean_description("SHELL OIL 57444123948"), "SHELL OIL");
    }

    #[test]
    fn strips_processor_prefixes_and_separators() {
        assert_eq!(
            clean_description("POS DEBIT STARBUCKS *STORE 12345"),
            "STARBUCKS STORE"
        );
        assert_eq!(
            clean_description("PURCHASE AUTHORIZED ON 03/14 AMZN MKTP"),
            "AMZN MKTP"
        );
    }

    #[test]
    fn collapses_runs_of_whitespace() {
        assert_eq!(clean_description("  TRADER   JOE'S   "), "TRADER JOE'S");
    }

    #[tokio::test]
    async fn cleaning_advances_status_and_keeps_the_raw_text() {
        let result = CleanTransform::new()
            .apply(txn("MCDONALDS #4521 SEATTLE"))
            .await;
        match result {
            StageResult::Ok(cleaned) => {
                assert_eq!(cleaned.status, Status::Cleaned);
                assert_eq!(cleaned.description, "MCDONALDS #4521 SEATTLE");
                assert_eq!(cleaned.match_text(), "MCDONALDS SEATTLE");
            }
            _ => panic!("expected Ok"),
        }
    }

    #[tokio::test]
    async fn empty_descriptions_are_fatal() {
        let result = CleanTransform::new().apply(txn("   ")).await;
        assert!(matches!(result, StageResult::Fatal(_)));
    }

    #[tokio::test]
    async fn all_noise_descriptions_fall_back_to_the_raw_text() {
        let result = CleanTransform::new().apply(txn("#9999")).await;
        match result {
            StageResult::Ok(cleaned) => assert_eq!(cleaned.match_text(), "#9999"),
            _ => panic!("expected Ok"),
        }
    }
}
