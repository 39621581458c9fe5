use async_trait::async_trait;

use super::Categorizer;
use crate::constants::UNCATEGORIZED;
use crate::error::ItemError;
use crate::types::{CategoryGuess, EmailContext};

// First matching rule wins, so more specific merchants sit above the broad
// buckets they would otherwise fall into (UBER EATS before UBER).
const KEYWORD_RULES: &[(&str, &[&str])] = &[
    (
        "Food & Dining",
        &[
            "MCDONALD", "STARBUCKS", "CHIPOTLE", "SUBWAY", "DOORDASH", "GRUBHUB", "UBER EATS",
            "RESTAURANT", "PIZZA", "CAFE", "COFFEE", "BURGER", "TACO", "DELI",
        ],
    ),
    (
        "Groceries",
        &[
            "SAFEWAY", "KROGER", "TRADER JOE", "WHOLE FOODS", "COSTCO", "GROCERY", "MARKET",
            "QFC", "ALBERTSONS",
        ],
    ),
    (
        "Transportation",
        &[
            "SHELL", "CHEVRON", "EXXON", "ARCO", "UBER", "LYFT", "PARKING", "FUEL", "GAS STATION",
            "METRO", "TRANSIT", "TOLL",
        ],
    ),
    (
        "Shopping",
        &[
            "AMAZON", "AMZN", "TARGET", "WALMART", "EBAY", "ETSY", "BEST BUY", "NORDSTROM",
            "IKEA",
        ],
    ),
    (
        "Entertainment",
        &[
            "NETFLIX", "SPOTIFY", "HULU", "DISNEY", "CINEMA", "THEATRE", "STEAM", "TICKETMASTER",
        ],
    ),
    (
        "Bills & Utilities",
        &[
            "COMCAST", "XFINITY", "VERIZON", "T-MOBILE", "AT&T", "ELECTRIC", "WATER", "INTERNET",
            "INSURANCE", "UTILITY",
        ],
    ),
    (
        "Health & Fitness",
        &[
            "WALGREENS", "CVS", "PHARMACY", "RITE AID", "GYM", "FITNESS", "CLINIC", "DENTAL",
            "MEDICAL",
        ],
    ),
    (
        "Travel",
        &[
            "AIRLINES", "DELTA", "ALASKA AIR", "UNITED", "HOTEL", "MARRIOTT", "AIRBNB", "EXPEDIA",
            "HERTZ", "AMTRAK",
        ],
    ),
    (
        "Income",
        &["PAYROLL", "DIRECT DEP", "DEPOSIT", "REFUND", "INTEREST PAID"],
    ),
];

// Confidence assigned to keyword hits vs. the catch-all default.
const KEYWORD_CONFIDENCE: f64 = 0.9;
const DEFAULT_CONFIDENCE: f64 = 0.2;

/// Deterministic keyword categorizer. Serves as the fallback when the remote
/// categorizer is unavailable, and as the primary in offline runs. Every
/// label it emits comes from the closed set in [`crate::constants`].
pub struct RuleCategorizer;

impl RuleCategorizer {
    pub fn new() -> Self {
        Self
    }

    pub fn label_for(text: &str) -> (&'static str, f64) {
        let haystack = text.to_uppercase();
        for (label, keywords) in KEYWORD_RULES {
            if keywords.iter().any(|keyword| haystack.contains(keyword)) {
                return (label, KEYWORD_CONFIDENCE);
            }
        }
        (UNCATEGORIZED, DEFAULT_CONFIDENCE)
    }
}

impl Default for RuleCategorizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Categorizer for RuleCategorizer {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn categorize(
        &self,
        description: &str,
        _context: Option<&EmailContext>,
    ) -> Result<CategoryGuess, ItemError> {
        let (label, confidence) = Self::label_for(description);
        Ok(CategoryGuess {
            category: label.to_string(),
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CATEGORY_LABELS;

    #[test]
    fn known_merchants_map_to_their_buckets() {
        assert_eq!(RuleCategorizer::label_for("MCDONALDS #4521").0, "Food & Dining");
        assert_eq!(RuleCategorizer::label_for("SHELL OIL 5731").0, "Transportation");
        assert_eq!(RuleCategorizer::label_for("AMAZON MKTPLACE PMTS").0, "Shopping");
        assert_eq!(RuleCategorizer::label_for("TRADER JOES 102").0, "Groceries");
    }

    #[test]
    fn specific_merchants_win_over_broad_buckets() {
        assert_eq!(RuleCategorizer::label_for("UBER EATS ORDER").0, "Food & Dining");
        assert_eq!(RuleCategorizer::label_for("UBER TRIP").0, "Transportation");
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(RuleCategorizer::label_for("starbucks seattle").0, "Food & Dining");
    }

    #[test]
    fn unknown_descriptions_get_the_default_label() {
        let (label, confidence) = RuleCategorizer::label_for("ACME WIDGET CO");
        assert_eq!(label, UNCATEGORIZED);
        assert!(confidence < KEYWORD_CONFIDENCE);
    }

    #[test]
    fn every_rule_label_is_in_the_closed_set() {
        for (label, _) in KEYWORD_RULES {
            assert!(
                CATEGORY_LABELS.contains(label),
                "rule label '{label}' is not in the closed category set"
            );
        }
        assert!(CATEGORY_LABELS.contains(&UNCATEGORIZED));
    }
}
