use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::types::Transaction;

/// Raw CSV row shape: `date, amount, description`. Amounts are kept as text
/// so bank-style formatting (`$1,234.56`, parenthesized negatives) can be
/// handled here instead of failing deserialization.
#[derive(Debug, Deserialize)]
struct RawRow {
    date: String,
    amount: String,
    description: String,
}

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y", "%d %b %Y"];

/// Result of loading a transaction source: the parseable rows plus a count
/// of rejected ones for the run summary.
#[derive(Debug)]
pub struct SourceBatch {
    pub transactions: Vec<Transaction>,
    pub rejected: usize,
}

pub struct CsvSource;

impl CsvSource {
    /// Read every row of the input file, keeping what parses and logging a
    /// diagnostic per rejected row. One bad row never fails the load.
    pub fn load(path: &str) -> Result<SourceBatch> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut transactions = Vec::new();
        let mut rejected = 0usize;

        for (index, row) in reader.deserialize::<RawRow>().enumerate() {
            // +2: one for the header row, one for 1-based numbering
            let line = index + 2;
            match row {
                Ok(raw) => match parse_row(raw) {
                    Ok(transaction) => transactions.push(transaction),
                    Err(reason) => {
                        rejected += 1;
                        warn!(line, %reason, "rejected malformed row");
                    }
                },
                Err(err) => {
                    rejected += 1;
                    warn!(line, error = %err, "rejected unreadable row");
                }
            }
        }

        info!(
            loaded = transactions.len(),
            rejected,
            source = path,
            "loaded transaction source"
        );
        Ok(SourceBatch {
            transactions,
            rejected,
        })
    }
}

fn parse_row(raw: RawRow) -> std::result::Result<Transaction, String> {
    let date = parse_date(raw.date.trim())
        .ok_or_else(|| format!("unparseable date '{}'", raw.date.trim()))?;
    let amount = parse_amount(raw.amount.trim())
        .ok_or_else(|| format!("unparseable amount '{}'", raw.amount.trim()))?;
    let description = raw.description.trim();
    if description.is_empty() {
        return Err("empty description".to_string());
    }
    Ok(Transaction::new(date, amount, description))
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

fn parse_amount(text: &str) -> Option<f64> {
    let (text, negated) = match text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        Some(inner) => (inner, true),
        None => (text, false),
    };
    let cleaned = text.trim().trim_start_matches('$').replace(',', "");
    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negated { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_well_formed_rows() {
        let file = write_csv(
            "date,amount,description\n\
             2024-03-15,$25.50,MCDONALDS #4521\n\
             03/16/2024,\"1,045.75\",PAYROLL DIRECT DEP\n",
        );
        let batch = CsvSource::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(batch.transactions.len(), 2);
        assert_eq!(batch.rejected, 0);
        assert_eq!(batch.transactions[0].amount, 25.50);
        assert_eq!(batch.transactions[1].amount, 1045.75);
    }

    #[test]
    fn rejects_malformed_rows_without_failing_the_load() {
        let file = write_csv(
            "date,amount,description\n\
             not-a-date,25.50,MCDONALDS\n\
             2024-03-15,not-money,SHELL\n\
             2024-03-15,12.00,   \n\
             2024-03-15,45.75,SHELL OIL\n",
        );
        let batch = CsvSource::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(batch.transactions.len(), 1);
        assert_eq!(batch.rejected, 3);
        assert_eq!(batch.transactions[0].description, "SHELL OIL");
    }

    #[test]
    fn parses_bank_style_amounts() {
        assert_eq!(parse_amount("$25.50"), Some(25.50));
        assert_eq!(parse_amount("1,234.56"), Some(1234.56));
        assert_eq!(parse_amount("($12.00)"), Some(-12.00));
        assert_eq!(parse_amount("-3.25"), Some(-3.25));
        assert_eq!(parse_amount("garbage"), None);
    }

    #[test]
    fn parses_common_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(parse_date("2024-03-15"), Some(expected));
        assert_eq!(parse_date("03/15/2024"), Some(expected));
        assert_eq!(parse_date("15 Mar 2024"), Some(expected));
        assert_eq!(parse_date("yesterday"), None);
    }
}
