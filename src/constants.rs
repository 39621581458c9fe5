/// Closed set of category labels the enricher will ever emit. Both the
/// remote categorizer responses and the rule fallback are constrained to
/// this list by the rule table in `categorize::rules`.
pub const CATEGORY_LABELS: [&str; 10] = [
    "Food & Dining",
    "Groceries",
    "Transportation",
    "Shopping",
    "Entertainment",
    "Bills & Utilities",
    "Health & Fitness",
    "Travel",
    "Income",
    "Uncategorized",
];

pub const UNCATEGORIZED: &str = "Uncategorized";

// Pipeline tuning defaults, overridable via config file or CLI flags.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_DEADLINE_SECS: u64 = 300;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_FILE_PREFIX: &str = "transactions";
