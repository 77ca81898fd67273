/// Defaults and fixed names shared across the pipeline.

// Registry API
pub const DEFAULT_CTGOV_API_URL: &str = "https://clinicaltrials.gov/api/v2/studies";
pub const DEFAULT_PAGE_SIZE: u32 = 1000;
pub const MAX_PAGE_SIZE: u32 = 1000;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

// Generative model
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const DEFAULT_API_DELAY_SECS: f64 = 0.5;

// Output
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
pub const DEFAULT_CSV_FILENAME: &str = "clinical_trials_filtered.csv";
pub const DEFAULT_AI_COLUMN: &str = "ai_determined_value";
pub const DEFAULT_COMPARISONS_CSV: &str = "clinical_trials_comparisons.csv";

/// Written in place of a study identifier the registry did not supply.
pub const MISSING_NCT_ID: &str = "N/A";

/// Written to the AI column when the classification call failed.
pub const AI_ERROR_SENTINEL: &str = "AI_ERROR";

/// Column of the comparisons file consulted by the `filter` command.
pub const COMPARISON_ID_COLUMN: &str = "NCT_ID";

/// Normalized columns in output order. The AI column, when enabled, follows these.
pub const NORMALIZED_COLUMNS: [&str; 18] = [
    "nct_id",
    "brief_title",
    "official_title",
    "overall_status",
    "minimum_age",
    "maximum_age",
    "study_type",
    "phases",
    "start_date",
    "start_year",
    "gender",
    "brief_summary",
    "detailed_description",
    "criteria",
    "locations",
    "interventions",
    "min_age_in_months",
    "max_age_in_months",
];
