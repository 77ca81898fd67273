use crate::constants::{
    DEFAULT_AI_COLUMN, DEFAULT_API_DELAY_SECS, DEFAULT_API_KEY_ENV, DEFAULT_CSV_FILENAME,
    DEFAULT_CTGOV_API_URL, DEFAULT_GEMINI_BASE_URL, DEFAULT_PAGE_SIZE, DEFAULT_TIMEOUT_SECONDS,
    MAX_PAGE_SIZE, NORMALIZED_COLUMNS,
};
use crate::error::{EtlError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Run configuration. Loaded once at startup and never mutated afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub ctgov: CtGovConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub ai_processing: AiProcessingConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Debug allow-list of NCT IDs consulted when `debug_only_tuning_trials` is set.
    #[serde(default)]
    pub tuning_trials: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CtGovConfig {
    #[serde(default = "default_ctgov_api_url")]
    pub api_url: String,
    pub filter_advanced: FilterClauses,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub max_pages: Option<usize>,
    #[serde(default)]
    pub on_page_error: PageErrorPolicy,
}

impl CtGovConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// `filter.advanced` expression, given either whole or as a list of clauses.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum FilterClauses {
    Expression(String),
    Clauses(Vec<String>),
}

impl FilterClauses {
    /// The expression sent to the registry, with list clauses joined by `AND`.
    pub fn joined(&self) -> String {
        match self {
            FilterClauses::Expression(expr) => expr.trim().to_string(),
            FilterClauses::Clauses(clauses) => clauses
                .iter()
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>()
                .join(" AND "),
        }
    }
}

/// What to do when a page cannot be fetched after earlier pages succeeded.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PageErrorPolicy {
    /// Finalize output with the rows already fetched and report the truncation.
    #[default]
    EmitPartial,
    /// Finalize output with the rows already fetched, then fail the run.
    Abort,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiConfig {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub system_instruction: String,
    #[serde(default)]
    pub row_prompt_template: Option<String>,
    #[serde(default = "default_api_delay_secs")]
    pub api_delay_secs: f64,
    #[serde(default)]
    pub requests_per_minute: Option<u32>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            model: None,
            api_key_env: default_api_key_env(),
            system_instruction: String::new(),
            row_prompt_template: None,
            api_delay_secs: default_api_delay_secs(),
            requests_per_minute: None,
            timeout_seconds: default_timeout_seconds(),
            base_url: default_gemini_base_url(),
        }
    }
}

impl GeminiConfig {
    pub fn api_delay(&self) -> Duration {
        if self.api_delay_secs.is_finite() && self.api_delay_secs > 0.0 {
            Duration::from_secs_f64(self.api_delay_secs)
        } else {
            Duration::ZERO
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiProcessingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub max_rows: Option<usize>,
    #[serde(default = "default_ai_column")]
    pub column_name: String,
    #[serde(default)]
    pub debug_only_tuning_trials: bool,
}

impl Default for AiProcessingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_rows: None,
            column_name: default_ai_column(),
            debug_only_tuning_trials: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_csv_filename")]
    pub csv_filename: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            csv_filename: default_csv_filename(),
        }
    }
}

/// Command-line adjustments applied before the configuration is frozen.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub output: Option<PathBuf>,
    pub disable_ai: bool,
    pub max_ai_rows: Option<usize>,
}

impl PipelineConfig {
    /// Load from a `.toml`, `.yaml`/`.yml` or `.json` file, chosen by extension, and validate.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with(path, ConfigOverrides::default())
    }

    pub fn load_with(path: &Path, overrides: ConfigOverrides) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let config = match extension.as_str() {
            "json" => Self::from_json_str(&content)?,
            "yaml" | "yml" => Self::from_yaml_str(&content)?,
            _ => Self::from_toml_str(&content)?,
        };
        let config = config.with_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EtlError::Config(format!("Invalid TOML: {}", e)))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| EtlError::Config(format!("Invalid YAML: {}", e)))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| EtlError::Config(format!("Invalid JSON: {}", e)))
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(output) = overrides.output {
            self.output.csv_filename = output;
        }
        if overrides.disable_ai {
            self.ai_processing.enabled = false;
        }
        if overrides.max_ai_rows.is_some() {
            self.ai_processing.max_rows = overrides.max_ai_rows;
        }
        self
    }

    /// Check required keys and value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.ctgov.api_url.trim().is_empty() {
            return Err(EtlError::Config("ctgov.api_url must not be empty".into()));
        }
        if self.ctgov.filter_advanced.joined().is_empty() {
            return Err(EtlError::Config(
                "ctgov.filter_advanced must contain at least one clause".into(),
            ));
        }
        if self.ctgov.page_size == 0 || self.ctgov.page_size > MAX_PAGE_SIZE {
            return Err(EtlError::Config(format!(
                "ctgov.page_size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.ctgov.page_size
            )));
        }
        if self.ctgov.max_pages == Some(0) {
            return Err(EtlError::Config("ctgov.max_pages must be at least 1".into()));
        }

        let column = self.ai_processing.column_name.trim();
        if column.is_empty() {
            return Err(EtlError::Config(
                "ai_processing.column_name must not be empty".into(),
            ));
        }
        if NORMALIZED_COLUMNS.contains(&column) {
            return Err(EtlError::Config(format!(
                "ai_processing.column_name '{}' collides with a normalized column",
                column
            )));
        }

        if !self.ai_processing.enabled {
            return Ok(());
        }

        let gemini = &self.gemini;
        if gemini.model.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(EtlError::Config(
                "gemini.model is required when AI processing is enabled".into(),
            ));
        }
        if gemini
            .row_prompt_template
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
        {
            return Err(EtlError::Config(
                "gemini.row_prompt_template is required when AI processing is enabled".into(),
            ));
        }
        if !gemini.api_delay_secs.is_finite() || gemini.api_delay_secs < 0.0 {
            return Err(EtlError::Config(format!(
                "gemini.api_delay_secs must be a non-negative number, got {}",
                gemini.api_delay_secs
            )));
        }
        if gemini.requests_per_minute == Some(0) {
            return Err(EtlError::Config(
                "gemini.requests_per_minute must be at least 1".into(),
            ));
        }
        if self.ai_processing.debug_only_tuning_trials && self.tuning_trials.is_empty() {
            return Err(EtlError::Config(
                "debug_only_tuning_trials is set but tuning_trials is empty".into(),
            ));
        }
        Ok(())
    }

    /// Read the AI credential. Only an error when AI processing is enabled.
    pub fn resolve_api_key(&self) -> Result<Option<String>> {
        if !self.ai_processing.enabled {
            return Ok(None);
        }
        let name = &self.gemini.api_key_env;
        match std::env::var(name) {
            Ok(key) if !key.trim().is_empty() => Ok(Some(key)),
            _ => Err(EtlError::MissingCredential(name.clone())),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_ctgov_api_url() -> String {
    DEFAULT_CTGOV_API_URL.to_string()
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_api_delay_secs() -> f64 {
    DEFAULT_API_DELAY_SECS
}

fn default_gemini_base_url() -> String {
    DEFAULT_GEMINI_BASE_URL.to_string()
}

fn default_ai_column() -> String {
    DEFAULT_AI_COLUMN.to_string()
}

fn default_csv_filename() -> PathBuf {
    PathBuf::from(DEFAULT_CSV_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [ctgov]
        filter_advanced = "AREA[StudyType]INTERVENTIONAL"

        [ai_processing]
        enabled = false
    "#;

    const FULL: &str = r#"
        tuning_trials = ["NCT06695221", "NCT06964347"]

        [ctgov]
        api_url = "https://example.org/api/v2/studies"
        filter_advanced = [
            "AREA[StudyType]INTERVENTIONAL",
            "SEARCH[Location](AREA[LocationCountry]Canada)",
        ]
        page_size = 50
        on_page_error = "abort"

        [gemini]
        model = "gemini-2.5-flash"
        api_key_env = "CTGOV_ETL_TEST_KEY_FULL"
        system_instruction = "Classify the trial."
        row_prompt_template = "NCT ID: {nct_id}"
        api_delay_secs = 0.25

        [ai_processing]
        max_rows = 10
        column_name = "pregnancy_category"
        debug_only_tuning_trials = true

        [output]
        csv_filename = "out.csv"
    "#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = PipelineConfig::from_toml_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.ctgov.api_url, DEFAULT_CTGOV_API_URL);
        assert_eq!(config.ctgov.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.ctgov.on_page_error, PageErrorPolicy::EmitPartial);
        assert_eq!(config.ctgov.max_pages, None);
        assert_eq!(config.ctgov.timeout(), Duration::from_secs(DEFAULT_TIMEOUT_SECONDS));
        assert_eq!(config.ai_processing.column_name, DEFAULT_AI_COLUMN);
        assert_eq!(config.output.csv_filename, PathBuf::from(DEFAULT_CSV_FILENAME));
        assert_eq!(config.gemini.api_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_full_config_parses() {
        let config = PipelineConfig::from_toml_str(FULL).unwrap();
        config.validate().unwrap();

        assert_eq!(
            config.ctgov.filter_advanced.joined(),
            "AREA[StudyType]INTERVENTIONAL AND SEARCH[Location](AREA[LocationCountry]Canada)"
        );
        assert_eq!(config.ctgov.page_size, 50);
        assert_eq!(config.ctgov.on_page_error, PageErrorPolicy::Abort);
        assert_eq!(config.gemini.model.as_deref(), Some("gemini-2.5-flash"));
        assert_eq!(config.ai_processing.max_rows, Some(10));
        assert_eq!(config.tuning_trials.len(), 2);
    }

    #[test]
    fn test_missing_filter_is_rejected() {
        let err = PipelineConfig::from_toml_str("[ctgov]\npage_size = 10\n").unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn test_ai_enabled_requires_model_and_template() {
        let config = PipelineConfig::from_toml_str(
            "[ctgov]\nfilter_advanced = \"AREA[Phase]PHASE1\"\n",
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("gemini.model"));
    }

    #[test]
    fn test_page_size_bounds() {
        let config = PipelineConfig::from_toml_str(
            "[ctgov]\nfilter_advanced = \"x\"\npage_size = 5000\n[ai_processing]\nenabled = false\n",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ai_column_cannot_shadow_normalized_column() {
        let config = PipelineConfig::from_toml_str(
            "[ctgov]\nfilter_advanced = \"x\"\n[ai_processing]\nenabled = false\ncolumn_name = \"criteria\"\n",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credential_not_required_when_ai_disabled() {
        let mut config = PipelineConfig::from_toml_str(MINIMAL).unwrap();
        config.gemini.api_key_env = "CTGOV_ETL_TEST_KEY_NEVER_SET".into();
        assert_eq!(config.resolve_api_key().unwrap(), None);
    }

    #[test]
    fn test_credential_required_when_ai_enabled() {
        let mut config = PipelineConfig::from_toml_str(FULL).unwrap();
        config.gemini.api_key_env = "CTGOV_ETL_TEST_KEY_ALSO_NEVER_SET".into();
        let err = config.resolve_api_key().unwrap_err();
        assert!(matches!(err, EtlError::MissingCredential(name) if name == "CTGOV_ETL_TEST_KEY_ALSO_NEVER_SET"));
    }

    #[test]
    fn test_credential_read_from_env() {
        std::env::set_var("CTGOV_ETL_TEST_KEY_FULL", "secret");
        let config = PipelineConfig::from_toml_str(FULL).unwrap();
        assert_eq!(config.resolve_api_key().unwrap().as_deref(), Some("secret"));
    }

    #[test]
    fn test_overrides_apply_before_validation() {
        let config = PipelineConfig::from_toml_str(FULL)
            .unwrap()
            .with_overrides(ConfigOverrides {
                output: Some(PathBuf::from("elsewhere.csv")),
                disable_ai: true,
                max_ai_rows: Some(3),
            });
        assert!(!config.ai_processing.enabled);
        assert_eq!(config.ai_processing.max_rows, Some(3));
        assert_eq!(config.output.csv_filename, PathBuf::from("elsewhere.csv"));
    }

    #[test]
    fn test_load_json_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"ctgov": {{"filter_advanced": ["AREA[Sex]FEMALE", "AREA[Sex]ALL"]}}, "ai_processing": {{"enabled": false}}}}"#
        )
        .unwrap();

        let config = PipelineConfig::load(file.path()).unwrap();
        assert_eq!(config.ctgov.filter_advanced.joined(), "AREA[Sex]FEMALE AND AREA[Sex]ALL");
    }

    #[test]
    fn test_load_yaml_by_extension() {
        for suffix in [".yaml", ".yml"] {
            let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
            write!(
                file,
                "ctgov:\n  filter_advanced:\n    - AREA[StudyType]INTERVENTIONAL\n    - AREA[LocationCountry]Canada\n  page_size: 50\nai_processing:\n  enabled: false\noutput:\n  csv_filename: trials.csv\n"
            )
            .unwrap();

            let config = PipelineConfig::load(file.path()).unwrap();
            assert_eq!(
                config.ctgov.filter_advanced.joined(),
                "AREA[StudyType]INTERVENTIONAL AND AREA[LocationCountry]Canada"
            );
            assert_eq!(config.ctgov.page_size, 50);
            assert_eq!(config.output.csv_filename, PathBuf::from("trials.csv"));
        }
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = PipelineConfig::from_yaml_str("ctgov: [unclosed").unwrap_err();
        assert!(matches!(err, EtlError::Config(msg) if msg.contains("YAML")));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = PipelineConfig::load(Path::new("/nonexistent/ctgov_etl.toml")).unwrap_err();
        assert!(matches!(err, EtlError::Config(msg) if msg.contains("Failed to read config file")));
    }
}
