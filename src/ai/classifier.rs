use crate::ai::gemini::GenerativeModelPort;
use crate::ai::prompt::PromptTemplate;
use crate::ai::rate_limiter::{FixedDelay, RateLimiterPort, TokenBucket};
use crate::config::PipelineConfig;
use crate::error::{EtlError, Result};
use crate::types::{AiValue, EnrichedRow, NormalizedRow};
use metrics::counter;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Lifecycle of one row through the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    Pending,
    Requested,
    Succeeded,
    Failed,
}

/// Which rows are eligible for enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiSelection {
    All,
    /// Only rows whose NCT ID is listed (debug mode).
    AllowList(HashSet<String>),
    None,
}

impl AiSelection {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let ai = &config.ai_processing;
        if !ai.enabled {
            AiSelection::None
        } else if ai.debug_only_tuning_trials {
            AiSelection::AllowList(
                config
                    .tuning_trials
                    .iter()
                    .map(|id| id.trim().to_string())
                    .collect(),
            )
        } else {
            AiSelection::All
        }
    }

    pub fn admits(&self, nct_id: &str) -> bool {
        match self {
            AiSelection::All => true,
            AiSelection::AllowList(ids) => ids.contains(nct_id),
            AiSelection::None => false,
        }
    }
}

/// Admits only the first `limit` rows seen, in pipeline order.
#[derive(Debug, Clone)]
pub struct RowCap {
    limit: Option<usize>,
    seen: usize,
}

impl RowCap {
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit, seen: 0 }
    }

    pub fn admit(&mut self) -> bool {
        let position = self.seen;
        self.seen += 1;
        self.limit.map_or(true, |limit| position < limit)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassifierStats {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Enriches rows one at a time through a generative model, pacing calls with a rate limiter.
pub struct AiClassifier {
    model: Box<dyn GenerativeModelPort>,
    limiter: Box<dyn RateLimiterPort>,
    template: PromptTemplate,
    selection: AiSelection,
    cap: RowCap,
    stats: ClassifierStats,
}

impl AiClassifier {
    pub fn new(
        model: Box<dyn GenerativeModelPort>,
        limiter: Box<dyn RateLimiterPort>,
        template: PromptTemplate,
        selection: AiSelection,
        max_rows: Option<usize>,
    ) -> Self {
        Self {
            model,
            limiter,
            template,
            selection,
            cap: RowCap::new(max_rows),
            stats: ClassifierStats::default(),
        }
    }

    /// Build the classifier for a run. The model client is created once by the caller.
    pub fn from_config(config: &PipelineConfig, model: Box<dyn GenerativeModelPort>) -> Result<Self> {
        let template_text = config
            .gemini
            .row_prompt_template
            .as_deref()
            .ok_or_else(|| EtlError::Config("gemini.row_prompt_template is not set".into()))?;
        let template = PromptTemplate::parse(template_text)
            .map_err(|e| EtlError::Config(format!("gemini.row_prompt_template: {}", e)))?;

        let limiter: Box<dyn RateLimiterPort> = match config.gemini.requests_per_minute {
            Some(rpm) => Box::new(TokenBucket::per_minute(rpm)),
            None => Box::new(FixedDelay::new(config.gemini.api_delay())),
        };

        Ok(Self::new(
            model,
            limiter,
            template,
            AiSelection::from_config(config),
            config.ai_processing.max_rows,
        ))
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    pub fn stats(&self) -> &ClassifierStats {
        &self.stats
    }

    /// Attach an enrichment outcome to a row.
    ///
    /// Rows past the cap or outside the selection skip the model entirely and
    /// carry an absent value. Failures never propagate; they become a sentinel.
    pub async fn enrich(&mut self, row: NormalizedRow) -> EnrichedRow {
        let within_cap = self.cap.admit();
        if !within_cap || !self.selection.admits(&row.nct_id) {
            self.stats.skipped += 1;
            debug!(nct_id = %row.nct_id, within_cap, "Skipping enrichment");
            return EnrichedRow::unenriched(row);
        }

        let index = self.stats.requested + 1;
        let (state, ai) = self.classify(&row).await;
        match state {
            RowState::Succeeded => {
                self.stats.succeeded += 1;
                info!(index, nct_id = %row.nct_id, "Classified ✓");
            }
            _ => {
                self.stats.failed += 1;
                if let AiValue::Failed(reason) = &ai {
                    warn!(index, nct_id = %row.nct_id, error = %reason, "Classification failed ✗");
                }
            }
        }
        EnrichedRow { row, ai }
    }

    /// Issue one model call for `row`, then wait on the rate limiter.
    async fn classify(&mut self, row: &NormalizedRow) -> (RowState, AiValue) {
        let mut state = RowState::Pending;
        let prompt = self.template.render(row);

        state = advance(state, RowState::Requested);
        self.stats.requested += 1;
        let result = self.model.generate(&prompt).await;

        let outcome = match result {
            Ok(text) => {
                counter!("ctgov_ai_rows_total", "outcome" => "succeeded").increment(1);
                (advance(state, RowState::Succeeded), AiValue::Classified(text))
            }
            Err(e) => {
                counter!("ctgov_ai_rows_total", "outcome" => "failed").increment(1);
                (advance(state, RowState::Failed), AiValue::Failed(e.to_string()))
            }
        };

        self.limiter.acquire().await;
        outcome
    }
}

fn advance(from: RowState, to: RowState) -> RowState {
    debug_assert!(matches!(
        (from, to),
        (RowState::Pending, RowState::Requested)
            | (RowState::Requested, RowState::Succeeded)
            | (RowState::Requested, RowState::Failed)
    ));
    to
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::error::AiError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct EchoModel {
        prompts: Arc<tokio::sync::Mutex<Vec<String>>>,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl GenerativeModelPort for EchoModel {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, prompt: &str) -> std::result::Result<String, AiError> {
            let mut prompts = self.prompts.lock().await;
            prompts.push(prompt.to_string());
            if Some(prompts.len()) == self.fail_on {
                return Err(AiError::Network("connection reset".into()));
            }
            Ok(format!("label for {}", prompt))
        }
    }

    struct CountingLimiter(Arc<AtomicUsize>);

    #[async_trait]
    impl RateLimiterPort for CountingLimiter {
        async fn acquire(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn row(id: &str) -> NormalizedRow {
        NormalizedRow {
            nct_id: id.to_string(),
            ..Default::default()
        }
    }

    fn classifier(
        selection: AiSelection,
        max_rows: Option<usize>,
        fail_on: Option<usize>,
    ) -> (AiClassifier, Arc<tokio::sync::Mutex<Vec<String>>>, Arc<AtomicUsize>) {
        let prompts = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let waits = Arc::new(AtomicUsize::new(0));
        let classifier = AiClassifier::new(
            Box::new(EchoModel {
                prompts: prompts.clone(),
                fail_on,
            }),
            Box::new(CountingLimiter(waits.clone())),
            PromptTemplate::parse("{nct_id}").unwrap(),
            selection,
            max_rows,
        );
        (classifier, prompts, waits)
    }

    #[test]
    fn test_row_cap_admits_first_n() {
        let mut cap = RowCap::new(Some(2));
        let admitted: Vec<bool> = (0..4).map(|_| cap.admit()).collect();
        assert_eq!(admitted, vec![true, true, false, false]);

        let mut zero = RowCap::new(Some(0));
        assert!(!zero.admit());

        let mut unlimited = RowCap::new(None);
        assert!((0..100).all(|_| unlimited.admit()));
    }

    #[tokio::test]
    async fn test_enrich_all_rows() {
        let (mut classifier, prompts, waits) = classifier(AiSelection::All, None, None);
        for id in ["NCT1", "NCT2", "NCT3"] {
            let enriched = classifier.enrich(row(id)).await;
            assert_eq!(enriched.ai, AiValue::Classified(format!("label for {}", id)));
        }
        assert_eq!(prompts.lock().await.len(), 3);
        assert_eq!(waits.load(Ordering::SeqCst), 3);
        assert_eq!(
            classifier.stats(),
            &ClassifierStats {
                requested: 3,
                succeeded: 3,
                failed: 0,
                skipped: 0
            }
        );
    }

    #[tokio::test]
    async fn test_row_cap_leaves_remaining_rows_absent() {
        let (mut classifier, prompts, _) = classifier(AiSelection::All, Some(2), None);
        let mut values = Vec::new();
        for id in ["NCT1", "NCT2", "NCT3", "NCT4"] {
            values.push(classifier.enrich(row(id)).await.ai);
        }
        assert!(matches!(values[0], AiValue::Classified(_)));
        assert!(matches!(values[1], AiValue::Classified(_)));
        assert_eq!(values[2], AiValue::Absent);
        assert_eq!(values[3], AiValue::Absent);
        assert_eq!(*prompts.lock().await, vec!["NCT1", "NCT2"]);
        assert_eq!(classifier.stats().skipped, 2);
    }

    #[tokio::test]
    async fn test_failure_is_local_and_still_paced() {
        let (mut classifier, _, waits) = classifier(AiSelection::All, None, Some(2));
        let first = classifier.enrich(row("NCT1")).await;
        let second = classifier.enrich(row("NCT2")).await;
        let third = classifier.enrich(row("NCT3")).await;

        assert!(matches!(first.ai, AiValue::Classified(_)));
        assert!(matches!(second.ai, AiValue::Failed(ref reason) if reason.contains("connection reset")));
        assert!(matches!(third.ai, AiValue::Classified(_)));
        assert_eq!(waits.load(Ordering::SeqCst), 3);
        assert_eq!(classifier.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_allow_list_applies_after_cap() {
        let allow: HashSet<String> = ["NCT2", "NCT4"].iter().map(|s| s.to_string()).collect();
        let (mut classifier, prompts, _) = classifier(AiSelection::AllowList(allow), Some(3), None);
        let mut values = Vec::new();
        for id in ["NCT1", "NCT2", "NCT3", "NCT4"] {
            values.push(classifier.enrich(row(id)).await.ai);
        }
        // NCT4 is allow-listed but falls outside the first three rows
        assert_eq!(*prompts.lock().await, vec!["NCT2"]);
        assert_eq!(values[0], AiValue::Absent);
        assert!(matches!(values[1], AiValue::Classified(_)));
        assert_eq!(values[3], AiValue::Absent);
    }

    #[tokio::test]
    async fn test_selection_none_never_calls_model() {
        let (mut classifier, prompts, waits) = classifier(AiSelection::None, None, None);
        let enriched = classifier.enrich(row("NCT1")).await;
        assert!(enriched.ai.is_absent());
        assert!(prompts.lock().await.is_empty());
        assert_eq!(waits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_selection_from_config() {
        let mut config = PipelineConfig::from_toml_str(
            "tuning_trials = [\" NCT9 \"]\n[ctgov]\nfilter_advanced = \"x\"\n",
        )
        .unwrap();
        assert_eq!(AiSelection::from_config(&config), AiSelection::All);

        config.ai_processing.debug_only_tuning_trials = true;
        let selection = AiSelection::from_config(&config);
        assert!(selection.admits("NCT9"));
        assert!(!selection.admits("NCT1"));

        config.ai_processing.enabled = false;
        assert_eq!(AiSelection::from_config(&config), AiSelection::None);
    }

    #[test]
    fn test_from_config_rejects_bad_template() {
        let config = PipelineConfig::from_toml_str(
            "[ctgov]\nfilter_advanced = \"x\"\n[gemini]\nmodel = \"m\"\nrow_prompt_template = \"{bogus}\"\n",
        )
        .unwrap();
        let model = Box::new(EchoModel {
            prompts: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            fail_on: None,
        });
        let err = AiClassifier::from_config(&config, model).err().unwrap();
        assert!(matches!(err, EtlError::Config(msg) if msg.contains("bogus")));
    }
}
