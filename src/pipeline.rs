use crate::ai::{AiClassifier, ClassifierStats};
use crate::apis::ctgov::{StudyPageSource, StudyPager};
use crate::config::{PageErrorPolicy, PipelineConfig};
use crate::constants::NORMALIZED_COLUMNS;
use crate::error::Result;
use crate::normalize::normalize_study;
use crate::output::RowSink;
use crate::types::EnrichedRow;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Result of a complete pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub pages_fetched: usize,
    pub total_rows: usize,
    pub ai_model: Option<String>,
    pub ai: Option<ClassifierStats>,
    pub duration_secs: f64,
    pub output: String,
    /// Page index whose fetch failed; rows from earlier pages were still written.
    pub truncated_at_page: Option<usize>,
    pub fetch_error: Option<String>,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.truncated_at_page.is_none()
    }
}

/// Output header: the normalized columns, then the AI column when enrichment is on.
pub fn output_header(config: &PipelineConfig) -> Vec<String> {
    let mut header: Vec<String> = NORMALIZED_COLUMNS.iter().map(|c| c.to_string()).collect();
    if config.ai_processing.enabled {
        header.push(config.ai_processing.column_name.clone());
    }
    header
}

pub struct Pipeline;

impl Pipeline {
    /// Fetch every page, normalize and enrich each study, and write rows in order.
    ///
    /// Rows are written as each page is processed. On a page fetch error the rows
    /// from earlier pages are always finalized; `ctgov.on_page_error` decides
    /// whether the run then reports a truncated summary or returns the error.
    /// Output is abandoned only when the sink itself fails.
    #[instrument(skip_all, fields(filter = %config.ctgov.filter_advanced.joined()))]
    pub async fn run(
        config: &PipelineConfig,
        source: &dyn StudyPageSource,
        mut classifier: Option<&mut AiClassifier>,
        sink: &mut dyn RowSink,
    ) -> Result<RunSummary> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let t_run = Instant::now();
        let include_ai = config.ai_processing.enabled;

        info!(run_id = %run_id, ai_enabled = include_ai, "🚀 Starting ETL run");
        counter!("ctgov_runs_total").increment(1);

        if let Err(e) = sink.begin(&output_header(config)) {
            return Err(abandon(sink, e));
        }

        let mut pager = StudyPager::new(source, config.ctgov.max_pages);
        let mut total_rows = 0usize;
        let mut truncated_at_page = None;
        let mut fetch_error = None;

        while let Some(page) = pager.next_page().await {
            let studies = match page {
                Ok(studies) => studies,
                Err(e) => {
                    let failed_page = pager.pages_fetched() + 1;
                    counter!("ctgov_page_errors_total").increment(1);
                    match config.ctgov.on_page_error {
                        PageErrorPolicy::Abort => {
                            error!(
                                page = failed_page,
                                rows_written = total_rows,
                                error = %e,
                                "❌ Aborting run after page error"
                            );
                            if let Err(finish_err) = sink.finish() {
                                return Err(abandon(sink, finish_err));
                            }
                            return Err(e);
                        }
                        PageErrorPolicy::EmitPartial => {
                            warn!(
                                page = failed_page,
                                rows_written = total_rows,
                                error = %e,
                                "⚠️ Emitting partial output after page error"
                            );
                            truncated_at_page = Some(failed_page);
                            fetch_error = Some(e.to_string());
                            break;
                        }
                    }
                }
            };

            let t_page = Instant::now();
            for raw in &studies {
                let row = normalize_study(raw);
                let enriched = match classifier.as_deref_mut() {
                    Some(classifier) => classifier.enrich(row).await,
                    None => EnrichedRow::unenriched(row),
                };
                if let Err(e) = sink.write_row(&enriched.values(include_ai)) {
                    return Err(abandon(sink, e));
                }
                total_rows += 1;
            }
            counter!("ctgov_rows_written_total").increment(studies.len() as u64);
            histogram!("ctgov_page_duration_seconds").record(t_page.elapsed().as_secs_f64());
            info!(page = pager.pages_fetched(), rows = studies.len(), total_rows, "✅ Page written");
        }

        if let Err(e) = sink.finish() {
            return Err(abandon(sink, e));
        }

        let duration_secs = t_run.elapsed().as_secs_f64();
        histogram!("ctgov_run_duration_seconds").record(duration_secs);

        let summary = RunSummary {
            run_id,
            started_at,
            pages_fetched: pager.pages_fetched(),
            total_rows,
            ai_model: classifier.as_ref().map(|c| c.model_name().to_string()),
            ai: classifier.as_ref().map(|c| c.stats().clone()),
            duration_secs,
            output: config.output.csv_filename.display().to_string(),
            truncated_at_page,
            fetch_error,
        };
        log_summary(&summary);
        Ok(summary)
    }
}

fn abandon(sink: &mut dyn RowSink, cause: crate::error::EtlError) -> crate::error::EtlError {
    if let Err(e) = sink.abandon() {
        warn!(error = %e, "Failed to discard partial output");
    }
    cause
}

fn log_summary(summary: &RunSummary) {
    info!(
        run_id = %summary.run_id,
        pages = summary.pages_fetched,
        rows = summary.total_rows,
        duration_secs = summary.duration_secs,
        output = %summary.output,
        "📊 Run finished"
    );
    if let Some(stats) = &summary.ai {
        info!(
            requested = stats.requested,
            succeeded = stats.succeeded,
            failed = stats.failed,
            skipped = stats.skipped,
            "🤖 AI enrichment"
        );
    }
    if let Some(page) = summary.truncated_at_page {
        warn!(page, "Output is partial: pagination stopped at page {}", page);
    }
}
