use crate::constants::{AI_ERROR_SENTINEL, NORMALIZED_COLUMNS};
use serde::{Deserialize, Serialize};

/// Study document as returned by the registry API. No schema is assumed.
pub type RawStudy = serde_json::Value;

/// One page of the registry's paginated `/studies` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyPage {
    #[serde(default)]
    pub studies: Vec<RawStudy>,
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub total_count: Option<u64>,
}

impl StudyPage {
    /// Token for the following page, treating an empty token as exhausted.
    pub fn next_token(&self) -> Option<&str> {
        self.next_page_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Flat row derived from one study. Every field is always populated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub nct_id: String,
    pub brief_title: String,
    pub official_title: String,
    pub overall_status: String,
    pub minimum_age: String,
    pub maximum_age: String,
    pub study_type: String,
    pub phases: String,
    pub start_date: String,
    pub start_year: String,
    pub gender: String,
    pub brief_summary: String,
    pub detailed_description: String,
    pub criteria: String,
    pub locations: String,
    pub interventions: String,
    pub min_age_in_months: Option<u32>,
    pub max_age_in_months: Option<u32>,
}

impl NormalizedRow {
    /// Look up a field by its column name.
    pub fn field(&self, name: &str) -> Option<String> {
        let value = match name {
            "nct_id" => self.nct_id.clone(),
            "brief_title" => self.brief_title.clone(),
            "official_title" => self.official_title.clone(),
            "overall_status" => self.overall_status.clone(),
            "minimum_age" => self.minimum_age.clone(),
            "maximum_age" => self.maximum_age.clone(),
            "study_type" => self.study_type.clone(),
            "phases" => self.phases.clone(),
            "start_date" => self.start_date.clone(),
            "start_year" => self.start_year.clone(),
            "gender" => self.gender.clone(),
            "brief_summary" => self.brief_summary.clone(),
            "detailed_description" => self.detailed_description.clone(),
            "criteria" => self.criteria.clone(),
            "locations" => self.locations.clone(),
            "interventions" => self.interventions.clone(),
            "min_age_in_months" => optional_to_cell(self.min_age_in_months),
            "max_age_in_months" => optional_to_cell(self.max_age_in_months),
            _ => return None,
        };
        Some(value)
    }

    /// Cell values in `NORMALIZED_COLUMNS` order.
    pub fn values(&self) -> Vec<String> {
        NORMALIZED_COLUMNS
            .iter()
            .map(|name| self.field(name).unwrap_or_default())
            .collect()
    }
}

fn optional_to_cell(value: Option<u32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Outcome of enrichment for a single row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AiValue {
    /// The model returned classification text.
    Classified(String),
    /// The call was made and failed; the reason is kept for logging.
    Failed(String),
    /// The row never entered the requested state (AI disabled, capped, or not allow-listed).
    Absent,
}

impl AiValue {
    /// Text written to the AI column.
    pub fn cell(&self) -> String {
        match self {
            AiValue::Classified(text) => text.clone(),
            AiValue::Failed(_) => AI_ERROR_SENTINEL.to_string(),
            AiValue::Absent => String::new(),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, AiValue::Absent)
    }
}

/// A normalized row with its enrichment outcome attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRow {
    pub row: NormalizedRow,
    pub ai: AiValue,
}

impl EnrichedRow {
    pub fn unenriched(row: NormalizedRow) -> Self {
        Self {
            row,
            ai: AiValue::Absent,
        }
    }

    /// Cell values for output. The AI cell is appended only when the column is emitted.
    pub fn values(&self, include_ai_column: bool) -> Vec<String> {
        let mut values = self.row.values();
        if include_ai_column {
            values.push(self.ai.cell());
        }
        values
    }
}
