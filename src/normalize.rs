//! Maps raw registry studies onto the flat output row.
//!
//! Normalization never fails: any absent or oddly typed field falls back to a
//! documented default (an empty cell, or `N/A` for the study identifier).

use crate::constants::MISSING_NCT_ID;
use crate::types::{NormalizedRow, RawStudy};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static AGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*(year|month|week|day|hour|minute)s?\s*$")
        .expect("age pattern is valid")
});

/// A possibly-missing value inside a loosely structured document.
///
/// Lookups on a missing value stay missing, so a whole path can be walked
/// without checking each step.
#[derive(Debug, Clone, Copy)]
pub struct Field<'a>(Option<&'a Value>);

impl<'a> Field<'a> {
    pub fn of(value: &'a Value) -> Self {
        Field(Some(value))
    }

    /// Step into an object member.
    pub fn at(self, key: &str) -> Self {
        Field(self.0.and_then(|v| v.get(key)))
    }

    /// Walk a dotted path of object members.
    pub fn path(self, dotted: &str) -> Self {
        dotted.split('.').fold(self, |field, key| field.at(key))
    }

    /// Scalar rendered as text, or `default` when absent, null or structured.
    pub fn text_or(self, default: &str) -> String {
        match self.0 {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => default.to_string(),
        }
    }

    pub fn text(self) -> String {
        self.text_or("")
    }

    /// Array elements, or an empty slice when the value is not an array.
    pub fn items(self) -> &'a [Value] {
        match self.0 {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        }
    }
}

/// Derive the flat row for one study. Pure: the same input always yields the same row.
pub fn normalize_study(study: &RawStudy) -> NormalizedRow {
    let protocol = Field::of(study).at("protocolSection");
    let identification = protocol.at("identificationModule");
    let status = protocol.at("statusModule");
    let design = protocol.at("designModule");
    let eligibility = protocol.at("eligibilityModule");
    let description = protocol.at("descriptionModule");

    let nct_id = identification.at("nctId").text().trim().to_string();
    let nct_id = if nct_id.is_empty() {
        MISSING_NCT_ID.to_string()
    } else {
        nct_id
    };

    let start_date = status.path("startDateStruct.date").text();
    let minimum_age = eligibility.at("minimumAge").text();
    let maximum_age = eligibility.at("maximumAge").text();

    NormalizedRow {
        nct_id,
        brief_title: identification.at("briefTitle").text(),
        official_title: identification.at("officialTitle").text(),
        overall_status: status.at("overallStatus").text(),
        study_type: design.at("studyType").text(),
        phases: join_scalars(design.at("phases").items(), ", "),
        start_year: start_year(&start_date),
        start_date,
        gender: eligibility.at("sex").text(),
        brief_summary: description.at("briefSummary").text(),
        detailed_description: description.at("detailedDescription").text(),
        criteria: eligibility.at("eligibilityCriteria").text(),
        locations: flatten_locations(protocol.path("contactsLocationsModule.locations").items()),
        interventions: flatten_interventions(
            protocol.path("armsInterventionsModule.interventions").items(),
        ),
        min_age_in_months: age_in_months(&minimum_age),
        max_age_in_months: age_in_months(&maximum_age),
        minimum_age,
        maximum_age,
    }
}

/// Four-digit year prefix of a `YYYY`, `YYYY-MM` or `YYYY-MM-DD` date; empty otherwise.
pub fn start_year(date: &str) -> String {
    let prefix = date.trim().split('-').next().unwrap_or("");
    if prefix.len() == 4 && prefix.chars().all(|c| c.is_ascii_digit()) {
        prefix.to_string()
    } else {
        String::new()
    }
}

/// Convert a registry age such as `"18 Years"` into whole months.
pub fn age_in_months(age: &str) -> Option<u32> {
    let captures = AGE_RE.captures(age)?;
    let amount: f64 = captures.get(1)?.as_str().parse().ok()?;
    let months = match captures.get(2)?.as_str().to_ascii_lowercase().as_str() {
        "year" => amount * 12.0,
        "month" => amount,
        "week" => amount * 7.0 / 30.0,
        "day" => amount / 30.0,
        _ => 0.0,
    };
    Some(months.floor() as u32)
}

/// `facility, city, state, country` per site, sites separated by `; `.
fn flatten_locations(locations: &[Value]) -> String {
    locations
        .iter()
        .map(|location| {
            let site = Field::of(location);
            ["facility", "city", "state", "country"]
                .iter()
                .map(|key| site.at(key).text().trim().to_string())
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .filter(|site| !site.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

/// `TYPE: name` per intervention, separated by `; `.
fn flatten_interventions(interventions: &[Value]) -> String {
    interventions
        .iter()
        .filter_map(|intervention| {
            let item = Field::of(intervention);
            let kind = item.at("type").text().trim().to_string();
            let name = item.at("name").text().trim().to_string();
            match (kind.is_empty(), name.is_empty()) {
                (true, true) => None,
                (true, false) => Some(name),
                (false, true) => Some(kind),
                (false, false) => Some(format!("{}: {}", kind, name)),
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_scalars(items: &[Value], separator: &str) -> String {
    items
        .iter()
        .map(|item| Field::of(item).text())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}
