//! Post-run filtering of an output CSV down to a set of NCT IDs.

use crate::constants::COMPARISON_ID_COLUMN;
use crate::error::{EtlError, Result};
use crate::output::{read_csv_file, CsvFileSink, RowSink};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

/// Where the IDs to keep come from.
#[derive(Debug, Clone)]
pub enum IdSource {
    /// `NCT_ID` column of a comparisons CSV.
    ComparisonFile(PathBuf),
    Single(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSummary {
    pub total_rows: usize,
    pub kept_rows: usize,
}

/// Collect the IDs to keep. Blank cells are ignored.
pub fn load_ids(source: &IdSource) -> Result<HashSet<String>> {
    match source {
        IdSource::Single(id) => Ok(std::iter::once(id.trim().to_string()).collect()),
        IdSource::ComparisonFile(path) => {
            let (header, rows) = read_csv_file(path)?;
            let column = column_index(&header, COMPARISON_ID_COLUMN).ok_or_else(|| {
                EtlError::Csv(format!(
                    "{} has no {} column",
                    path.display(),
                    COMPARISON_ID_COLUMN
                ))
            })?;
            let ids: HashSet<String> = rows
                .iter()
                .filter_map(|row| row.get(column))
                .map(|id| id.trim())
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
            info!("Found {} NCT IDs in {}", ids.len(), path.display());
            Ok(ids)
        }
    }
}

/// Keep the rows of `input` whose `nct_id` is in `ids`, writing them to `output`.
/// `output` may be the same path as `input`.
pub fn filter_csv(input: &Path, output: &Path, ids: &HashSet<String>) -> Result<FilterSummary> {
    let (header, rows) = read_csv_file(input)?;
    let column = column_index(&header, "nct_id")
        .ok_or_else(|| EtlError::Csv(format!("{} has no nct_id column", input.display())))?;

    let mut sink = CsvFileSink::new(output);
    sink.begin(&header)?;
    for row in &rows {
        if row.get(column).map_or(false, |id| ids.contains(id.trim())) {
            sink.write_row(row)?;
        }
    }
    sink.finish()?;

    let summary = FilterSummary {
        total_rows: rows.len(),
        kept_rows: sink.rows_written(),
    };
    info!(
        "Filtered {} rows from {} total rows into {}",
        summary.kept_rows,
        summary.total_rows,
        output.display()
    );
    Ok(summary)
}

fn column_index(header: &[String], name: &str) -> Option<usize> {
    header.iter().position(|h| h.trim() == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::encode_record;
    use std::fs;

    fn write(path: &Path, records: &[&[&str]]) {
        let text: String = records.iter().map(|r| encode_record(r)).collect();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_filter_in_place_by_comparison_file() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("trials.csv");
        let comparisons = dir.path().join("comparisons.csv");
        write(
            &data,
            &[
                &["nct_id", "brief_title"],
                &["NCT1", "One"],
                &["NCT2", "Two, with comma"],
                &["NCT3", "Three"],
            ],
        );
        write(
            &comparisons,
            &[&["NCT_ID", "label"], &[" NCT2 ", "x"], &["", "blank"], &["NCT3", "y"]],
        );

        let ids = load_ids(&IdSource::ComparisonFile(comparisons)).unwrap();
        assert_eq!(ids.len(), 2);

        let summary = filter_csv(&data, &data, &ids).unwrap();
        assert_eq!(summary, FilterSummary { total_rows: 3, kept_rows: 2 });

        let (header, rows) = read_csv_file(&data).unwrap();
        assert_eq!(header, vec!["nct_id", "brief_title"]);
        assert_eq!(rows[0], vec!["NCT2", "Two, with comma"]);
        assert_eq!(rows[1], vec!["NCT3", "Three"]);
    }

    #[test]
    fn test_single_id() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("trials.csv");
        let out = dir.path().join("one.csv");
        write(&data, &[&["nct_id"], &["NCT1"], &["NCT2"]]);

        let ids = load_ids(&IdSource::Single("NCT2".into())).unwrap();
        let summary = filter_csv(&data, &out, &ids).unwrap();
        assert_eq!(summary.kept_rows, 1);

        let (_, rows) = read_csv_file(&out).unwrap();
        assert_eq!(rows, vec![vec!["NCT2".to_string()]]);
        let (_, original) = read_csv_file(&data).unwrap();
        assert_eq!(original.len(), 2);
    }

    #[test]
    fn test_missing_id_column_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let comparisons = dir.path().join("comparisons.csv");
        write(&comparisons, &[&["id"], &["NCT1"]]);
        let err = load_ids(&IdSource::ComparisonFile(comparisons)).unwrap_err();
        assert!(matches!(err, EtlError::Csv(msg) if msg.contains("NCT_ID")));
    }
}
