//! CSV ingest for observations.
//!
//! Two layouts are accepted, both with a header row:
//!
//! - **wide**: `x, y1, y2, ...`, one row per x value, replicates across columns
//! - **long**: `x, y` with repeated x values, grouped in first-seen order
//!
//! Rows that fail to parse are skipped and reported; the load fails only when
//! nothing usable remains or the replicate groups are ragged.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use tracing::{debug, warn};

use crate::domain::Observations;
use crate::error::AppError;

/// How the file's rows were interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Wide,
    Long,
}

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Ingest output: observations plus what was skipped along the way.
#[derive(Debug, Clone)]
pub struct IngestedData {
    pub obs: Observations,
    pub layout: Layout,
    /// Header names of the y columns.
    pub y_columns: Vec<String>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

pub fn load_observations(path: &Path) -> Result<IngestedData, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open CSV '{}': {e}", path.display())))?;
    read_observations(file)
}

/// Parse observations from any CSV source.
pub fn read_observations<R: Read>(source: R) -> Result<IngestedData, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let headers = reader
        .headers()
        .map_err(|e| AppError::input(format!("Failed to read CSV headers: {e}")))?
        .clone();
    if headers.len() < 2 {
        return Err(AppError::input(format!(
            "CSV needs an x column and at least one y column; found {} column(s).",
            headers.len()
        )));
    }
    let y_columns: Vec<String> = headers.iter().skip(1).map(normalize_header_name).collect();

    let mut rows: Vec<(f64, Vec<f64>)> = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // records() starts after the header, and CSV lines are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };
        match parse_row(&record, headers.len()) {
            Ok(row) => rows.push(row),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    let rows_used = rows.len();
    if rows_used == 0 {
        return Err(AppError::input("No valid rows remain after parsing."));
    }
    if !row_errors.is_empty() {
        warn!(skipped = row_errors.len(), rows_read, "skipped malformed CSV rows");
    }

    let repeated_x = has_repeated_x(&rows);
    let (layout, obs) = if headers.len() == 2 && repeated_x {
        (Layout::Long, group_long(rows)?)
    } else {
        if repeated_x {
            return Err(AppError::input(
                "Wide CSV has repeated x values; put replicates in extra columns or use two-column long format.",
            ));
        }
        let (x, ys): (Vec<f64>, Vec<Vec<f64>>) = rows.into_iter().unzip();
        (Layout::Wide, Observations::replicated(x, ys)?)
    };

    debug!(?layout, groups = obs.n_groups(), replicates = obs.replicates(), "observations loaded");

    Ok(IngestedData {
        obs,
        layout,
        y_columns,
        row_errors,
        rows_read,
        rows_used,
    })
}

fn parse_row(record: &StringRecord, width: usize) -> Result<(f64, Vec<f64>), String> {
    if record.len() != width {
        return Err(format!("expected {width} fields, found {}", record.len()));
    }
    let mut values = record.iter().enumerate().map(|(col, raw)| {
        let v: f64 = raw
            .parse()
            .map_err(|_| format!("column {}: '{raw}' is not a number", col + 1))?;
        if v.is_finite() {
            Ok(v)
        } else {
            Err(format!("column {}: value is not finite", col + 1))
        }
    });
    let x = values.next().ok_or_else(|| "empty row".to_string())??;
    let ys = values.collect::<Result<Vec<_>, _>>()?;
    Ok((x, ys))
}

fn has_repeated_x(rows: &[(f64, Vec<f64>)]) -> bool {
    let mut seen = HashMap::with_capacity(rows.len());
    rows.iter().any(|(x, _)| seen.insert(x.to_bits(), ()).is_some())
}

/// Group two-column rows by x, keeping first-seen order.
fn group_long(rows: Vec<(f64, Vec<f64>)>) -> Result<Observations, AppError> {
    let mut index: HashMap<u64, usize> = HashMap::new();
    let mut groups: Vec<(f64, Vec<f64>)> = Vec::new();
    for (x, ys) in rows {
        let slot = *index.entry(x.to_bits()).or_insert_with(|| {
            groups.push((x, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.extend(ys);
    }

    let size = groups[0].1.len();
    if let Some((x, g)) = groups.iter().find(|(_, g)| g.len() != size) {
        return Err(AppError::input(format!(
            "Replicate groups must have equal sizes: x={x} has {} values, x={} has {size}.",
            g.len(),
            groups[0].0
        )));
    }

    let (x, ys): (Vec<f64>, Vec<Vec<f64>>) = groups.into_iter().unzip();
    Observations::replicated(x, ys)
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports sometimes prefix the first header with a BOM.
    name.trim().trim_start_matches('\u{feff}').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(text: &str) -> Result<IngestedData, AppError> {
        read_observations(text.as_bytes())
    }

    #[test]
    fn wide_single_column() {
        let data = load("x,y\n1,2.1\n2,3.9\n3,6.2\n").unwrap();
        assert_eq!(data.layout, Layout::Wide);
        assert_eq!(data.obs.n_groups(), 3);
        assert!(!data.obs.is_replicated());
        assert_eq!(data.y_columns, vec!["y"]);
    }

    #[test]
    fn wide_replicates() {
        let data = load("\u{feff}x,r1,r2\n1,2.0,2.2\n2,4.1,3.9\n").unwrap();
        assert_eq!(data.obs.replicates(), 2);
        assert_eq!(data.obs.y()[(1, 0)], 4.1);
    }

    #[test]
    fn long_format_groups_in_first_seen_order() {
        let data = load("x,y\n2,5.0\n1,1.0\n2,5.5\n1,1.5\n").unwrap();
        assert_eq!(data.layout, Layout::Long);
        assert_eq!(data.obs.x(), &[2.0, 1.0]);
        assert_eq!(data.obs.replicates(), 2);
        assert_eq!(data.obs.y()[(0, 1)], 5.5);
    }

    #[test]
    fn ragged_long_groups_are_rejected() {
        let err = load("x,y\n1,1.0\n1,1.1\n2,2.0\n").unwrap_err();
        assert!(matches!(err, AppError::Input(_)));
    }

    #[test]
    fn bad_rows_are_reported_and_skipped() {
        let data = load("x,y\n1,2.0\n2,abc\n3,6.0\n4\n").unwrap();
        assert_eq!(data.rows_read, 4);
        assert_eq!(data.rows_used, 2);
        assert_eq!(data.row_errors.len(), 2);
        assert_eq!(data.row_errors[0].line, 3);
    }

    #[test]
    fn nothing_usable_is_an_input_error() {
        assert!(matches!(load("x,y\nfoo,bar\n"), Err(AppError::Input(_))));
        assert!(matches!(load("x\n1\n"), Err(AppError::Input(_))));
    }
}
