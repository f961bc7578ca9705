//! # Table Loading and Validation
//!
//! Exclusive entry point for user-provided tables. Phenotype/covariate
//! tables are tab-separated with a header row and are read through the
//! `polars` CSV reader. PRS score tables have no header (PLINK `.profile`
//! style: second column is the sample ID, last column is the score) and
//! are parsed line by line.
//!
//! Failures are assumed to be user-input errors, so every variant of
//! [`DataError`] names the offending column or line.

use log::{info, warn};
use polars::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// Sample identifier column shared by every table in the pipeline.
pub const IID: &str = "IID";

/// Phenotype missing-value sentinel used by PLINK-family tools.
const MISSING_PHENO: f64 = -9.0;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("the required column '{0}' was not found in the input table; check spelling and case")]
    ColumnNotFound(String),
    #[error("the column '{column_name}' contains non-numeric data (found type: {found_type})")]
    ColumnWrongType {
        column_name: String,
        found_type: String,
    },
    #[error("missing or null values found in the required column '{0}'")]
    MissingValuesFound(String),
    #[error("non-finite values (NaN or infinity) found in the required column '{0}'")]
    NonFiniteValuesFound(String),
    #[error("line {line} of score file has {found} fields, at least 2 required")]
    MalformedScoreLine { line: usize, found: usize },
    #[error("score file contains no data rows")]
    EmptyScoreFile,
}

/// Loads a tab-separated phenotype/covariate table with a header row.
///
/// When `ignore_nan_pheno` is set, rows whose phenotype is null, NaN or
/// the `-9` missing sentinel are dropped before anything else sees them.
/// When `drop_fid` is set, an `FID` column is removed if present.
pub fn load_pheno_table(
    path: &Path,
    pheno_name: &str,
    ignore_nan_pheno: bool,
    drop_fid: bool,
) -> Result<DataFrame, DataError> {
    info!("Loading phenotype table from '{}'", path.display());
    let mut df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
        )
        .finish()?;

    require_columns(&df, &[pheno_name.to_string()])?;

    if ignore_nan_pheno {
        let before = df.height();
        let pheno = df.column(pheno_name)?.cast(&DataType::Float64)?;
        let keep: Vec<bool> = pheno
            .f64()?
            .iter()
            .map(|opt| opt.is_some_and(|v| !v.is_nan() && v != MISSING_PHENO))
            .collect();
        let mask = BooleanChunked::from_slice("keep".into(), &keep);
        df = df.filter(&mask)?;
        if df.height() < before {
            info!(
                "Dropped {} rows with missing '{}' phenotype",
                before - df.height(),
                pheno_name
            );
        }
    }

    if drop_fid && has_column(&df, "FID") {
        df = df.drop("FID")?;
    }

    info!("Loaded {} samples, {} columns", df.height(), df.width());
    Ok(df)
}

/// Loads a headerless, whitespace-delimited PRS score table.
///
/// Column 2 is taken as the sample ID and the last column as the score,
/// which covers both PLINK `.profile` output and PRS-CS score files.
/// Returns a two-column frame (`IID`, `score_name`).
pub fn load_score_table(path: &Path, score_name: &str) -> Result<DataFrame, DataError> {
    info!("Loading PRS score table from '{}'", path.display());
    let reader = BufReader::new(File::open(path)?);

    let mut iids: Vec<String> = Vec::new();
    let mut scores: Vec<f64> = Vec::new();
    for (line_number, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 2 {
            return Err(DataError::MalformedScoreLine {
                line: line_number + 1,
                found: fields.len(),
            });
        }
        let iid = fields[1];
        let raw = fields[fields.len() - 1];
        let score: f64 = raw.parse().map_err(|_| DataError::ColumnWrongType {
            column_name: score_name.to_string(),
            found_type: format!("'{}' at line {}", raw, line_number + 1),
        })?;
        iids.push(iid.to_string());
        scores.push(score);
    }
    if iids.is_empty() {
        return Err(DataError::EmptyScoreFile);
    }

    info!("Loaded {} scored samples", iids.len());
    Ok(DataFrame::new(vec![
        Series::new(IID.into(), iids).into(),
        Series::new(score_name.into(), scores).into(),
    ])?)
}

/// Inner join of two tables on the `IID` column, preserving left row order.
///
/// Duplicate IIDs on the right keep their first occurrence; unmatched rows
/// on either side are dropped.
pub fn merge_on_iid(left: &DataFrame, right: &DataFrame) -> Result<DataFrame, DataError> {
    require_columns(left, &[IID.to_string()])?;
    require_columns(right, &[IID.to_string()])?;

    let right_ids = string_column(right, IID)?;
    let mut lookup: HashMap<&str, usize> = HashMap::with_capacity(right_ids.len());
    for (row, id) in right_ids.iter().enumerate() {
        lookup.entry(id.as_str()).or_insert(row);
    }

    let left_ids = string_column(left, IID)?;
    let mut left_rows: Vec<IdxSize> = Vec::new();
    let mut right_rows: Vec<IdxSize> = Vec::new();
    for (row, id) in left_ids.iter().enumerate() {
        if let Some(&r) = lookup.get(id.as_str()) {
            left_rows.push(row as IdxSize);
            right_rows.push(r as IdxSize);
        }
    }
    let dropped = left.height() - left_rows.len();
    if dropped > 0 {
        warn!("{} samples had no matching IID and were dropped", dropped);
    }

    let mut merged = left.take(&IdxCa::from_vec("rows".into(), left_rows))?;
    let taken = right.take(&IdxCa::from_vec("rows".into(), right_rows))?;
    for column in taken.get_columns() {
        if column.name().as_str() == IID {
            continue;
        }
        merged.with_column(column.clone())?;
    }
    Ok(merged)
}

/// Validates a required-columns set against the table schema, failing fast
/// with the first missing name.
pub fn require_columns(df: &DataFrame, names: &[String]) -> Result<(), DataError> {
    for name in names {
        if !has_column(df, name) {
            return Err(DataError::ColumnNotFound(name.clone()));
        }
    }
    Ok(())
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

/// Extracts a column as `Vec<f64>`, rejecting nulls, non-numeric data and
/// non-finite values.
pub fn numeric_column(df: &DataFrame, name: &str) -> Result<Vec<f64>, DataError> {
    let column = df
        .column(name)
        .map_err(|_| DataError::ColumnNotFound(name.to_string()))?;
    if column.null_count() > 0 {
        return Err(DataError::MissingValuesFound(name.to_string()));
    }
    let casted = column
        .cast(&DataType::Float64)
        .map_err(|_| DataError::ColumnWrongType {
            column_name: name.to_string(),
            found_type: format!("{:?}", column.dtype()),
        })?;
    if casted.null_count() > 0 {
        return Err(DataError::ColumnWrongType {
            column_name: name.to_string(),
            found_type: format!("{:?}", column.dtype()),
        });
    }
    let values: Vec<f64> = casted.f64()?.rechunk().into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValuesFound(name.to_string()));
    }
    Ok(values)
}

/// Extracts a column as strings, stringifying numeric cells as written.
pub fn string_column(df: &DataFrame, name: &str) -> Result<Vec<String>, DataError> {
    let column = df
        .column(name)
        .map_err(|_| DataError::ColumnNotFound(name.to_string()))?;
    let mut values = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let cell = column.get(i).unwrap_or(AnyValue::Null);
        values.push(match cell {
            AnyValue::Null => {
                return Err(DataError::MissingValuesFound(name.to_string()));
            }
            AnyValue::String(s) => s.to_string(),
            AnyValue::StringOwned(s) => s.to_string(),
            other => other.to_string(),
        });
    }
    Ok(values)
}
