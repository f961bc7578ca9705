//! # Covariate-Stratified Train/Test Splitting
//!
//! Partitions a table into train ("base") and test ("target") subsets so
//! that every combination of stratification-covariate values keeps
//! approximately the configured train ratio in both subsets. A stratum
//! with a single record cannot be split while preserving its composition,
//! so singletons always go to train.
//!
//! The split is a pure function of its inputs and the explicit seed:
//! strata are visited in sorted key order and one seeded RNG drives every
//! shuffle, so the same inputs always produce the same partition.

use crate::data::{self, DataError};
use itertools::Itertools;
use log::debug;
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SplitError {
    #[error("split ratio must lie strictly between 0 and 1, got {0}")]
    InvalidRatio(f64),
    #[error("stratification column '{0}' is absent from the table")]
    MissingColumn(String),
    #[error(transparent)]
    Data(#[from] DataError),
}

/// Splits `df` into `(train, test)` stratified on the given columns.
pub fn stratified_split(
    df: &DataFrame,
    stratify_by: &[String],
    ratio: f64,
    seed: u64,
) -> Result<(DataFrame, DataFrame), SplitError> {
    for name in stratify_by {
        if !data::has_column(df, name) {
            return Err(SplitError::MissingColumn(name.clone()));
        }
    }

    let keys = stratum_keys(df, stratify_by)?;
    let (train_rows, test_rows) = split_indices(&keys, ratio, seed)?;

    let train = df
        .take(&IdxCa::from_vec("rows".into(), train_rows))
        .map_err(DataError::from)?;
    let test = df
        .take(&IdxCa::from_vec("rows".into(), test_rows))
        .map_err(DataError::from)?;
    Ok((train, test))
}

/// One stringified stratum key per row: the tuple of stratification-column
/// values joined with an unprintable separator.
fn stratum_keys(df: &DataFrame, stratify_by: &[String]) -> Result<Vec<String>, SplitError> {
    let columns: Vec<Vec<String>> = stratify_by
        .iter()
        .map(|name| data::string_column(df, name))
        .collect::<Result<_, _>>()?;

    let mut keys = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        let key = columns.iter().map(|col| col[row].as_str()).join("\u{1f}");
        keys.push(key);
    }
    Ok(keys)
}

/// Core splitting routine over row indices.
///
/// Each stratum of size n >= 2 contributes `round(ratio * n)` rows to
/// train, clamped so neither side of a splittable stratum is empty; the
/// remainder goes to test. Singleton strata go entirely to train. Returned
/// index lists are sorted ascending, so subset row order follows input
/// order; their union is exactly the input rows.
pub fn split_indices(
    keys: &[String],
    ratio: f64,
    seed: u64,
) -> Result<(Vec<IdxSize>, Vec<IdxSize>), SplitError> {
    if !(ratio > 0.0 && ratio < 1.0) {
        return Err(SplitError::InvalidRatio(ratio));
    }

    let mut strata: BTreeMap<&str, Vec<IdxSize>> = BTreeMap::new();
    for (row, key) in keys.iter().enumerate() {
        strata.entry(key.as_str()).or_default().push(row as IdxSize);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train: Vec<IdxSize> = Vec::new();
    let mut test: Vec<IdxSize> = Vec::new();
    for (key, mut rows) in strata {
        let n = rows.len();
        if n < 2 {
            debug!("Stratum '{}' has a single record; routed to train", key);
            train.extend(rows);
            continue;
        }
        rows.shuffle(&mut rng);
        let n_train = ((ratio * n as f64).round() as usize).clamp(1, n - 1);
        debug!("Stratum '{}': {} records, {} to train", key, n, n_train);
        train.extend_from_slice(&rows[..n_train]);
        test.extend_from_slice(&rows[n_train..]);
    }

    train.sort_unstable();
    test.sort_unstable();
    Ok((train, test))
}
