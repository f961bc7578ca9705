//! # Covariate Expansion and Design Matrices
//!
//! Turns a raw covariate specification string (`"Sex,Age,PC1-10"`) into an
//! explicit ordered column list, gathers those columns into an `ndarray`
//! design matrix, and standardizes features to zero mean / unit variance.

use crate::data::{self, DataError};
use ndarray::{Array1, Array2};
use polars::prelude::DataFrame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("invalid principal-component range '{token}': start {start} exceeds end {end}")]
    InvalidRange {
        token: String,
        start: usize,
        end: usize,
    },
    #[error("feature set is empty; at least one predictor column is required")]
    EmptyFeatureSet,
    #[error(transparent)]
    Data(#[from] DataError),
}

/// Expands a comma-separated covariate specification into column names.
///
/// Each token is either a literal column name, passed through unchanged,
/// or a range token `PC<start>-<end>` which expands in place to
/// `PC<start>, ..., PC<end>`. Empty tokens are dropped, so the empty
/// specification yields an empty list. Expansion is deterministic and
/// order-preserving relative to the input.
pub fn expand(spec: &str) -> Result<Vec<String>, FeatureError> {
    let mut names = Vec::new();
    for token in spec.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match parse_pc_range(token) {
            Some((start, end)) => {
                if start > end {
                    return Err(FeatureError::InvalidRange {
                        token: token.to_string(),
                        start,
                        end,
                    });
                }
                names.extend((start..=end).map(|i| format!("PC{i}")));
            }
            None => names.push(token.to_string()),
        }
    }
    Ok(names)
}

/// Parses `PC<start>-<end>` with positive integer bounds. Anything else,
/// including a plain `PC3`, is a literal column name.
fn parse_pc_range(token: &str) -> Option<(usize, usize)> {
    let rest = token.strip_prefix("PC")?;
    let (start, end) = rest.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = end.parse().ok()?;
    if start == 0 || end == 0 {
        return None;
    }
    Some((start, end))
}

/// Gathers the named columns of `df`, in order, into a samples-by-features
/// matrix. Every column must exist and be fully numeric; this is where a
/// feature spec meets the loaded schema, so a bad name fails here, before
/// any model fit.
pub fn design_matrix(df: &DataFrame, names: &[String]) -> Result<Array2<f64>, FeatureError> {
    if names.is_empty() {
        return Err(FeatureError::EmptyFeatureSet);
    }
    let n = df.height();
    let mut buffer = Vec::with_capacity(n * names.len());
    for name in names {
        buffer.extend(data::numeric_column(df, name)?);
    }
    // Column-major fill: each gathered column becomes one matrix column.
    use ndarray::ShapeBuilder;
    Ok(Array2::from_shape_vec((n, names.len()).f(), buffer)
        .expect("column vectors have equal length"))
}

/// Per-column standardizer (zero mean, unit variance), the StandardScaler
/// role. Statistics come from whichever matrix `fit` saw; a zero-variance
/// column maps to all zeros rather than dividing by zero.
#[derive(Debug, Clone)]
pub struct Scaler {
    means: Array1<f64>,
    scales: Array1<f64>,
}

impl Scaler {
    pub fn fit(x: &Array2<f64>) -> Self {
        let n = x.nrows().max(1) as f64;
        let means = x
            .columns()
            .into_iter()
            .map(|col| col.sum() / n)
            .collect::<Array1<f64>>();
        let scales = x
            .columns()
            .into_iter()
            .zip(means.iter())
            .map(|(col, &m)| {
                let var = col.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / n;
                var.sqrt()
            })
            .collect::<Array1<f64>>();
        Scaler { means, scales }
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.clone();
        for (j, mut col) in out.columns_mut().into_iter().enumerate() {
            let scale = self.scales[j];
            if scale > 0.0 {
                col.mapv_inplace(|v| (v - self.means[j]) / scale);
            } else {
                col.fill(0.0);
            }
        }
        out
    }

    pub fn fit_transform(x: &Array2<f64>) -> Array2<f64> {
        Scaler::fit(x).transform(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn expand_range_in_place() {
        assert_eq!(expand("PC1-3,Sex").unwrap(), vec!["PC1", "PC2", "PC3", "Sex"]);
        assert_eq!(
            expand("PRS,PC2-4,Age").unwrap(),
            vec!["PRS", "PC2", "PC3", "PC4", "Age"]
        );
    }

    #[test]
    fn expand_degenerate_range() {
        assert_eq!(expand("PC5-5").unwrap(), vec!["PC5"]);
    }

    #[test]
    fn expand_reversed_range_fails() {
        match expand("PC3-1").unwrap_err() {
            FeatureError::InvalidRange { start, end, .. } => {
                assert_eq!(start, 3);
                assert_eq!(end, 1);
            }
            other => panic!("expected InvalidRange, got {:?}", other),
        }
    }

    #[test]
    fn expand_literals_untouched() {
        assert_eq!(expand("Sex,Age").unwrap(), vec!["Sex", "Age"]);
        assert_eq!(expand("").unwrap(), Vec::<String>::new());
        // A bare PC name is a literal, not a range.
        assert_eq!(expand("PC3").unwrap(), vec!["PC3"]);
    }

    #[test]
    fn scaler_standardizes_fit_matrix() {
        let x = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0]];
        let z = Scaler::fit_transform(&x);
        for j in 0..2 {
            let col = z.column(j);
            let mean = col.sum() / 4.0;
            let var = col.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / 4.0;
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(var, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn scaler_zero_variance_column_maps_to_zero() {
        let x = array![[5.0, 1.0], [5.0, 2.0], [5.0, 3.0]];
        let z = Scaler::fit_transform(&x);
        assert!(z.column(0).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn scaler_applies_training_statistics_to_new_data() {
        let train = array![[0.0], [2.0]];
        let test = array![[1.0], [3.0]];
        let scaler = Scaler::fit(&train);
        let z = scaler.transform(&test);
        // mean 1, std 1 from train; test maps to (x - 1) / 1.
        assert_abs_diff_eq!(z[[0, 0]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(z[[1, 0]], 2.0, epsilon = 1e-12);
    }
}
