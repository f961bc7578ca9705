//! # Cross-Validated Sparse Linear Model
//!
//! The model-fitting capability behind the `linear` subcommand: a lasso
//! coordinate descent solver run along a geometric regularization path,
//! with the path point chosen by shuffled k-fold cross-validation on the
//! training set and a final refit on all training rows. The caller gets
//! back an intercept plus one coefficient per feature, in feature order,
//! and predictions for both subsets.
//!
//! Everything here is deterministic given the explicit CV seed.

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use thiserror::Error;

/// Cross-validation folds used when selecting the regularization strength.
pub const CV_FOLDS: usize = 10;

/// Number of points on the regularization path.
const NUM_LAMBDAS: usize = 100;

/// Smallest path lambda as a fraction of the data-derived maximum.
const LAMBDA_MIN_RATIO: f64 = 1e-3;

/// Coordinate descent convergence tolerance on the largest coefficient
/// update in one sweep.
const CD_TOLERANCE: f64 = 1e-7;

const CD_MAX_SWEEPS: usize = 1000;

/// Relative-error threshold behind the `Diff>0.1` flag.
pub const RELATIVE_ERROR_THRESHOLD: f64 = 0.1;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("feature set is empty; the model needs at least one predictor")]
    EmptyFeatureSet,
    #[error("training set has {rows} rows, fewer than the {folds} cross-validation folds")]
    InsufficientData { rows: usize, folds: usize },
    #[error("feature matrix has {rows} rows but the target has {targets} values")]
    ShapeMismatch { rows: usize, targets: usize },
    #[error("test matrix has {test} feature columns but the model was trained with {train}")]
    FeatureCountMismatch { train: usize, test: usize },
}

/// Fitted linear model: intercept plus one coefficient per feature, in
/// the order of the feature specification.
#[derive(Debug, Clone)]
pub struct FittedModel {
    pub intercept: f64,
    pub coefficients: Array1<f64>,
    pub feature_names: Vec<String>,
    /// Regularization strength selected by cross-validation.
    pub lambda: f64,
}

impl FittedModel {
    pub fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        x.dot(&self.coefficients) + self.intercept
    }

    /// Feature indices ranked by descending absolute coefficient.
    pub fn ranked_features(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.coefficients.len()).collect();
        order.sort_by(|&a, &b| {
            self.coefficients[b]
                .abs()
                .partial_cmp(&self.coefficients[a].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order
    }
}

/// Fits the cross-validated model on the train matrix and produces
/// predictions for both train and test.
pub fn fit_and_predict(
    x_train: &Array2<f64>,
    y_train: &Array1<f64>,
    x_test: &Array2<f64>,
    feature_names: &[String],
    seed: u64,
) -> Result<(FittedModel, Array1<f64>, Array1<f64>), ModelError> {
    if feature_names.is_empty() || x_train.ncols() == 0 {
        return Err(ModelError::EmptyFeatureSet);
    }
    if x_train.nrows() != y_train.len() {
        return Err(ModelError::ShapeMismatch {
            rows: x_train.nrows(),
            targets: y_train.len(),
        });
    }
    if x_test.ncols() != x_train.ncols() {
        return Err(ModelError::FeatureCountMismatch {
            train: x_train.ncols(),
            test: x_test.ncols(),
        });
    }
    if x_train.nrows() < CV_FOLDS {
        return Err(ModelError::InsufficientData {
            rows: x_train.nrows(),
            folds: CV_FOLDS,
        });
    }

    let lambdas = lambda_path(&x_train.view(), &y_train.view());
    let best = select_lambda_by_cv(x_train, y_train, &lambdas, seed);
    info!(
        "Cross-validation selected lambda {:.6e} (path point {}/{})",
        lambdas[best],
        best + 1,
        lambdas.len()
    );

    let fit = LassoFit::path(&x_train.view(), &y_train.view(), &lambdas[..=best]);
    let model = FittedModel {
        intercept: fit.intercept,
        coefficients: fit.coefficients,
        feature_names: feature_names.to_vec(),
        lambda: lambdas[best],
    };
    let train_pred = model.predict(x_train);
    let test_pred = model.predict(x_test);
    Ok((model, train_pred, test_pred))
}

/// `Diff>0.1`: true when the absolute prediction miss, divided by the
/// signed observed value, exceeds the threshold. The signed denominator
/// means a negative observed value never flags. A zero observed value is
/// flagged unless the prediction is exactly zero too.
pub fn relative_error_flag(observed: f64, predicted: f64) -> bool {
    if observed == 0.0 {
        return predicted != 0.0;
    }
    (observed - predicted).abs() / observed > RELATIVE_ERROR_THRESHOLD
}

/// Geometric path from the smallest lambda that zeroes every coefficient
/// down to `LAMBDA_MIN_RATIO` of it. Degenerates to a single zero when the
/// target carries no signal.
fn lambda_path(x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> Vec<f64> {
    let n = x.nrows() as f64;
    let y_mean = y.mean().unwrap_or(0.0);
    let yc: Array1<f64> = y.mapv(|v| v - y_mean);

    let mut lambda_max: f64 = 0.0;
    for j in 0..x.ncols() {
        let col = x.column(j);
        let col_mean = col.mean().unwrap_or(0.0);
        let dot: f64 = col
            .iter()
            .zip(yc.iter())
            .map(|(&v, &r)| (v - col_mean) * r)
            .sum();
        lambda_max = lambda_max.max((dot / n).abs());
    }
    if !(lambda_max > 0.0) || !lambda_max.is_finite() {
        return vec![0.0];
    }

    let ratio_step = LAMBDA_MIN_RATIO.powf(1.0 / (NUM_LAMBDAS as f64 - 1.0));
    (0..NUM_LAMBDAS)
        .map(|i| lambda_max * ratio_step.powi(i as i32))
        .collect()
}

/// Shuffled k-fold assignment: fold index per row.
fn kfold_assignment(n: usize, folds: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let mut assignment = vec![0usize; n];
    let base = n / folds;
    let extra = n % folds;
    let mut cursor = 0usize;
    for fold in 0..folds {
        let size = base + usize::from(fold < extra);
        for &row in &order[cursor..cursor + size] {
            assignment[row] = fold;
        }
        cursor += size;
    }
    assignment
}

/// Mean validation MSE per path point across the folds; returns the index
/// of the minimizer (ties keep the more regularized point).
fn select_lambda_by_cv(
    x: &Array2<f64>,
    y: &Array1<f64>,
    lambdas: &[f64],
    seed: u64,
) -> usize {
    if lambdas.len() == 1 {
        return 0;
    }
    let n = x.nrows();
    let assignment = kfold_assignment(n, CV_FOLDS, seed);
    let mut errors = vec![0.0f64; lambdas.len()];

    for fold in 0..CV_FOLDS {
        let fit_rows: Vec<usize> = (0..n).filter(|&i| assignment[i] != fold).collect();
        let val_rows: Vec<usize> = (0..n).filter(|&i| assignment[i] == fold).collect();
        if val_rows.is_empty() || fit_rows.len() < 2 {
            continue;
        }
        let x_fit = x.select(Axis(0), &fit_rows);
        let y_fit = y.select(Axis(0), &fit_rows);
        let x_val = x.select(Axis(0), &val_rows);
        let y_val = y.select(Axis(0), &val_rows);

        let mut path = LassoPath::new(&x_fit.view(), &y_fit.view());
        for (i, &lambda) in lambdas.iter().enumerate() {
            let fit = path.advance(lambda);
            let pred = x_val.dot(&fit.coefficients) + fit.intercept;
            let mse = (&pred - &y_val).mapv(|e| e * e).sum() / val_rows.len() as f64;
            errors[i] += mse / CV_FOLDS as f64;
        }
    }

    let mut best = 0;
    for (i, &err) in errors.iter().enumerate() {
        if err < errors[best] {
            best = i;
        }
    }
    debug!("CV mean MSE at selected lambda: {:.6e}", errors[best]);
    best
}

/// A single lasso solution at one lambda.
struct LassoFit {
    intercept: f64,
    coefficients: Array1<f64>,
}

impl LassoFit {
    /// Runs the warm-started path over `lambdas` and returns the final fit.
    fn path(x: &ArrayView2<f64>, y: &ArrayView1<f64>, lambdas: &[f64]) -> LassoFit {
        let mut path = LassoPath::new(x, y);
        let mut last = LassoFit {
            intercept: y.mean().unwrap_or(0.0),
            coefficients: Array1::zeros(x.ncols()),
        };
        for &lambda in lambdas {
            last = path.advance(lambda);
        }
        last
    }
}

/// Warm-started cyclic coordinate descent over centered data.
struct LassoPath {
    xc: Array2<f64>,
    col_means: Array1<f64>,
    col_sq: Array1<f64>,
    y_mean: f64,
    beta: Array1<f64>,
    residual: Array1<f64>,
}

impl LassoPath {
    fn new(x: &ArrayView2<f64>, y: &ArrayView1<f64>) -> LassoPath {
        let n = x.nrows() as f64;
        let col_means: Array1<f64> = x
            .columns()
            .into_iter()
            .map(|col| col.mean().unwrap_or(0.0))
            .collect();
        let mut xc = x.to_owned();
        for (j, mut col) in xc.columns_mut().into_iter().enumerate() {
            let m = col_means[j];
            col.mapv_inplace(|v| v - m);
        }
        let col_sq: Array1<f64> = xc
            .columns()
            .into_iter()
            .map(|col| col.dot(&col) / n)
            .collect();
        let y_mean = y.mean().unwrap_or(0.0);
        let residual = y.mapv(|v| v - y_mean);
        LassoPath {
            xc,
            col_means,
            col_sq,
            y_mean,
            beta: Array1::zeros(x.ncols()),
            residual,
        }
    }

    /// Solves at `lambda`, warm-starting from the previous solution.
    fn advance(&mut self, lambda: f64) -> LassoFit {
        let n = self.xc.nrows() as f64;
        for _ in 0..CD_MAX_SWEEPS {
            let mut max_delta: f64 = 0.0;
            for j in 0..self.xc.ncols() {
                if self.col_sq[j] == 0.0 {
                    continue;
                }
                let col = self.xc.column(j);
                let rho = col.dot(&self.residual) / n + self.col_sq[j] * self.beta[j];
                let updated = soft_threshold(rho, lambda) / self.col_sq[j];
                let delta = updated - self.beta[j];
                if delta != 0.0 {
                    self.residual.scaled_add(-delta, &col);
                    self.beta[j] = updated;
                    max_delta = max_delta.max(delta.abs());
                }
            }
            if max_delta < CD_TOLERANCE {
                break;
            }
        }
        // Shift the intercept back to the uncentered coordinate system.
        let intercept = self.y_mean - self.beta.dot(&self.col_means);
        LassoFit {
            intercept,
            coefficients: self.beta.clone(),
        }
    }
}

fn soft_threshold(z: f64, gamma: f64) -> f64 {
    if z > gamma {
        z - gamma
    } else if z < -gamma {
        z + gamma
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;

    fn noiseless_problem(n: usize) -> (Array2<f64>, Array1<f64>, Array2<f64>) {
        // x1 carries the signal, x2 is an irrelevant oscillation.
        let x1: Vec<f64> = (0..n).map(|i| (i as f64 - n as f64 / 2.0) / 3.0).collect();
        let x2: Vec<f64> = (0..n).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let mut x = Array2::zeros((n, 2));
        for i in 0..n {
            x[[i, 0]] = x1[i];
            x[[i, 1]] = x2[i];
        }
        let y: Array1<f64> = x1.iter().map(|v| 3.0 * v + 1.0).collect();
        let x_test = x.slice(ndarray::s![..4, ..]).to_owned();
        (x, y, x_test)
    }

    #[test]
    fn recovers_dominant_coefficient_on_noiseless_data() {
        let (x, y, x_test) = noiseless_problem(30);
        let names = vec!["x1".to_string(), "x2".to_string()];
        let (model, train_pred, _) = fit_and_predict(&x, &y, &x_test, &names, 2).unwrap();

        assert!(model.coefficients[0].abs() > 10.0 * model.coefficients[1].abs());
        assert_abs_diff_eq!(model.coefficients[0], 3.0, epsilon = 0.1);

        let ss_res: f64 = y
            .iter()
            .zip(train_pred.iter())
            .map(|(o, p)| (o - p) * (o - p))
            .sum();
        let mean = y.mean().unwrap();
        let ss_tot: f64 = y.iter().map(|o| (o - mean) * (o - mean)).sum();
        assert!(1.0 - ss_res / ss_tot > 0.99);
    }

    #[test]
    fn ranked_features_orders_by_magnitude() {
        let model = FittedModel {
            intercept: 0.5,
            coefficients: Array1::from_vec(vec![0.1, -2.0, 0.7]),
            feature_names: vec!["a".into(), "b".into(), "c".into()],
            lambda: 0.0,
        };
        assert_eq!(model.ranked_features(), vec![1, 2, 0]);
    }

    #[test]
    fn empty_feature_set_is_rejected() {
        let x = Array2::zeros((12, 0));
        let y = Array1::zeros(12);
        match fit_and_predict(&x, &y, &x.clone(), &[], 2).unwrap_err() {
            ModelError::EmptyFeatureSet => {}
            other => panic!("expected EmptyFeatureSet, got {:?}", other),
        }
    }

    #[test]
    fn test_matrix_with_wrong_feature_count_is_rejected() {
        let (x, y, _) = noiseless_problem(20);
        let x_test = Array2::zeros((4, 3));
        let names = vec!["x1".to_string(), "x2".to_string()];
        match fit_and_predict(&x, &y, &x_test, &names, 2).unwrap_err() {
            ModelError::FeatureCountMismatch { train, test } => {
                assert_eq!(train, 2);
                assert_eq!(test, 3);
            }
            other => panic!("expected FeatureCountMismatch, got {:?}", other),
        }
    }

    #[test]
    fn too_few_rows_for_cv_is_rejected() {
        let x = Array2::zeros((5, 1));
        let y = Array1::zeros(5);
        let names = vec!["x".to_string()];
        match fit_and_predict(&x, &y, &x.clone(), &names, 2).unwrap_err() {
            ModelError::InsufficientData { rows, folds } => {
                assert_eq!(rows, 5);
                assert_eq!(folds, CV_FOLDS);
            }
            other => panic!("expected InsufficientData, got {:?}", other),
        }
    }

    #[test]
    fn constant_target_yields_intercept_only_model() {
        let (x, _, _) = noiseless_problem(20);
        let y = Array1::from_elem(20, 4.2);
        let names = vec!["x1".to_string(), "x2".to_string()];
        let (model, train_pred, _) = fit_and_predict(&x, &y, &x, &names, 2).unwrap();
        assert!(model.coefficients.iter().all(|&c| c == 0.0));
        assert_abs_diff_eq!(model.intercept, 4.2, epsilon = 1e-12);
        assert!(train_pred.iter().all(|&p| (p - 4.2).abs() < 1e-12));
    }

    #[test]
    fn relative_error_flag_threshold_and_zero_policy() {
        assert!(!relative_error_flag(10.0, 10.5)); // 5% off
        assert!(relative_error_flag(10.0, 11.5)); // 15% off
        assert!(relative_error_flag(0.0, 0.01)); // zero observed, nonzero prediction
        assert!(!relative_error_flag(0.0, 0.0));
    }

    #[test]
    fn relative_error_flag_signed_denominator_never_flags_negative_observed() {
        // |miss| / observed is negative for observed < 0, so it can
        // never exceed the threshold.
        assert!(!relative_error_flag(-10.0, -11.5));
        assert!(!relative_error_flag(-10.0, -20.0));
        assert!(!relative_error_flag(-0.5, 3.0));
    }

    #[test]
    fn deterministic_given_seed() {
        let (x, y, x_test) = noiseless_problem(25);
        let names = vec!["x1".to_string(), "x2".to_string()];
        let (m1, p1, _) = fit_and_predict(&x, &y, &x_test, &names, 2).unwrap();
        let (m2, p2, _) = fit_and_predict(&x, &y, &x_test, &names, 2).unwrap();
        assert_eq!(m1.lambda, m2.lambda);
        assert_eq!(m1.coefficients, m2.coefficients);
        assert_eq!(p1, p2);
    }
}
