//! # Linear-Trait Evaluation Pipeline
//!
//! The orchestration behind `prstools linear`: load the phenotype table,
//! split it stratified on the configured covariates, expand the covariate
//! specification, standardize and fit the cross-validated linear model,
//! then persist feature importances, per-sample predictions, agreement
//! metrics and plots.
//!
//! Data flows strictly Loader -> Expander -> Splitter -> Evaluator ->
//! Reporter; every stage consumes its input fully before the next starts.

use crate::data::{self, DataError};
use crate::features::{self, FeatureError, Scaler};
use crate::model::{self, ModelError};
use crate::plot;
use crate::report::{self, PredRow, ReportError};
use crate::split::{self, SplitError};
use crate::stats::{self, Metric, StatsError};
use log::info;
use ndarray::Array1;
use polars::prelude::DataFrame;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinearError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Stats(#[from] StatsError),
    #[error(transparent)]
    Report(#[from] ReportError),
}

#[derive(Debug, Clone)]
pub struct LinearConfig {
    pub pheno_path: PathBuf,
    pub pheno_name: String,
    pub prs_name: String,
    pub ratio: f64,
    pub covname: String,
    pub metric: String,
    pub out_prefix: String,
    pub stratify_by: Vec<String>,
    pub split_seed: u64,
    pub cv_seed: u64,
    pub ignore_nan_pheno: bool,
    pub fid_absent: bool,
    /// Refit the standardizer on the test matrix (the default) instead of
    /// reusing the train statistics.
    pub refit_scaler: bool,
}

impl Default for LinearConfig {
    fn default() -> Self {
        LinearConfig {
            pheno_path: PathBuf::new(),
            pheno_name: String::new(),
            prs_name: "PRS".to_string(),
            ratio: 0.8,
            covname: String::new(),
            metric: "pearsonr".to_string(),
            out_prefix: "linear_plot".to_string(),
            stratify_by: vec!["Sex".to_string(), "Age".to_string()],
            split_seed: 0,
            cv_seed: 2,
            ignore_nan_pheno: false,
            fid_absent: false,
            refit_scaler: true,
        }
    }
}

pub fn run(config: &LinearConfig) -> Result<(), LinearError> {
    let metric: Metric = config.metric.parse()?;

    // --- Loader ---
    let df = data::load_pheno_table(
        &config.pheno_path,
        &config.pheno_name,
        config.ignore_nan_pheno,
        config.fid_absent,
    )?;
    data::require_columns(&df, &[data::IID.to_string()])?;

    // --- Expander ---
    let covariates = features::expand(&config.covname)?;
    let mut feature_names = vec![config.prs_name.clone()];
    feature_names.extend(covariates);
    info!("Feature set: {:?}", feature_names);

    // --- Splitter ---
    let (train_df, test_df) =
        split::stratified_split(&df, &config.stratify_by, config.ratio, config.split_seed)?;
    info!(
        "Split {} samples into {} train / {} test",
        df.height(),
        train_df.height(),
        test_df.height()
    );

    // --- Evaluator ---
    let x_train_raw = features::design_matrix(&train_df, &feature_names)?;
    let x_test_raw = features::design_matrix(&test_df, &feature_names)?;
    let y_train = Array1::from_vec(data::numeric_column(&train_df, &config.pheno_name)?);
    let y_test = Array1::from_vec(data::numeric_column(&test_df, &config.pheno_name)?);

    let scaler = Scaler::fit(&x_train_raw);
    let x_train = scaler.transform(&x_train_raw);
    let x_test = if config.refit_scaler {
        Scaler::fit_transform(&x_test_raw)
    } else {
        scaler.transform(&x_test_raw)
    };

    let (fitted, train_pred, test_pred) =
        model::fit_and_predict(&x_train, &y_train, &x_test, &feature_names, config.cv_seed)?;
    info!(
        "Fitted model: intercept {:.6}, lambda {:.6e}",
        fitted.intercept, fitted.lambda
    );

    // --- Reporter ---
    let fi_path = out_path(&config.out_prefix, "_feature_importance.tsv");
    report::write_feature_importance(&fi_path, &fitted)?;
    info!("Wrote feature importance to '{}'", fi_path.display());

    let train_rows = prediction_rows(&train_df, &y_train, &train_pred)?;
    let test_rows = prediction_rows(&test_df, &y_test, &test_pred)?;
    report::write_predval(&out_path(&config.out_prefix, "_train_predval.tsv"), &train_rows)?;
    report::write_predval(&out_path(&config.out_prefix, "_test_predval.tsv"), &test_rows)?;

    for (name, rows) in [("train", &train_rows), ("test", &test_rows)] {
        let observed: Vec<f64> = rows.iter().map(|r| r.real).collect();
        let predicted: Vec<f64> = rows.iter().map(|r| r.predict).collect();
        let annotation = metric_annotation(&observed, &predicted, metric)?;
        info!("{} set: {}", name, annotation);
        plot::scatter_predval(
            &out_path(&config.out_prefix, &format!("_{name}_predval.html")),
            rows,
            &annotation,
            &format!("{} ({name})", config.pheno_name),
        );
    }

    // Whole-table phenotype-vs-PRS view, before any split or scaling.
    let prs_all = data::numeric_column(&df, &config.prs_name)?;
    let pheno_all = data::numeric_column(&df, &config.pheno_name)?;
    let (r, _) = stats::pearson(&pheno_all, &prs_all)?;
    plot::scatter_pheno_vs_prs(
        &out_path(&config.out_prefix, "_realdata_vs_prs.html"),
        &prs_all,
        &pheno_all,
        &format!("Pearson's square: {:.4}", r * r),
        &config.pheno_name,
        &config.prs_name,
    );

    Ok(())
}

fn out_path(prefix: &str, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{prefix}{suffix}"))
}

fn prediction_rows(
    df: &DataFrame,
    observed: &Array1<f64>,
    predicted: &Array1<f64>,
) -> Result<Vec<PredRow>, LinearError> {
    let iids = data::string_column(df, data::IID)?;
    Ok(iids
        .into_iter()
        .zip(observed.iter().zip(predicted.iter()))
        .map(|(iid, (&real, &predict))| PredRow {
            real,
            predict,
            flagged: model::relative_error_flag(real, predict),
            iid,
        })
        .collect())
}

fn metric_annotation(
    observed: &[f64],
    predicted: &[f64],
    metric: Metric,
) -> Result<String, StatsError> {
    match metric {
        Metric::PearsonRSquared => {
            let (r, p) = stats::pearson(observed, predicted)?;
            Ok(format!(
                "Pearson's square: {:.4}, p.val: {:.4}",
                r * r,
                p
            ))
        }
        Metric::RSquared => {
            let r2 = stats::r2_score(observed, predicted)?;
            Ok(format!("R-square: {:.4}", r2))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use std::path::Path;
    use tempfile::tempdir;

    /// 40 samples across 4 Sex/Age strata with a linear phenotype.
    fn write_pheno_table(path: &Path) {
        let mut file = fs::File::create(path).unwrap();
        writeln!(file, "IID\tHeight\tPRS\tSex\tAge\tPC1\tPC2").unwrap();
        for i in 0..40 {
            let sex = if i % 2 == 0 { 1 } else { 2 };
            let age = if i < 20 { "Y" } else { "O" };
            let prs = (i as f64 - 20.0) / 5.0;
            let pc1 = (i as f64 * 0.37).sin();
            let pc2 = (i as f64 * 0.11).cos();
            let height = 160.0 + 4.0 * prs + 0.5 * sex as f64;
            writeln!(
                file,
                "S{i}\t{height:.4}\t{prs:.4}\t{sex}\t{age}\t{pc1:.4}\t{pc2:.4}"
            )
            .unwrap();
        }
    }

    #[test]
    fn pipeline_produces_all_outputs() {
        let dir = tempdir().unwrap();
        let pheno_path = dir.path().join("pheno.tsv");
        write_pheno_table(&pheno_path);

        let config = LinearConfig {
            pheno_path,
            pheno_name: "Height".to_string(),
            covname: "PC1-2,Sex".to_string(),
            out_prefix: dir.path().join("run").to_str().unwrap().to_string(),
            ..LinearConfig::default()
        };
        run(&config).unwrap();

        let fi = fs::read_to_string(dir.path().join("run_feature_importance.tsv")).unwrap();
        assert!(fi.starts_with("Feature\tScore\nIntercept\t"));
        // PRS carries the signal and must rank first among features.
        assert_eq!(fi.lines().nth(2).unwrap().split('\t').next().unwrap(), "PRS");

        let train = fs::read_to_string(dir.path().join("run_train_predval.tsv")).unwrap();
        let test = fs::read_to_string(dir.path().join("run_test_predval.tsv")).unwrap();
        assert!(train.starts_with("Real\tPredict\tDiff>0.1\tIID"));
        // 4 strata of 10 at ratio 0.8: 8 train / 2 test each.
        assert_eq!(train.lines().count() - 1, 32);
        assert_eq!(test.lines().count() - 1, 8);
    }

    #[test]
    fn missing_expanded_covariate_fails_before_fit() {
        let dir = tempdir().unwrap();
        let pheno_path = dir.path().join("pheno.tsv");
        write_pheno_table(&pheno_path);

        let config = LinearConfig {
            pheno_path,
            pheno_name: "Height".to_string(),
            covname: "PC1-3,Sex".to_string(), // PC3 does not exist
            out_prefix: dir.path().join("run").to_str().unwrap().to_string(),
            ..LinearConfig::default()
        };
        match run(&config).unwrap_err() {
            LinearError::Feature(FeatureError::Data(DataError::ColumnNotFound(col))) => {
                assert_eq!(col, "PC3")
            }
            other => panic!("expected ColumnNotFound(PC3), got {:?}", other),
        }
    }

    #[test]
    fn unknown_metric_fails_early() {
        let config = LinearConfig {
            metric: "spearman".to_string(),
            ..LinearConfig::default()
        };
        match run(&config).unwrap_err() {
            LinearError::Stats(StatsError::UnknownMetric(name)) => assert_eq!(name, "spearman"),
            other => panic!("expected UnknownMetric, got {:?}", other),
        }
    }
}
