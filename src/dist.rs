//! # Case/Control PRS Distribution
//!
//! Joins a computed PRS score table with a binary phenotype, optionally
//! normalizes the scores, compares the case and control distributions
//! with a Mann-Whitney U test, and persists a per-group summary and a box
//! plot.

use crate::data::{self, DataError};
use crate::plot;
use crate::report::{self, GroupSummary, ReportError};
use crate::stats::{self, StatsError};
use log::{info, warn};
use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Phenotype coding of the input tables: 1 = control, 2 = case.
const CONTROL_CODE: f64 = 1.0;
const CASE_CODE: f64 = 2.0;

#[derive(Error, Debug)]
pub enum DistError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Stats(#[from] StatsError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("unknown normalization '{0}'; expected none, z_std, min_max or arctan")]
    UnknownNormalization(String),
    #[error("group '{0}' has no samples after merging")]
    EmptyGroup(&'static str),
}

/// PRS normalization applied after the merge, across all samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    None,
    /// Zero mean, unit (sample) standard deviation.
    ZStd,
    /// Linear rescale to [-1, 1].
    MinMax,
    /// `atan(x) * 2 / pi`, squashing into (-1, 1).
    Arctan,
}

impl FromStr for Normalization {
    type Err = DistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(Normalization::None),
            "z_std" => Ok(Normalization::ZStd),
            "min_max" => Ok(Normalization::MinMax),
            "arctan" => Ok(Normalization::Arctan),
            other => Err(DistError::UnknownNormalization(other.to_string())),
        }
    }
}

pub fn normalize(values: &mut [f64], method: Normalization) {
    match method {
        Normalization::None => {}
        Normalization::ZStd => {
            let n = values.len().max(1) as f64;
            let mean = values.iter().sum::<f64>() / n;
            // Sample (n - 1) standard deviation.
            let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
                / (n - 1.0).max(1.0);
            let sd = var.sqrt();
            if sd > 0.0 {
                for v in values.iter_mut() {
                    *v = (*v - mean) / sd;
                }
            }
        }
        Normalization::MinMax => {
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if max > min {
                for v in values.iter_mut() {
                    *v = (*v - min) / (max - min) * 2.0 - 1.0;
                }
            }
        }
        Normalization::Arctan => {
            for v in values.iter_mut() {
                *v = v.atan() * 2.0 / PI;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct DistConfig {
    pub score_path: PathBuf,
    pub pheno_path: PathBuf,
    pub pheno_name: String,
    pub normalize: String,
    pub out_prefix: String,
}

/// Runs the distribution pipeline and returns the summary file path.
pub fn run(config: &DistConfig) -> Result<PathBuf, DistError> {
    let method: Normalization = config.normalize.parse()?;
    let scores = data::load_score_table(&config.score_path, "PRS")?;
    let pheno = load_binary_pheno(&config.pheno_path, &config.pheno_name)?;
    let merged = data::merge_on_iid(&scores, &pheno)?;

    let mut prs = data::numeric_column(&merged, "PRS")?;
    normalize(&mut prs, method);
    let status = data::numeric_column(&merged, &config.pheno_name)?;

    let mut controls = Vec::new();
    let mut cases = Vec::new();
    let mut unknown = 0usize;
    for (&value, &code) in prs.iter().zip(status.iter()) {
        if code == CONTROL_CODE {
            controls.push(value);
        } else if code == CASE_CODE {
            cases.push(value);
        } else {
            unknown += 1;
        }
    }
    if unknown > 0 {
        warn!("{} samples had a phenotype outside {{1, 2}} and were ignored", unknown);
    }
    if controls.is_empty() {
        return Err(DistError::EmptyGroup("Control"));
    }
    if cases.is_empty() {
        return Err(DistError::EmptyGroup("Case"));
    }

    let (u, p) = stats::mann_whitney_u(&controls, &cases)?;
    info!(
        "Mann-Whitney U = {:.4}, p = {:.6} ({} controls vs {} cases)",
        u,
        p,
        controls.len(),
        cases.len()
    );

    let groups = vec![
        (GroupSummary::from_values("Control", &controls), controls.clone()),
        (GroupSummary::from_values("Case", &cases), cases.clone()),
    ];
    let summary_path = PathBuf::from(format!("{}_dist_summary.tsv", config.out_prefix));
    report::write_dist_summary(
        &summary_path,
        &[groups[0].0.clone(), groups[1].0.clone()],
        u,
        p,
    )?;

    let plot_path = PathBuf::from(format!("{}_prs_dist.html", config.out_prefix));
    plot::box_by_group(
        &plot_path,
        &groups,
        &format!("Mann-Whitney p = {:.4}", p),
        &format!("PRS distribution by {}", config.pheno_name),
    );

    Ok(summary_path)
}

/// Loads a headerless phenotype file whose first two whitespace-delimited
/// columns are the sample ID and the case/control code.
fn load_binary_pheno(
    path: &Path,
    pheno_name: &str,
) -> Result<polars::prelude::DataFrame, DataError> {
    use polars::prelude::*;
    use std::fs::File;
    use std::io::{BufRead, BufReader};

    let reader = BufReader::new(File::open(path)?);
    let mut iids: Vec<String> = Vec::new();
    let mut codes: Vec<f64> = Vec::new();
    for (line_number, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let iid = fields.next().ok_or(DataError::MalformedScoreLine {
            line: line_number + 1,
            found: 0,
        })?;
        let raw = fields.next().ok_or(DataError::MalformedScoreLine {
            line: line_number + 1,
            found: 1,
        })?;
        let code: f64 = raw.parse().map_err(|_| DataError::ColumnWrongType {
            column_name: pheno_name.to_string(),
            found_type: format!("'{}' at line {}", raw, line_number + 1),
        })?;
        iids.push(iid.to_string());
        codes.push(code);
    }

    Ok(DataFrame::new(vec![
        Series::new(data::IID.into(), iids).into(),
        Series::new(pheno_name.into(), codes).into(),
    ])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::fs;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn z_std_centers_and_scales() {
        let mut values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        normalize(&mut values, Normalization::ZStd);
        let mean: f64 = values.iter().sum::<f64>() / 5.0;
        let var: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / 4.0;
        assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(var, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn min_max_maps_to_unit_interval() {
        let mut values = vec![10.0, 20.0, 30.0];
        normalize(&mut values, Normalization::MinMax);
        assert_abs_diff_eq!(values[0], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(values[1], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(values[2], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn arctan_squashes_into_open_interval() {
        let mut values = vec![-100.0, 0.0, 100.0];
        normalize(&mut values, Normalization::Arctan);
        assert!(values.iter().all(|v| v.abs() < 1.0));
        assert_abs_diff_eq!(values[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn unknown_normalization_is_rejected() {
        match "quantile".parse::<Normalization>().unwrap_err() {
            DistError::UnknownNormalization(name) => assert_eq!(name, "quantile"),
            other => panic!("expected UnknownNormalization, got {:?}", other),
        }
        assert_eq!("".parse::<Normalization>().unwrap(), Normalization::None);
    }

    #[test]
    fn end_to_end_summary_written() {
        let dir = tempdir().unwrap();
        let score_path = dir.path().join("scores.profile");
        let pheno_path = dir.path().join("pheno.tsv");

        let mut scores = fs::File::create(&score_path).unwrap();
        let mut pheno = fs::File::create(&pheno_path).unwrap();
        for i in 0..10 {
            // Controls score low, cases score high.
            let (code, base) = if i < 5 { (1, 0.0) } else { (2, 5.0) };
            writeln!(scores, "F{i} S{i} {}", base + i as f64 * 0.1).unwrap();
            writeln!(pheno, "S{i}\t{code}").unwrap();
        }

        let config = DistConfig {
            score_path,
            pheno_path,
            pheno_name: "T2D".to_string(),
            normalize: "z_std".to_string(),
            out_prefix: dir.path().join("out").to_str().unwrap().to_string(),
        };
        let summary = run(&config).unwrap();
        let content = fs::read_to_string(summary).unwrap();
        assert!(content.starts_with("Group\tN\tMean\tSD\tMedian"));
        assert!(content.contains("Control\t5\t"));
        assert!(content.contains("Case\t5\t"));
        assert!(content.contains("Mann-Whitney U"));
    }

    #[test]
    fn empty_case_group_is_fatal() {
        let dir = tempdir().unwrap();
        let score_path = dir.path().join("scores.profile");
        let pheno_path = dir.path().join("pheno.tsv");
        fs::write(&score_path, "F1 S1 0.5\nF2 S2 0.7\n").unwrap();
        fs::write(&pheno_path, "S1\t1\nS2\t1\n").unwrap();
        let config = DistConfig {
            score_path,
            pheno_path,
            pheno_name: "T2D".to_string(),
            normalize: "none".to_string(),
            out_prefix: dir.path().join("out").to_str().unwrap().to_string(),
        };
        match run(&config).unwrap_err() {
            DistError::EmptyGroup(group) => assert_eq!(group, "Case"),
            other => panic!("expected EmptyGroup, got {:?}", other),
        }
    }
}
