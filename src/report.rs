//! # Result Persistence
//!
//! Writers for the tab-separated result tables: the ranked
//! feature-importance table, the per-sample prediction tables, and the
//! distribution summary. Each file is opened, written through a
//! `BufWriter` and closed within one call; reruns regenerate everything.

use crate::model::FittedModel;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error writing report: {0}")]
    Io(#[from] std::io::Error),
}

/// One row of a prediction table.
#[derive(Debug, Clone)]
pub struct PredRow {
    pub real: f64,
    pub predict: f64,
    pub flagged: bool,
    pub iid: String,
}

/// Writes `Feature\tScore` with the intercept first, then features by
/// descending absolute coefficient. Feature scores are absolute
/// magnitudes; the intercept is reported as-is.
pub fn write_feature_importance(path: &Path, model: &FittedModel) -> Result<(), ReportError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "Feature\tScore")?;
    writeln!(writer, "Intercept\t{}", model.intercept)?;
    for idx in model.ranked_features() {
        writeln!(
            writer,
            "{}\t{}",
            model.feature_names[idx],
            model.coefficients[idx].abs()
        )?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes a `Real\tPredict\tDiff>0.1\tIID` prediction table. The flag
/// column uses capitalized `True`/`False`, as the downstream table
/// consumers expect.
pub fn write_predval(path: &Path, rows: &[PredRow]) -> Result<(), ReportError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "Real\tPredict\tDiff>0.1\tIID")?;
    for row in rows {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}",
            row.real,
            row.predict,
            if row.flagged { "True" } else { "False" },
            row.iid
        )?;
    }
    writer.flush()?;
    Ok(())
}

/// Per-group summary statistics for the distribution report.
#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub label: String,
    pub n: usize,
    pub mean: f64,
    pub sd: f64,
    pub median: f64,
}

impl GroupSummary {
    pub fn from_values(label: &str, values: &[f64]) -> GroupSummary {
        let n = values.len();
        let nf = n.max(1) as f64;
        let mean = values.iter().sum::<f64>() / nf;
        let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / nf;
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median = if n == 0 {
            f64::NAN
        } else if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };
        GroupSummary {
            label: label.to_string(),
            n,
            mean,
            sd: var.sqrt(),
            median,
        }
    }
}

/// Writes the per-group summary plus the Mann-Whitney result.
pub fn write_dist_summary(
    path: &Path,
    groups: &[GroupSummary],
    u: f64,
    p_value: f64,
) -> Result<(), ReportError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "Group\tN\tMean\tSD\tMedian")?;
    for g in groups {
        writeln!(
            writer,
            "{}\t{}\t{:.6}\t{:.6}\t{:.6}",
            g.label, g.n, g.mean, g.sd, g.median
        )?;
    }
    writeln!(writer, "# Mann-Whitney U = {:.4}, p = {:.6}", u, p_value)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn feature_importance_ranked_with_intercept_first() {
        let model = FittedModel {
            intercept: 1.25,
            coefficients: Array1::from_vec(vec![0.2, -3.0, 1.0]),
            feature_names: vec!["PRS".into(), "Sex".into(), "Age".into()],
            lambda: 0.01,
        };
        let dir = tempdir().unwrap();
        let path = dir.path().join("fi.tsv");
        write_feature_importance(&path, &model).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "Feature\tScore");
        assert_eq!(lines[1], "Intercept\t1.25");
        assert!(lines[2].starts_with("Sex\t3"));
        assert!(lines[3].starts_with("Age\t1"));
        assert!(lines[4].starts_with("PRS\t0.2"));
    }

    #[test]
    fn predval_table_layout() {
        let rows = vec![
            PredRow {
                real: 1.5,
                predict: 1.6,
                flagged: false,
                iid: "S1".into(),
            },
            PredRow {
                real: 2.0,
                predict: 3.0,
                flagged: true,
                iid: "S2".into(),
            },
        ];
        let dir = tempdir().unwrap();
        let path = dir.path().join("pred.tsv");
        write_predval(&path, &rows).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "Real\tPredict\tDiff>0.1\tIID");
        assert_eq!(lines[1], "1.5\t1.6\tFalse\tS1");
        assert_eq!(lines[2], "2\t3\tTrue\tS2");
    }

    #[test]
    fn group_summary_statistics() {
        let s = GroupSummary::from_values("Control", &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(s.n, 4);
        assert_abs_diff_eq!(s.mean, 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(s.median, 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(s.sd, (1.25f64).sqrt(), epsilon = 1e-12);
    }
}
