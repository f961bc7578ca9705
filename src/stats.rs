//! # Statistical Capabilities
//!
//! Agreement metrics between observed and predicted phenotype values, and
//! the rank-sum test used by the distribution subcommand. P-values come
//! from `statrs` distributions.

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("unknown metric '{0}'; expected 'pearsonr' or 'rscore'")]
    UnknownMetric(String),
    #[error("{0} requires at least {1} paired observations")]
    TooFewObservations(&'static str, usize),
    #[error("sample vectors have different lengths: {0} vs {1}")]
    LengthMismatch(usize, usize),
}

/// Agreement metric between observed and predicted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Square of the Pearson correlation coefficient.
    PearsonRSquared,
    /// Coefficient of determination.
    RSquared,
}

impl FromStr for Metric {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pearsonr" => Ok(Metric::PearsonRSquared),
            "rscore" => Ok(Metric::RSquared),
            other => Err(StatsError::UnknownMetric(other.to_string())),
        }
    }
}

/// Computes the chosen agreement metric.
pub fn score(observed: &[f64], predicted: &[f64], metric: Metric) -> Result<f64, StatsError> {
    match metric {
        Metric::PearsonRSquared => {
            let (r, _) = pearson(observed, predicted)?;
            Ok(r * r)
        }
        Metric::RSquared => r2_score(observed, predicted),
    }
}

/// Pearson correlation coefficient with a two-sided p-value from the
/// t distribution with n - 2 degrees of freedom.
pub fn pearson(x: &[f64], y: &[f64]) -> Result<(f64, f64), StatsError> {
    if x.len() != y.len() {
        return Err(StatsError::LengthMismatch(x.len(), y.len()));
    }
    let n = x.len();
    if n < 3 {
        return Err(StatsError::TooFewObservations("pearson", 3));
    }
    let nf = n as f64;
    let mx = x.iter().sum::<f64>() / nf;
    let my = y.iter().sum::<f64>() / nf;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for i in 0..n {
        let dx = x[i] - mx;
        let dy = y[i] - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        // A constant vector has no correlation; report independence.
        return Ok((0.0, 1.0));
    }
    let r = (sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0);

    let denom = 1.0 - r * r;
    let p = if denom <= f64::EPSILON {
        0.0
    } else {
        let t = r.abs() * ((nf - 2.0) / denom).sqrt();
        let dist = StudentsT::new(0.0, 1.0, nf - 2.0)
            .expect("degrees of freedom are positive for n >= 3");
        2.0 * (1.0 - dist.cdf(t))
    };
    Ok((r, p.clamp(0.0, 1.0)))
}

/// Coefficient of determination.
pub fn r2_score(observed: &[f64], predicted: &[f64]) -> Result<f64, StatsError> {
    if observed.len() != predicted.len() {
        return Err(StatsError::LengthMismatch(observed.len(), predicted.len()));
    }
    if observed.len() < 2 {
        return Err(StatsError::TooFewObservations("r2_score", 2));
    }
    let mean = observed.iter().sum::<f64>() / observed.len() as f64;
    let ss_res: f64 = observed
        .iter()
        .zip(predicted.iter())
        .map(|(o, p)| (o - p) * (o - p))
        .sum();
    let ss_tot: f64 = observed.iter().map(|o| (o - mean) * (o - mean)).sum();
    if ss_tot == 0.0 {
        return Ok(if ss_res == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - ss_res / ss_tot)
}

/// Two-sided Mann-Whitney U test with midranks, tie correction and the
/// normal approximation (continuity-corrected). Returns `(u, p)` where
/// `u` is the smaller of the two U statistics.
pub fn mann_whitney_u(a: &[f64], b: &[f64]) -> Result<(f64, f64), StatsError> {
    let n1 = a.len();
    let n2 = b.len();
    if n1 == 0 || n2 == 0 {
        return Err(StatsError::TooFewObservations("mann_whitney_u", 1));
    }

    // Midranks over the pooled sample; track tie group sizes.
    let n = n1 + n2;
    let mut pooled: Vec<(f64, bool)> = a
        .iter()
        .map(|&v| (v, true))
        .chain(b.iter().map(|&v| (v, false)))
        .collect();
    pooled.sort_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut rank_sum_a = 0.0;
    let mut tie_term = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && pooled[j + 1].0 == pooled[i].0 {
            j += 1;
        }
        let count = (j - i + 1) as f64;
        let midrank = (i + j) as f64 / 2.0 + 1.0;
        for item in &pooled[i..=j] {
            if item.1 {
                rank_sum_a += midrank;
            }
        }
        if count > 1.0 {
            tie_term += count * count * count - count;
        }
        i = j + 1;
    }

    let n1f = n1 as f64;
    let n2f = n2 as f64;
    let nf = n as f64;
    let u1 = rank_sum_a - n1f * (n1f + 1.0) / 2.0;
    let u2 = n1f * n2f - u1;
    let u = u1.min(u2);

    let mean = n1f * n2f / 2.0;
    let variance = if n > 1 {
        n1f * n2f / 12.0 * ((nf + 1.0) - tie_term / (nf * (nf - 1.0)))
    } else {
        0.0
    };
    if variance <= 0.0 {
        // Complete ties: no evidence either way.
        return Ok((u, 1.0));
    }
    let z = (u - mean + 0.5) / variance.sqrt();
    let normal = Normal::new(0.0, 1.0).expect("standard normal parameters are valid");
    let p = (2.0 * normal.cdf(z)).clamp(0.0, 1.0);
    Ok((u, p))
}
