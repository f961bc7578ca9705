//! # Plot Rendering
//!
//! HTML renderings of the pipeline outputs via `plotly`. Plots sit at the
//! edge of the pipeline: every figure is rebuilt from already-persisted
//! result data, and nothing downstream depends on them.

use crate::report::{GroupSummary, PredRow};
use log::info;
use plotly::common::{DashType, Line, Marker, Mode};
use plotly::common::color::NamedColor;
use plotly::layout::{Annotation, Axis};
use plotly::{BoxPlot, Layout, Plot, Scatter};
use std::path::Path;

/// Predicted-vs-observed scatter, colored by the `Diff>0.1` flag, with
/// the identity dashed line and the metric annotation at the center.
pub fn scatter_predval(path: &Path, rows: &[PredRow], annotation: &str, title: &str) {
    let mut plot = Plot::new();

    for (flagged, color, label) in [
        (false, NamedColor::SteelBlue, "Diff<=0.1"),
        (true, NamedColor::IndianRed, "Diff>0.1"),
    ] {
        let x: Vec<f64> = rows
            .iter()
            .filter(|r| r.flagged == flagged)
            .map(|r| r.predict)
            .collect();
        let y: Vec<f64> = rows
            .iter()
            .filter(|r| r.flagged == flagged)
            .map(|r| r.real)
            .collect();
        if x.is_empty() {
            continue;
        }
        let trace = Scatter::new(x, y)
            .mode(Mode::Markers)
            .marker(Marker::default().color(color).size(6))
            .name(label);
        plot.add_trace(trace);
    }

    let (min_p, max_p) = value_range(rows.iter().map(|r| r.predict));
    let identity = Scatter::new(vec![min_p, max_p], vec![min_p, max_p])
        .mode(Mode::Lines)
        .line(Line::default().color(NamedColor::Black).dash(DashType::Dash))
        .name("y = x");
    plot.add_trace(identity);

    let (min_r, max_r) = value_range(rows.iter().map(|r| r.real));
    let note = Annotation::new()
        .text(annotation.to_string())
        .x((min_p + max_p) / 2.0)
        .y((min_r + max_r) / 2.0)
        .show_arrow(false);

    let layout = Layout::new()
        .title(title.to_string())
        .x_axis(Axis::new().title("Predict".to_string()))
        .y_axis(Axis::new().title("Real".to_string()))
        .annotations(vec![note]);
    plot.set_layout(layout);
    plot.write_html(path);
    info!("Wrote plot '{}'", path.display());
}

/// Phenotype-vs-PRS scatter over the full table with its annotation.
pub fn scatter_pheno_vs_prs(
    path: &Path,
    prs: &[f64],
    pheno: &[f64],
    annotation: &str,
    pheno_name: &str,
    prs_name: &str,
) {
    let trace = Scatter::new(prs.to_vec(), pheno.to_vec())
        .mode(Mode::Markers)
        .marker(Marker::default().color(NamedColor::SteelBlue).size(6))
        .name(pheno_name);
    let (min_y, max_y) = value_range(pheno.iter().copied());
    let note = Annotation::new()
        .text(annotation.to_string())
        .x(0.0)
        .y((min_y + max_y) / 2.0)
        .show_arrow(false);

    let mut plot = Plot::new();
    plot.add_trace(trace);
    plot.set_layout(
        Layout::new()
            .title(format!("{pheno_name} vs {prs_name}"))
            .x_axis(Axis::new().title(prs_name.to_string()))
            .y_axis(Axis::new().title(pheno_name.to_string()))
            .annotations(vec![note]),
    );
    plot.write_html(path);
    info!("Wrote plot '{}'", path.display());
}

/// PRS box plot per case/control group, annotated with the test result.
pub fn box_by_group(
    path: &Path,
    groups: &[(GroupSummary, Vec<f64>)],
    annotation: &str,
    title: &str,
) {
    let mut plot = Plot::new();
    for (summary, values) in groups {
        let trace = BoxPlot::new(values.clone()).name(summary.label.as_str());
        plot.add_trace(trace);
    }
    let max_y = groups
        .iter()
        .flat_map(|(_, v)| v.iter().copied())
        .fold(f64::NEG_INFINITY, f64::max);
    let note = Annotation::new()
        .text(annotation.to_string())
        .x_ref("paper".to_string())
        .x(0.5)
        .y(max_y)
        .show_arrow(false);
    plot.set_layout(
        Layout::new()
            .title(title.to_string())
            .y_axis(Axis::new().title("PRS".to_string()))
            .annotations(vec![note]),
    );
    plot.write_html(path);
    info!("Wrote plot '{}'", path.display());
}

fn value_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        min = min.min(v);
        max = max.max(v);
    }
    if min.is_finite() && max.is_finite() {
        (min, max)
    } else {
        (0.0, 1.0)
    }
}
