//! Convergence diagnostics and trace figures.
//!
//! Runs only on a finished, read-only trace and only when diagnostics are
//! requested. Produces a convergence table (effective sample size and
//! split-chain R-hat per variable, with threshold flags) and one SVG trace
//! figure per entity and per hyperparameter. Write failures are warnings,
//! never fatal: inference output is already complete by the time this runs.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::math::{autocovariance, mean, variance};
use crate::trace::Trace;

/// Variables with fewer effective samples than this are flagged.
const ESS_FLOOR: f64 = 100.0;
/// Variables with a split R-hat above this are flagged.
const RHAT_CEILING: f64 = 1.05;

#[derive(Debug, Clone)]
pub struct DiagnosticsOptions {
    /// Directory receiving the convergence table and figures.
    pub output_dir: PathBuf,
}

impl DiagnosticsOptions {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDiagnostic {
    pub variable: String,
    pub ess: f64,
    pub split_rhat: f64,
    pub flagged: bool,
}

#[derive(Debug, Clone)]
pub struct DiagnosticsReport {
    /// One entry per entity, then the hyperparameters.
    pub variables: Vec<VariableDiagnostic>,
    /// Number of files that could not be written.
    pub write_failures: usize,
}

impl DiagnosticsReport {
    pub fn flagged(&self) -> impl Iterator<Item = &VariableDiagnostic> {
        self.variables.iter().filter(|v| v.flagged)
    }
}

/// Compute diagnostics for every variable and write the convergence table
/// and figures into `options.output_dir`. Per-file failures are logged with
/// `log::warn!` and counted; they never abort the run.
pub fn report(trace: &Trace, options: &DiagnosticsOptions) -> DiagnosticsReport {
    let mut variables: Vec<VariableDiagnostic> = (0..trace.num_entities())
        .into_par_iter()
        .map(|i| diagnose(&trace.entities()[i], trace.selection_draws(i)))
        .collect();
    variables.push(diagnose("depth", trace.depth_draws()));
    variables.push(diagnose("dispersion", trace.dispersion_draws()));

    let mut write_failures = 0;

    if let Err(err) = fs::create_dir_all(&options.output_dir) {
        log::warn!(
            "could not create diagnostics directory {}: {err}",
            options.output_dir.display()
        );
        // Every subsequent write will fail; report them as one failure.
        return DiagnosticsReport {
            variables,
            write_failures: 1,
        };
    }

    write_failures += write_or_warn(
        &options.output_dir.join("convergence.csv"),
        &convergence_csv(&variables),
    );

    for (i, entity) in trace.entities().iter().enumerate() {
        let path = options
            .output_dir
            .join(format!("trace_{}.svg", sanitize(entity)));
        let svg = trace_figure(entity, trace.selection_draws(i));
        write_failures += write_or_warn(&path, &svg);
    }
    write_failures += write_or_warn(
        &options.output_dir.join("trace_depth.svg"),
        &trace_figure("depth", trace.depth_draws()),
    );
    write_failures += write_or_warn(
        &options.output_dir.join("trace_dispersion.svg"),
        &trace_figure("dispersion", trace.dispersion_draws()),
    );
    write_failures += write_or_warn(
        &options.output_dir.join("loglikelihood.svg"),
        &trace_figure("log likelihood", trace.loglik_draws()),
    );

    DiagnosticsReport {
        variables,
        write_failures,
    }
}

fn diagnose(variable: &str, draws: &[f64]) -> VariableDiagnostic {
    let ess = effective_sample_size(draws);
    let split_rhat = split_rhat(draws);
    // A constant trace (ess = 0) means the chain never moved: flag it.
    let flagged = ess < ESS_FLOOR || split_rhat > RHAT_CEILING || split_rhat.is_nan();
    VariableDiagnostic {
        variable: variable.to_string(),
        ess,
        split_rhat,
        flagged,
    }
}

/// Effective sample size with Geyer's initial-monotone truncation of the
/// paired autocorrelation sums. Returns 0 for a constant trace.
pub fn effective_sample_size(draws: &[f64]) -> f64 {
    let n = draws.len();
    if n < 4 {
        return n as f64;
    }
    let c0 = autocovariance(draws, 0);
    if c0 <= 0.0 {
        return 0.0;
    }

    let mut tau = 1.0;
    let mut prev_pair = f64::INFINITY;
    let mut lag = 1;
    while lag + 1 < n {
        let pair = (autocovariance(draws, lag) + autocovariance(draws, lag + 1)) / c0;
        if pair <= 0.0 {
            break;
        }
        // Enforce monotone decrease of the paired sums.
        let pair = pair.min(prev_pair);
        tau += 2.0 * pair;
        prev_pair = pair;
        lag += 2;
    }
    (n as f64 / tau).min(n as f64)
}

/// Split-chain R-hat: the single chain is split in half and the halves are
/// compared as independent chains. NaN for a constant trace.
pub fn split_rhat(draws: &[f64]) -> f64 {
    let half = draws.len() / 2;
    if half < 2 {
        return f64::NAN;
    }
    let first = &draws[..half];
    let second = &draws[draws.len() - half..];

    let w = (variance(first) + variance(second)) / 2.0;
    if w == 0.0 {
        return f64::NAN;
    }
    let grand = (mean(first) + mean(second)) / 2.0;
    let b = half as f64
        * ((mean(first) - grand).powi(2) + (mean(second) - grand).powi(2));
    let n = half as f64;
    let var_plus = (n - 1.0) / n * w + b / n;
    (var_plus / w).sqrt()
}

fn convergence_csv(variables: &[VariableDiagnostic]) -> String {
    let mut out = String::from("variable,ess,split_rhat,flagged\n");
    for v in variables {
        let _ = writeln!(
            out,
            "{},{:.2},{:.4},{}",
            v.variable, v.ess, v.split_rhat, v.flagged
        );
    }
    out
}

fn write_or_warn(path: &Path, contents: &str) -> usize {
    match fs::write(path, contents) {
        Ok(()) => 0,
        Err(err) => {
            log::warn!("could not write {}: {err}", path.display());
            1
        }
    }
}

/// Keep figure file names filesystem-safe.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

const FIG_WIDTH: f64 = 800.0;
const FIG_HEIGHT: f64 = 300.0;
const MARGIN: f64 = 40.0;
const HIST_BINS: usize = 20;

/// Hand-built SVG: trace polyline over the retained samples plus a marginal
/// histogram panel on the right.
fn trace_figure(title: &str, draws: &[f64]) -> String {
    let mut svg = String::new();
    svg.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        svg,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{FIG_WIDTH}\" height=\"{FIG_HEIGHT}\">"
    );
    svg.push_str("  <rect width=\"100%\" height=\"100%\" fill=\"#ffffff\"/>\n");
    let _ = writeln!(
        svg,
        "  <text x=\"{}\" y=\"20\" text-anchor=\"middle\" font-family=\"monospace\" font-size=\"14\">{}</text>",
        FIG_WIDTH / 2.0,
        title
    );

    if draws.is_empty() {
        svg.push_str("</svg>\n");
        return svg;
    }

    let lo = draws.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = draws.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let span = if hi > lo { hi - lo } else { 1.0 };

    // Trace panel occupies the left 70%.
    let panel_w = FIG_WIDTH * 0.7 - 2.0 * MARGIN;
    let panel_h = FIG_HEIGHT - 2.0 * MARGIN;
    let x_of = |s: usize| MARGIN + panel_w * s as f64 / (draws.len().max(2) - 1) as f64;
    let y_of = |v: f64| MARGIN + panel_h * (1.0 - (v - lo) / span);

    let mut points = String::new();
    for (s, &v) in draws.iter().enumerate() {
        let _ = write!(points, "{:.1},{:.1} ", x_of(s), y_of(v));
    }
    let _ = writeln!(
        svg,
        "  <polyline points=\"{}\" fill=\"none\" stroke=\"#1f77b4\" stroke-width=\"1\"/>",
        points.trim_end()
    );

    // Histogram panel on the right 30%.
    let mut bins = [0usize; HIST_BINS];
    for &v in draws {
        let idx = (((v - lo) / span) * HIST_BINS as f64) as usize;
        bins[idx.min(HIST_BINS - 1)] += 1;
    }
    let max_count = bins.iter().copied().max().unwrap_or(1).max(1);
    let hist_x = FIG_WIDTH * 0.7;
    let hist_w = FIG_WIDTH * 0.3 - MARGIN;
    let bin_h = panel_h / HIST_BINS as f64;
    for (b, &count) in bins.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let w = hist_w * count as f64 / max_count as f64;
        // Bin 0 is the lowest value, drawn at the bottom.
        let y = MARGIN + panel_h - (b + 1) as f64 * bin_h;
        let _ = writeln!(
            svg,
            "  <rect x=\"{hist_x:.1}\" y=\"{y:.1}\" width=\"{w:.1}\" height=\"{:.1}\" fill=\"#aec7e8\" stroke=\"#1f77b4\" stroke-width=\"0.5\"/>",
            bin_h.max(1.0)
        );
    }

    svg.push_str("</svg>\n");
    svg
}
