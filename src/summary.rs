//! Posterior summarization.
//!
//! A pure function of a finished trace: one row per entity in input order,
//! with a point estimate, a central credible interval from empirical
//! quantiles, and the posterior standard deviation.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use thiserror::Error;

use crate::math::{mean, quantile_sorted, variance};
use crate::trace::Trace;

#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("failed to write posterior summary")]
    Io(#[from] std::io::Error),
    #[error("failed to encode posterior summary")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointEstimate {
    Mean,
    /// Robust against heavy posterior tails; the default.
    #[default]
    Median,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryOptions {
    pub point_estimate: PointEstimate,
    /// Central credible-interval coverage in (0, 1).
    pub interval_coverage: f64,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            point_estimate: PointEstimate::default(),
            interval_coverage: 0.95,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntitySummary {
    pub entity: String,
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
    pub sd: f64,
}

/// Posterior summary table, one row per entity in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorSummary {
    rows: Vec<EntitySummary>,
}

impl PosteriorSummary {
    pub fn rows(&self) -> &[EntitySummary] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write `entity,estimate,lower,upper,sd` rows with a header.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), SummaryError> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(["entity", "estimate", "lower", "upper", "sd"])?;
        for row in &self.rows {
            writer.write_record([
                row.entity.as_str(),
                &format!("{:.6}", row.estimate),
                &format!("{:.6}", row.lower),
                &format!("{:.6}", row.upper),
                &format!("{:.6}", row.sd),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn to_path<P: AsRef<Path>>(&self, path: P) -> Result<(), SummaryError> {
        self.write_csv(File::create(path)?)
    }
}

/// Summarize a finished trace. Pure: calling it twice on the same trace
/// yields identical output. Entities with a degenerate (constant) trace get
/// a zero-width interval rather than being dropped.
pub fn summarize(trace: &Trace, options: &SummaryOptions) -> PosteriorSummary {
    let q_lower = (1.0 - options.interval_coverage) / 2.0;
    let q_upper = 1.0 - q_lower;

    let rows = trace
        .entities()
        .iter()
        .enumerate()
        .map(|(i, entity)| {
            let draws = trace.selection_draws(i);
            if draws.is_empty() {
                // A cancelled run can leave an empty trace; keep the row.
                return EntitySummary {
                    entity: entity.clone(),
                    estimate: f64::NAN,
                    lower: f64::NAN,
                    upper: f64::NAN,
                    sd: f64::NAN,
                };
            }
            let mut sorted = draws.to_vec();
            sorted.sort_by(|a, b| a.partial_cmp(b).expect("draws are finite"));
            let estimate = match options.point_estimate {
                PointEstimate::Mean => mean(draws),
                PointEstimate::Median => quantile_sorted(&sorted, 0.5),
            };
            EntitySummary {
                entity: entity.clone(),
                estimate,
                lower: quantile_sorted(&sorted, q_lower),
                upper: quantile_sorted(&sorted, q_upper),
                sd: variance(draws).sqrt(),
            }
        })
        .collect();

    PosteriorSummary { rows }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainState;
    use pretty_assertions::assert_eq;

    fn toy_trace(samples: &[(f64, f64)]) -> Trace {
        let mut trace = Trace::with_capacity(
            vec!["a".into(), "b".into()],
            samples.len(),
            0,
            0,
            1,
        );
        for &(wa, wb) in samples {
            let state = ChainState {
                selection: vec![wa, wb],
                multiplier: vec![1.0, 1.0],
                depth: 1.0,
                dispersion: 1.0,
            };
            trace.push(&state, 0.0);
        }
        trace
    }

    #[test]
    fn one_row_per_entity_in_input_order() {
        let trace = toy_trace(&[(1.0, 2.0), (3.0, 4.0)]);
        let summary = summarize(&trace, &SummaryOptions::default());
        let names: Vec<&str> = summary.rows().iter().map(|r| r.entity.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn degenerate_trace_keeps_entity_with_zero_width_interval() {
        let trace = toy_trace(&[(2.0, 1.0), (2.0, 3.0), (2.0, 5.0)]);
        let summary = summarize(&trace, &SummaryOptions::default());
        let row = &summary.rows()[0];
        assert_eq!(row.estimate, 2.0);
        assert_eq!(row.lower, 2.0);
        assert_eq!(row.upper, 2.0);
        assert_eq!(row.sd, 0.0);
    }

    #[test]
    fn mean_and_median_select_different_statistics() {
        let trace = toy_trace(&[(1.0, 0.0), (1.0, 0.0), (10.0, 0.0)]);
        let median = summarize(
            &trace,
            &SummaryOptions {
                point_estimate: PointEstimate::Median,
                ..SummaryOptions::default()
            },
        );
        let mean = summarize(
            &trace,
            &SummaryOptions {
                point_estimate: PointEstimate::Mean,
                ..SummaryOptions::default()
            },
        );
        assert_eq!(median.rows()[0].estimate, 1.0);
        assert_eq!(mean.rows()[0].estimate, 4.0);
    }

    #[test]
    fn summarize_is_idempotent() {
        let trace = toy_trace(&[(1.0, 2.0), (0.5, 2.5), (1.5, 1.5)]);
        let options = SummaryOptions::default();
        assert_eq!(summarize(&trace, &options), summarize(&trace, &options));
    }

    #[test]
    fn widening_coverage_never_narrows_interval() {
        let trace = toy_trace(&[(1.0, 0.0), (2.0, 0.0), (3.0, 0.0), (4.0, 0.0), (5.0, 0.0)]);
        let narrow = summarize(
            &trace,
            &SummaryOptions {
                interval_coverage: 0.8,
                ..SummaryOptions::default()
            },
        );
        let wide = summarize(
            &trace,
            &SummaryOptions {
                interval_coverage: 0.95,
                ..SummaryOptions::default()
            },
        );
        assert!(wide.rows()[0].lower <= narrow.rows()[0].lower);
        assert!(wide.rows()[0].upper >= narrow.rows()[0].upper);
    }

    #[test]
    fn csv_output_has_header_and_rows() {
        let trace = toy_trace(&[(1.0, 2.0)]);
        let summary = summarize(&trace, &SummaryOptions::default());
        let mut buf = Vec::new();
        summary.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("entity,estimate,lower,upper,sd"));
        assert!(lines.next().unwrap().starts_with("a,"));
    }
}
