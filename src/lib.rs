//! Estimate per-entity selection values from paired count observations
//! using Gibbs-sampling Bayesian inference.
//!
//! The input is a table of `(entity, input_count, output_count)` rows; the
//! output is a posterior point estimate and credible interval per entity,
//! with optional convergence diagnostics and trace figures.

pub(crate) mod chain;
pub(crate) mod diagnostics;
pub(crate) mod math;
pub(crate) mod model;
pub(crate) mod sampler;
pub(crate) mod summary;
pub(crate) mod table;
pub(crate) mod trace;

pub use chain::ChainState;
pub use diagnostics::{
    effective_sample_size, report, split_rhat, DiagnosticsOptions, DiagnosticsReport,
    VariableDiagnostic,
};
pub use model::{LatentPrior, ModelOptions, SelectionModel};
pub use sampler::{GibbsSampler, GibbsSettings, Phase, Progress, SamplerError};
pub use summary::{
    summarize, EntitySummary, PointEstimate, PosteriorSummary, SummaryError, SummaryOptions,
};
pub use table::{CountTable, Observation, TableError};
pub use trace::Trace;
