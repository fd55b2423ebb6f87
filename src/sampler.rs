//! Sampler configuration and run loop.
//!
//! The sampler moves through `Uninitialized -> BurnIn -> Sampling ->
//! Finished`: construction validates the configuration and initializes the
//! chain state, burn-in discards `n_burnin` sweeps, sampling retains every
//! `thinning_interval`-th of the next `n_samples * thinning_interval`
//! sweeps, and once finished the trace is handed out read-only.

use thiserror::Error;

use crate::chain::GibbsChain;
use crate::model::{ModelOptions, SelectionModel};
use crate::table::CountTable;
use crate::trace::Trace;

#[derive(Error, Debug)]
pub enum SamplerError {
    /// Caller misconfiguration, rejected before any sweep runs.
    #[error("invalid sampler configuration: {0}")]
    Config(String),
    /// Non-finite conditional draw. Fatal: the chain state is corrupt and
    /// the cause is deterministic given seed and data, so no retry.
    #[error("non-finite draw for {variable} at sweep {sweep}")]
    NumericalInstability { sweep: u64, variable: String },
}

/// Sampler configuration.
///
/// `numerical_floor` is the minimum value substituted for any degenerate
/// (zero) shape or rate parameter before a conditional distribution is
/// constructed; it is part of the configuration contract so runs are
/// reproducible under it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GibbsSettings {
    pub n_burnin: u64,
    pub n_samples: u64,
    pub thinning_interval: u64,
    pub random_seed: u64,
    /// Central credible-interval coverage in (0, 1).
    pub interval_coverage: f64,
    pub numerical_floor: f64,
    pub diagnostics_enabled: bool,
}

impl Default for GibbsSettings {
    fn default() -> Self {
        Self {
            n_burnin: 500,
            n_samples: 1000,
            thinning_interval: 1,
            random_seed: 0,
            interval_coverage: 0.95,
            numerical_floor: 1e-12,
            diagnostics_enabled: false,
        }
    }
}

impl GibbsSettings {
    /// Validate the configuration. Cheap, and run before any input row is
    /// consumed; `n_burnin < 0` is unrepresentable by type.
    pub fn validate(&self) -> Result<(), SamplerError> {
        if self.n_samples == 0 {
            return Err(SamplerError::Config("n_samples must be > 0".into()));
        }
        if self.thinning_interval == 0 {
            return Err(SamplerError::Config("thinning_interval must be >= 1".into()));
        }
        if !(self.interval_coverage > 0.0 && self.interval_coverage < 1.0) {
            return Err(SamplerError::Config(format!(
                "interval_coverage must lie in (0, 1), got {}",
                self.interval_coverage
            )));
        }
        if !(self.numerical_floor > 0.0) || !self.numerical_floor.is_finite() {
            return Err(SamplerError::Config(format!(
                "numerical_floor must be a finite value > 0, got {}",
                self.numerical_floor
            )));
        }
        Ok(())
    }

    fn total_sweeps(&self) -> u64 {
        self.n_burnin + self.n_samples * self.thinning_interval
    }
}

/// Per-sweep progress, reported to the cancellation callback.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct Progress {
    /// Completed sweeps so far, including burn-in.
    pub sweep: u64,
    pub total_sweeps: u64,
    pub burnin: bool,
    /// Retained trace entries so far.
    pub retained: usize,
    /// Fraction of selection-value moves accepted in this sweep.
    pub accept_selection: f64,
    pub accept_dispersion: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    BurnIn,
    Sampling,
    Finished,
}

/// A single-chain Gibbs sampler run.
///
/// Owns its chain state exclusively; nothing outside the sampler can observe
/// or mutate a partially-updated sweep. Multiple samplers may run
/// independently in one process.
pub struct GibbsSampler {
    chain: GibbsChain,
    settings: GibbsSettings,
    phase: Phase,
    trace: Trace,
    sweeps_done: u64,
}

impl GibbsSampler {
    /// Validate `settings` and `options`, bind the observations to the
    /// model, and initialize the chain state. Fails with
    /// [`SamplerError::Config`] before touching any observation.
    pub fn new(
        table: &CountTable,
        options: ModelOptions,
        settings: GibbsSettings,
    ) -> Result<Self, SamplerError> {
        settings.validate()?;
        options.validate().map_err(SamplerError::Config)?;

        let model = SelectionModel::new(table, options);
        let entities = table.entities().to_vec();
        let chain = GibbsChain::new(
            model,
            entities.clone(),
            settings.random_seed,
            settings.numerical_floor,
        );
        let trace = Trace::with_capacity(
            entities,
            settings.n_samples as usize,
            settings.random_seed,
            settings.n_burnin,
            settings.thinning_interval,
        );
        Ok(GibbsSampler {
            chain,
            settings,
            phase: Phase::BurnIn,
            trace,
            sweeps_done: 0,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn settings(&self) -> &GibbsSettings {
        &self.settings
    }

    /// Run the chain to completion and return the finished trace.
    pub fn sample(self) -> Result<Trace, SamplerError> {
        self.sample_with(|_| true)
    }

    /// Run the chain, consulting `control` between sweeps; returning `false`
    /// stops the run early. A stopped trace contains only fully-completed,
    /// fully-thinned samples - a partial sweep is never exposed.
    pub fn sample_with(
        mut self,
        mut control: impl FnMut(&Progress) -> bool,
    ) -> Result<Trace, SamplerError> {
        let total = self.settings.total_sweeps();
        let n_entities = self.chain.model().len().max(1) as f64;

        while self.sweeps_done < total {
            if self.sweeps_done == self.settings.n_burnin {
                self.phase = Phase::Sampling;
            }

            let info = self.chain.sweep()?;
            self.sweeps_done += 1;

            if self.sweeps_done > self.settings.n_burnin {
                let post = self.sweeps_done - self.settings.n_burnin;
                if post % self.settings.thinning_interval == 0 {
                    let loglik = self.chain.loglikelihood();
                    self.trace.push(self.chain.state(), loglik);
                }
            }

            let progress = Progress {
                sweep: self.sweeps_done,
                total_sweeps: total,
                burnin: self.phase == Phase::BurnIn,
                retained: self.trace.len(),
                accept_selection: info.accepted_selection as f64 / n_entities,
                accept_dispersion: info.accepted_dispersion,
            };
            if !control(&progress) {
                log::info!(
                    "sampling cancelled after sweep {} with {} retained samples",
                    self.sweeps_done,
                    self.trace.len()
                );
                break;
            }
        }

        self.phase = Phase::Finished;
        Ok(self.trace)
    }
}
