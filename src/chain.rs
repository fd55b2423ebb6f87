//! Chain state and the Gibbs sweep.
//!
//! Updates are sequential-in-place (classic sequential Gibbs): each entity's
//! multiplier and selection value are drawn in input order against the
//! current state, then the shared hyperparameters. This order is fixed and,
//! together with the seeded RNG, defines the exact numeric trajectory of a
//! run.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::model::SelectionModel;
use crate::sampler::SamplerError;

/// Full assignment of current values to all latent variables and shared
/// hyperparameters. Owned by the running chain; snapshots of it are what the
/// trace retains.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainState {
    /// Latent selection value per entity, input order.
    pub selection: Vec<f64>,
    /// Overdispersion multiplier per entity.
    pub multiplier: Vec<f64>,
    /// Shared library-depth rate.
    pub depth: f64,
    /// Shared overdispersion precision.
    pub dispersion: f64,
}

/// Acceptance accounting for one sweep.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SweepInfo {
    pub accepted_selection: usize,
    pub accepted_dispersion: bool,
}

pub(crate) struct GibbsChain {
    model: SelectionModel,
    entities: Vec<String>,
    state: ChainState,
    rng: ChaCha8Rng,
    floor: f64,
    sweep_count: u64,
}

impl GibbsChain {
    /// Initialize the chain from data-derived starting values and record the
    /// seed into the RNG stream.
    pub(crate) fn new(model: SelectionModel, entities: Vec<String>, seed: u64, floor: f64) -> Self {
        let n = model.len();
        let state = ChainState {
            selection: model.initial_selection(),
            multiplier: vec![1.0; n],
            depth: model.initial_depth().max(floor),
            dispersion: model.dispersion_prior_mean().max(floor),
        };
        GibbsChain {
            model,
            entities,
            state,
            rng: ChaCha8Rng::seed_from_u64(seed),
            floor,
            sweep_count: 0,
        }
    }

    pub(crate) fn state(&self) -> &ChainState {
        &self.state
    }

    pub(crate) fn model(&self) -> &SelectionModel {
        &self.model
    }

    pub(crate) fn loglikelihood(&self) -> f64 {
        self.model.loglikelihood(
            &self.state.selection,
            &self.state.multiplier,
            self.state.depth,
            self.state.dispersion,
        )
    }

    /// One full sweep of conditional updates. Any non-finite draw is fatal:
    /// it indicates a misconfigured model, not transient noise, so it is
    /// surfaced with the sweep index and the offending variable instead of
    /// being retried.
    pub(crate) fn sweep(&mut self) -> Result<SweepInfo, SamplerError> {
        let sweep = self.sweep_count;
        let mut accepted_selection = 0;

        for i in 0..self.model.len() {
            let u_i = self
                .model
                .draw_multiplier(
                    i,
                    self.state.selection[i],
                    self.state.depth,
                    self.state.dispersion,
                    self.floor,
                    &mut self.rng,
                )
                .map_err(|_| self.instability(sweep, "multiplier", Some(i)))?;
            self.state.multiplier[i] = u_i;

            let (w_i, accepted) = self.model.step_selection(
                i,
                self.state.selection[i],
                u_i,
                self.state.depth,
                &mut self.rng,
            );
            if !w_i.is_finite() {
                return Err(self.instability(sweep, "selection", Some(i)));
            }
            self.state.selection[i] = w_i;
            accepted_selection += usize::from(accepted);
        }

        let depth = self
            .model
            .draw_depth(
                &self.state.selection,
                &self.state.multiplier,
                self.floor,
                &mut self.rng,
            )
            .map_err(|_| self.instability(sweep, "depth", None))?;
        self.state.depth = depth;

        let (dispersion, accepted_dispersion) =
            self.model
                .step_dispersion(&self.state.multiplier, self.state.dispersion, &mut self.rng);
        if !dispersion.is_finite() {
            return Err(self.instability(sweep, "dispersion", None));
        }
        self.state.dispersion = dispersion;

        self.sweep_count += 1;
        Ok(SweepInfo {
            accepted_selection,
            accepted_dispersion,
        })
    }

    fn instability(&self, sweep: u64, kind: &str, entity: Option<usize>) -> SamplerError {
        let variable = match entity {
            Some(i) => format!("{kind}[{}]", self.entities[i]),
            None => kind.to_string(),
        };
        SamplerError::NumericalInstability { sweep, variable }
    }
}
