//! Generative model for paired selection counts.
//!
//! For entity `i` with smoothed input depth `z_i = input_count_i + 1` and
//! output count `x_i`, the model is
//!
//! ```text
//! w_i  ~ LatentPrior                      (selection value)
//! u_i  ~ Gamma(phi, rate = phi)           (overdispersion multiplier)
//! beta ~ Gamma(1, 1)                      (library depth rate)
//! phi  ~ Gamma(shape, rate)               (dispersion hyperprior)
//! x_i  ~ Poisson(beta * z_i * w_i * u_i)
//! ```
//!
//! Marginalizing `u_i` makes the count distribution negative-binomial, so
//! mean-variance equality is not assumed; `phi` is a shared hyperparameter
//! with its own conditional. `u_i` and `beta` have conjugate Gamma
//! conditionals; `w_i` and `phi` are updated by Metropolis-within-Gibbs on
//! the log scale with a fixed multiplicative random-walk proposal.

use itertools::izip;
use rand::Rng;
use rand_distr::{Distribution, Gamma, Normal};
use thiserror::Error;

use crate::math::ln_factorial;
use crate::table::CountTable;

/// Scale of the log-space random-walk proposal for `w_i` and `phi`.
const PROPOSAL_STEP: f64 = 0.1;

/// Fixed weak Gamma prior on the depth rate `beta`.
const DEPTH_PRIOR_SHAPE: f64 = 1.0;
const DEPTH_PRIOR_RATE: f64 = 1.0;

/// A conditional draw hit a degenerate or non-finite parameterization that
/// the configured floor could not repair.
#[derive(Error, Debug)]
#[error("degenerate conditional distribution: {0}")]
pub struct ConditionalError(pub(crate) &'static str);

/// Prior over each latent selection value, selected at model construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LatentPrior {
    /// log w ~ Normal(mean, variance). Centered at zero effect by default.
    LogNormal { mean: f64, variance: f64 },
    /// w ~ Gamma(shape, rate).
    Gamma { shape: f64, rate: f64 },
}

impl LatentPrior {
    /// Unnormalized log density at `w > 0`.
    fn ln_density(&self, w: f64) -> f64 {
        let ln_w = w.ln();
        match *self {
            LatentPrior::LogNormal { mean, variance } => {
                -ln_w - (ln_w - mean) * (ln_w - mean) / (2.0 * variance)
            }
            LatentPrior::Gamma { shape, rate } => (shape - 1.0) * ln_w - rate * w,
        }
    }
}

/// Hyperprior configuration for the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelOptions {
    pub latent_prior: LatentPrior,
    pub dispersion_prior_shape: f64,
    pub dispersion_prior_rate: f64,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            latent_prior: LatentPrior::LogNormal {
                mean: 0.0,
                variance: 1.0,
            },
            dispersion_prior_shape: 2.0,
            dispersion_prior_rate: 2.0,
        }
    }
}

impl ModelOptions {
    pub(crate) fn validate(&self) -> Result<(), String> {
        match self.latent_prior {
            LatentPrior::LogNormal { mean, variance } => {
                if !mean.is_finite() || !variance.is_finite() || variance <= 0.0 {
                    return Err(format!(
                        "log-normal prior requires finite mean and variance > 0, got mean={mean}, variance={variance}"
                    ));
                }
            }
            LatentPrior::Gamma { shape, rate } => {
                if !(shape > 0.0 && rate > 0.0) || !shape.is_finite() || !rate.is_finite() {
                    return Err(format!(
                        "gamma prior requires shape > 0 and rate > 0, got shape={shape}, rate={rate}"
                    ));
                }
            }
        }
        if !(self.dispersion_prior_shape > 0.0) || !self.dispersion_prior_shape.is_finite() {
            return Err(format!(
                "dispersion_prior_shape must be > 0, got {}",
                self.dispersion_prior_shape
            ));
        }
        if !(self.dispersion_prior_rate > 0.0) || !self.dispersion_prior_rate.is_finite() {
            return Err(format!(
                "dispersion_prior_rate must be > 0, got {}",
                self.dispersion_prior_rate
            ));
        }
        Ok(())
    }
}

/// Observed counts bound to the model, plus the conditional samplers the
/// Gibbs sweep needs.
#[derive(Debug, Clone)]
pub struct SelectionModel {
    /// Smoothed input depths, `input_count + 1`.
    z: Vec<f64>,
    /// Output counts.
    x: Vec<u64>,
    sum_x: f64,
    /// Σ ln x_i!, a constant of the Poisson log-likelihood.
    ln_x_factorial_sum: f64,
    prior: LatentPrior,
    dispersion_shape: f64,
    dispersion_rate: f64,
    proposal: Normal<f64>,
}

impl SelectionModel {
    pub fn new(table: &CountTable, options: ModelOptions) -> Self {
        let z: Vec<f64> = table
            .observations()
            .iter()
            .map(|o| o.input as f64 + 1.0)
            .collect();
        let x: Vec<u64> = table.observations().iter().map(|o| o.output).collect();
        let sum_x = x.iter().map(|&v| v as f64).sum();
        let ln_x_factorial_sum = x.iter().map(|&v| ln_factorial(v)).sum();
        SelectionModel {
            z,
            x,
            sum_x,
            ln_x_factorial_sum,
            prior: options.latent_prior,
            dispersion_shape: options.dispersion_prior_shape,
            dispersion_rate: options.dispersion_prior_rate,
            proposal: Normal::new(0.0, PROPOSAL_STEP).expect("proposal step is a fixed constant"),
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Prior mean of the dispersion, used as the starting value.
    pub(crate) fn dispersion_prior_mean(&self) -> f64 {
        self.dispersion_shape / self.dispersion_rate
    }

    /// Conjugate conditional for the overdispersion multiplier `u_i`:
    /// `Gamma(phi + x_i, rate = phi + beta * z_i * w_i)`.
    pub(crate) fn draw_multiplier<R: Rng + ?Sized>(
        &self,
        i: usize,
        w_i: f64,
        beta: f64,
        phi: f64,
        floor: f64,
        rng: &mut R,
    ) -> Result<f64, ConditionalError> {
        let shape = phi + self.x[i] as f64;
        let rate = phi + beta * self.z[i] * w_i;
        gamma_draw(shape, rate, floor, rng).map_err(|_| ConditionalError("multiplier"))
    }

    /// Conjugate conditional for the depth rate:
    /// `Gamma(1 + Σ x_i, rate = 1 + Σ z_i w_i u_i)`.
    pub(crate) fn draw_depth<R: Rng + ?Sized>(
        &self,
        w: &[f64],
        u: &[f64],
        floor: f64,
        rng: &mut R,
    ) -> Result<f64, ConditionalError> {
        let weighted: f64 = izip!(&self.z, w, u).map(|(&z, &w, &u)| z * w * u).sum();
        let shape = DEPTH_PRIOR_SHAPE + self.sum_x;
        let rate = DEPTH_PRIOR_RATE + weighted;
        gamma_draw(shape, rate, floor, rng).map_err(|_| ConditionalError("depth"))
    }

    /// Metropolis-within-Gibbs step for one selection value. Proposes
    /// `w* = w e^r` with `r ~ Normal(0, 0.1)`; the `+ r` term in the
    /// acceptance ratio is the Jacobian of the multiplicative proposal.
    /// Returns the (possibly unchanged) value and whether the move was
    /// accepted.
    pub(crate) fn step_selection<R: Rng + ?Sized>(
        &self,
        i: usize,
        w_i: f64,
        u_i: f64,
        beta: f64,
        rng: &mut R,
    ) -> (f64, bool) {
        let r = self.proposal.sample(rng);
        let w_star = w_i * r.exp();
        let scale = beta * self.z[i] * u_i;
        let x_i = self.x[i] as f64;

        let ln_target = |w: f64| self.prior.ln_density(w) + x_i * w.ln() - scale * w;
        let log_ratio = ln_target(w_star) - ln_target(w_i) + r;

        if rng.random::<f64>().ln() < log_ratio {
            (w_star, true)
        } else {
            (w_i, false)
        }
    }

    /// Metropolis-within-Gibbs step for the dispersion `phi`, against the
    /// Gamma hyperprior and the product of `Gamma(u_i; phi, phi)` densities.
    pub(crate) fn step_dispersion<R: Rng + ?Sized>(
        &self,
        u: &[f64],
        phi: f64,
        rng: &mut R,
    ) -> (f64, bool) {
        let r = self.proposal.sample(rng);
        let phi_star = phi * r.exp();

        let sum_ln_u: f64 = u.iter().map(|&v| v.ln()).sum();
        let sum_u: f64 = u.iter().sum();
        let n = u.len() as f64;

        let ln_target = |p: f64| {
            (self.dispersion_shape - 1.0) * p.ln() - self.dispersion_rate * p
                + n * (p * p.ln() - statrs::function::gamma::ln_gamma(p))
                + (p - 1.0) * sum_ln_u
                - p * sum_u
        };
        let log_ratio = ln_target(phi_star) - ln_target(phi) + r;

        if rng.random::<f64>().ln() < log_ratio {
            (phi_star, true)
        } else {
            (phi, false)
        }
    }

    /// Joint log-likelihood of the current chain state, recorded into the
    /// trace for every retained sample.
    pub(crate) fn loglikelihood(&self, w: &[f64], u: &[f64], beta: f64, phi: f64) -> f64 {
        let ln_gamma = statrs::function::gamma::ln_gamma;
        let mut ll = 0.0;
        for (&z, &x, &w_i, &u_i) in izip!(&self.z, &self.x, w, u) {
            let lambda = beta * z * w_i * u_i;
            ll += x as f64 * lambda.ln() - lambda;
            ll += self.prior.ln_density(w_i);
            ll += phi * phi.ln() - ln_gamma(phi) + (phi - 1.0) * u_i.ln() - phi * u_i;
        }
        ll -= self.ln_x_factorial_sum;
        ll += (DEPTH_PRIOR_SHAPE - 1.0) * beta.ln() - DEPTH_PRIOR_RATE * beta;
        ll += (self.dispersion_shape - 1.0) * phi.ln() - self.dispersion_rate * phi;
        ll
    }

    /// Data-derived starting values: depth-normalized empirical count
    /// ratios, smoothed so all-zero entities start near no effect.
    pub(crate) fn initial_selection(&self) -> Vec<f64> {
        let n = self.len() as f64;
        let sum_z: f64 = self.z.iter().sum();
        let depth = (self.sum_x + 0.5 * n) / sum_z;
        self.z
            .iter()
            .zip(&self.x)
            .map(|(&z, &x)| (x as f64 + 0.5) / (z * depth))
            .collect()
    }

    pub(crate) fn initial_depth(&self) -> f64 {
        let n = self.len() as f64;
        let sum_z: f64 = self.z.iter().sum();
        (self.sum_x + 0.5 * n) / sum_z
    }
}

/// Draw from `Gamma(shape, rate)` with both parameters floored. Fails only
/// on non-finite parameterizations, which the floor cannot repair.
fn gamma_draw<R: Rng + ?Sized>(
    shape: f64,
    rate: f64,
    floor: f64,
    rng: &mut R,
) -> Result<f64, ()> {
    let shape = shape.max(floor);
    let rate = rate.max(floor);
    if !shape.is_finite() || !rate.is_finite() {
        return Err(());
    }
    let dist = Gamma::new(shape, 1.0 / rate).map_err(|_| ())?;
    let value = dist.sample(rng);
    if value.is_finite() {
        Ok(value)
    } else {
        Err(())
    }
}
