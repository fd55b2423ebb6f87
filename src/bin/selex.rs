//! Command-line entry point: count table in, posterior estimates out.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use selex_rs::{
    report, summarize, CountTable, DiagnosticsOptions, GibbsSampler, GibbsSettings, LatentPrior,
    ModelOptions, PointEstimate, SummaryOptions,
};

#[derive(Parser)]
#[command(name = "selex")]
#[command(about = "Estimate per-entity selection values from paired counts", long_about = None)]
struct Cli {
    /// Count table: entity identifier, input count, output count.
    #[arg(long)]
    input: PathBuf,

    /// Posterior estimate table to write.
    #[arg(long, default_value = "output.csv")]
    output: PathBuf,

    /// Prior family over the latent selection values.
    #[arg(long, value_enum, default_value = "lognormal")]
    prior: PriorArg,

    /// Prior mean (log-normal) or shape (gamma).
    #[arg(long, default_value_t = 0.0)]
    prior_mean: f64,

    /// Prior variance (log-normal) or rate (gamma).
    #[arg(long, default_value_t = 1.0)]
    prior_variance: f64,

    /// Shape of the Gamma hyperprior on the dispersion.
    #[arg(long, default_value_t = 2.0)]
    dispersion_shape: f64,

    /// Rate of the Gamma hyperprior on the dispersion.
    #[arg(long, default_value_t = 2.0)]
    dispersion_rate: f64,

    /// Burn-in sweeps, discarded.
    #[arg(long, default_value_t = 500)]
    n_burnin: u64,

    /// Retained posterior samples.
    #[arg(long, default_value_t = 1000)]
    n_samples: u64,

    /// Keep every k-th post-burn-in sweep.
    #[arg(long, default_value_t = 1)]
    thinning: u64,

    /// Random seed; identical seeds reproduce runs exactly.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Central credible-interval coverage in (0, 1).
    #[arg(long, default_value_t = 0.95)]
    coverage: f64,

    /// Floor substituted for degenerate conditional parameters.
    #[arg(long, default_value_t = 1e-12)]
    floor: f64,

    /// Point estimate to report.
    #[arg(long, value_enum, default_value = "median")]
    point: PointArg,

    /// Analyze a random subset of this many rows.
    #[arg(long)]
    subsample: Option<usize>,

    /// Write convergence diagnostics and trace figures.
    #[arg(long)]
    diagnostics: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum PriorArg {
    Lognormal,
    Gamma,
}

#[derive(Clone, Copy, ValueEnum)]
enum PointArg {
    Mean,
    Median,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = GibbsSettings {
        n_burnin: cli.n_burnin,
        n_samples: cli.n_samples,
        thinning_interval: cli.thinning,
        random_seed: cli.seed,
        interval_coverage: cli.coverage,
        numerical_floor: cli.floor,
        diagnostics_enabled: cli.diagnostics,
    };
    // Fail on configuration errors before reading a single input row.
    settings.validate()?;

    let options = ModelOptions {
        latent_prior: match cli.prior {
            PriorArg::Lognormal => LatentPrior::LogNormal {
                mean: cli.prior_mean,
                variance: cli.prior_variance,
            },
            PriorArg::Gamma => LatentPrior::Gamma {
                shape: cli.prior_mean,
                rate: cli.prior_variance,
            },
        },
        dispersion_prior_shape: cli.dispersion_shape,
        dispersion_prior_rate: cli.dispersion_rate,
    };

    eprintln!("Loading {}...", cli.input.display());
    let mut table = CountTable::from_path(&cli.input)
        .with_context(|| format!("failed to load {}", cli.input.display()))?;
    if let Some(k) = cli.subsample {
        table = table.subsample(k, cli.seed);
    }
    eprintln!("{} entities", table.len());

    let sampler = GibbsSampler::new(&table, options, settings)?;
    let total = settings.n_burnin + settings.n_samples * settings.thinning_interval;
    eprintln!("Running {total} sweeps...");
    let trace = sampler.sample_with(|progress| {
        if progress.sweep % 500 == 0 {
            eprintln!(
                "  sweep {}/{} ({}; accept {:.2})",
                progress.sweep,
                progress.total_sweeps,
                if progress.burnin { "burn-in" } else { "sampling" },
                progress.accept_selection,
            );
        }
        true
    })?;

    let summary = summarize(
        &trace,
        &SummaryOptions {
            point_estimate: match cli.point {
                PointArg::Mean => PointEstimate::Mean,
                PointArg::Median => PointEstimate::Median,
            },
            interval_coverage: cli.coverage,
        },
    );
    // The estimate table only exists once the sampler has finished: an
    // aborted run leaves no partial output behind.
    summary
        .to_path(&cli.output)
        .with_context(|| format!("failed to write {}", cli.output.display()))?;
    eprintln!("Wrote {}", cli.output.display());

    if cli.diagnostics {
        let dir = cli.output.with_extension("");
        let rep = report(&trace, &DiagnosticsOptions::new(&dir));
        let flagged = rep.flagged().count();
        eprintln!(
            "Diagnostics in {}: {} variables, {flagged} flagged, {} write failures",
            dir.display(),
            rep.variables.len(),
            rep.write_failures
        );
    }

    Ok(())
}
