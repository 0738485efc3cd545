//! Loss Models CLI
//!
//! Loads fully developed company-year losses, runs the comparative study
//! and prints a console summary. The full report is written as JSON with
//! `--output`.

use anyhow::{Context, Result};
use clap::Parser;
use loss_models::data::{load_observations, LoadOptions};
use loss_models::study::{LossStudy, ModelOutcome, StudyReport};
use loss_models::StudyConfig;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "loss_models")]
#[command(about = "Synthetic frequency/severity vs Tweedie GLM, with EVT tail fits")]
#[command(version)]
struct Args {
    /// Schedule P style CSV (GRCODE, AccidentYear, DevelopmentLag, IncurLoss_B, EarnedPremNet_B)
    #[arg(short, long)]
    data: PathBuf,

    /// JSON study configuration; omitted sections use defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the full report as pretty JSON
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Premium per synthetic exposure unit
    #[arg(long)]
    premium_per_unit: Option<f64>,

    /// Assumed average cost of one synthetic claim
    #[arg(long)]
    severity_per_claim: Option<f64>,

    /// GPD threshold percentile in (0, 1]
    #[arg(long)]
    threshold_percentile: Option<f64>,

    /// Run k-fold cross-validation of the Tweedie model with this many folds
    #[arg(long)]
    cv_folds: Option<usize>,

    /// Seed for fold assignment
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn study_config(&self) -> Result<StudyConfig> {
        let mut config = match &self.config {
            Some(path) => StudyConfig::from_json_path(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => StudyConfig::default(),
        };
        if let Some(v) = self.premium_per_unit {
            config.synthetic.premium_per_unit = v;
        }
        if let Some(v) = self.severity_per_claim {
            config.synthetic.severity_per_claim = v;
        }
        if let Some(v) = self.threshold_percentile {
            config.gpd.threshold_percentile = v;
        }
        if let Some(folds) = self.cv_folds {
            config.cross_validation.enabled = true;
            config.cross_validation.folds = folds;
        }
        if let Some(seed) = self.seed {
            config.cross_validation.seed = seed;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let start = Instant::now();

    println!("Loss Models v{}", env!("CARGO_PKG_VERSION"));
    println!("=================\n");

    let config = args.study_config()?;
    let study = LossStudy::new(config).context("invalid study configuration")?;

    let options = LoadOptions {
        fully_developed_lag: study.config().fully_developed_lag,
    };
    let (dataset, summary) = load_observations(&args.data, &options)
        .with_context(|| format!("loading {}", args.data.display()))?;
    println!(
        "Loaded {} company-years from {} rows ({} at other lags, {} dropped as non-positive)",
        summary.kept, summary.rows_read, summary.rows_other_lag, summary.dropped_non_positive
    );

    let mut report = study.run(&dataset).context("study failed")?;
    report.load_summary = Some(summary);

    print_report(&report);

    if let Some(path) = &args.output {
        let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer_pretty(file, &report).context("writing report")?;
        println!("\nFull report written to: {}", path.display());
    }

    println!("\nCompleted in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn print_report(report: &StudyReport) {
    println!("\nSynthetic frequency/severity model:");
    match &report.synthetic {
        ModelOutcome::Fitted(model) => {
            for fit in [&model.frequency, &model.severity] {
                println!("  {} ({} rows, deviance {:.4})", fit.family.name(), fit.n_obs, fit.deviance);
                for c in &fit.coefficients {
                    println!(
                        "    {:<14} {:>14.6} (p = {})",
                        c.name,
                        c.estimate,
                        c.p_value.map_or("n/a".to_string(), |p| format!("{:.4}", p))
                    );
                }
            }
        }
        ModelOutcome::Failed { error } => println!("  FAILED: {}", error),
    }

    let profile = &report.power_profile;
    println!("\nTweedie power profile ({}):", profile.shape);
    println!(
        "  p* = {:.3}, {:.0}% interval [{:.3}, {:.3}]{}",
        profile.best_power,
        profile.ci_level * 100.0,
        profile.ci_lower,
        profile.ci_upper,
        if profile.lower_truncated || profile.upper_truncated { " (truncated)" } else { "" }
    );

    let tweedie = &report.tweedie;
    println!("\nTweedie GLM (p = {:.3}, dispersion {:.4e}):", tweedie.power, tweedie.dispersion);
    for c in &tweedie.fit.coefficients {
        println!(
            "  {:<14} {:>14.6} ± {}",
            c.name,
            c.estimate,
            c.std_error.map_or("n/a".to_string(), |se| format!("{:.6}", se))
        );
    }
    if let Some(r2) = tweedie.pseudo_r2() {
        println!("  pseudo-R² {:.4}", r2);
    }

    for comparison in &report.comparisons {
        println!("\nAnnual comparison: {}", comparison.model);
        println!("{:>6} {:>5} {:>16} {:>16} {:>9}", "Year", "N", "Actual", "Fitted", "Error%");
        println!("{}", "-".repeat(56));
        for row in &comparison.annual {
            println!(
                "{:>6} {:>5} {:>16.0} {:>16.0} {:>+9.2}",
                row.accident_year, row.n_companies, row.actual_total, row.fitted_total, row.pct_error
            );
        }
        let m = &comparison.metrics;
        println!(
            "  total bias {:+.2}%, annual MAPE {:.2}%, annual RMSE {:.0}",
            m.total_bias_pct, m.annual_mape, m.annual_rmse
        );
    }

    println!("\nGEV on annual maxima:");
    match &report.gev {
        ModelOutcome::Fitted(gev) => {
            let fit = &gev.fit;
            println!(
                "  location {:.4e}, scale {:.4e}, shape {:.4} ({:?}){}",
                fit.location,
                fit.scale,
                fit.shape,
                fit.regime,
                if fit.converged { "" } else { " NOT CONVERGED" }
            );
            for rl in &gev.return_levels {
                println!("    {:>5.0}-year {:>16.0}", rl.period, rl.level);
            }
        }
        ModelOutcome::Failed { error } => println!("  FAILED: {}", error),
    }

    println!("\nGPD over threshold:");
    match &report.gpd {
        ModelOutcome::Fitted(gpd) => {
            let fit = &gpd.fit;
            println!(
                "  u = {:.4e} ({} of {} exceed), scale {:.4e}, shape {:.4} ({:?}, {:?})",
                fit.threshold, fit.n_exceedances, fit.n_total, fit.scale, fit.shape, fit.regime, fit.status
            );
            for rl in &gpd.return_levels {
                println!("    {:>5.0}-obs  {:>16.0}", rl.period, rl.level);
            }
        }
        ModelOutcome::Failed { error } => println!("  FAILED: {}", error),
    }

    if let Some(cv) = &report.cross_validation {
        println!("\nCross-validation:");
        match cv {
            ModelOutcome::Fitted(cv) => {
                println!("{:>5} {:>6} {:>6} {:>14} {:>14} {:>9}", "Fold", "Train", "Test", "RMSE", "MAE", "Bias%");
                for f in &cv.folds {
                    println!(
                        "{:>5} {:>6} {:>6} {:>14.0} {:>14.0} {:>+9.2}",
                        f.fold, f.n_train, f.n_test, f.rmse, f.mae, f.bias_pct
                    );
                }
                println!("  mean RMSE {:.0}, mean |bias| {:.2}%", cv.mean_rmse, cv.mean_abs_bias_pct);
            }
            ModelOutcome::Failed { error } => println!("  FAILED: {}", error),
        }
    }

    if !report.warnings.is_empty() {
        println!("\nWarnings:");
        for w in &report.warnings {
            println!("  - {}", w);
        }
    }
}
