/// Command-line front end: synthesize matchup data, run the full training
/// pipeline, and predict with stored artefacts.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use secchi_core::synthetic::{generate, SyntheticSpec};
use secchi_core::{predict_new, HarmonizationModel, Observation, Pipeline, PipelineConfig, TrainedModel};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "secchi", about = "Secchi depth from harmonized Landsat reflectance")]
struct Args {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a synthetic observation array as JSON
    Synth {
        #[arg(short, long, default_value = "1000")]
        n: usize,

        #[arg(long, default_value = "5")]
        lakes: usize,

        #[arg(long, default_value = "42")]
        seed: u64,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Harmonize, train, select and evaluate; writes all artefacts to --out-dir
    Run {
        /// JSON array of observations
        #[arg(short, long)]
        input: PathBuf,

        /// Pipeline configuration JSON (defaults when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long, default_value = "out")]
        out_dir: PathBuf,

        /// Overrides the configured seed
        #[arg(long)]
        seed: Option<u64>,

        /// Overrides the configured worker count (0 = all cores)
        #[arg(long)]
        threads: Option<usize>,
    },

    /// Predict Secchi depth for new observations with stored artefacts
    Predict {
        #[arg(long)]
        harmonization: PathBuf,

        #[arg(long)]
        model: PathBuf,

        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        out: PathBuf,
    },
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

// ── Commands ─────────────────────────────────────────────────────────────────

fn synth(n: usize, lakes: usize, seed: u64, out: &Path) -> Result<()> {
    let spec = SyntheticSpec { n_observations: n, n_lakes: lakes, ..Default::default() };
    let observations = generate(&spec, seed)?;
    write_json(out, &observations)?;
    eprintln!("Wrote {} synthetic observations to {}", observations.len(), out.display());
    Ok(())
}

fn run(input: &Path, config: Option<&Path>, out_dir: &Path, seed: Option<u64>, threads: Option<usize>) -> Result<()> {
    let mut cfg = match config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(seed) = seed {
        cfg.seed = seed;
    }
    if let Some(threads) = threads {
        cfg.threads = threads;
    }

    let observations: Vec<Observation> = read_json(input)?;
    let output = Pipeline::new(cfg)?.run(&observations)?;

    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    write_json(&out_dir.join("harmonization.json"), &output.harmonization)?;
    write_json(&out_dir.join("model.json"), &output.model)?;
    write_json(&out_dir.join("metrics.json"), &output.metrics_summary())?;
    write_json(&out_dir.join("report.json"), &output.report)?;

    let m = &output.evaluation.metrics;
    eprintln!(
        "Hold-out n={} RMSE={:.3} MAE={:.3} bias={:+.3} sMAPE={:.1}%  best: {}  ({} ms)",
        m.n, m.rmse, m.mae, m.bias, m.smape, output.search.best, output.elapsed_ms
    );
    if !output.report.is_clean() {
        eprintln!("Excluded {} items: {:?}", output.report.total(), output.report.exclusions);
    }
    eprintln!("Artefacts written to {}", out_dir.display());
    Ok(())
}

fn predict(harmonization: &Path, model: &Path, input: &Path, out: &Path) -> Result<()> {
    let harmonization: HarmonizationModel = read_json(harmonization)?;
    let model: TrainedModel = read_json(model)?;
    let observations: Vec<Observation> = read_json(input)?;

    let (predictions, report) = predict_new(&harmonization, &model, &observations)?;
    write_json(out, &predictions)?;
    eprintln!(
        "Predicted {} of {} observations ({} skipped) -> {}",
        predictions.len(),
        observations.len(),
        report.total(),
        out.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::Synth { n, lakes, seed, out } => synth(n, lakes, seed, &out),
        Command::Run { input, config, out_dir, seed, threads } => {
            run(&input, config.as_deref(), &out_dir, seed, threads)
        }
        Command::Predict { harmonization, model, input, out } => predict(&harmonization, &model, &input, &out),
    }
}
