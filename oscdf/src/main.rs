use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use osccore::{extract_peaks, PeakExtraction, PipelineConfig};
use serde::Serialize;

use oscdf::data::loader::{load_config, load_trials, save_trials, write_json};
use oscdf::data::profiler::WelchProfiler;
use oscdf::sim::synthetic::{Oscillation, SyntheticTrials};

#[derive(Parser)]
#[command(name = "oscdf")]
#[command(version, about = "Cross-validated oscillatory peak extraction", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract consensus peaks from a trials x samples file
    Extract {
        /// Trial file (.json, .bin, optionally .zst compressed)
        #[arg(short, long)]
        input: PathBuf,

        /// Sampling rate of the trials in Hz
        #[arg(short, long)]
        sample_rate: f64,

        /// JSON pipeline config; missing fields keep their defaults
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        seed: Option<u64>,

        /// Outer cross-validation repetitions
        #[arg(long)]
        repetitions: Option<usize>,

        /// Inner splits per repetition
        #[arg(long)]
        splits: Option<usize>,

        /// Write the full report as JSON here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write synthetic trials with known oscillations
    Simulate {
        #[arg(short, long, default_value = "trials.bin.zst")]
        output: PathBuf,

        #[arg(short, long, default_value = "500")]
        sample_rate: f64,

        #[arg(long, default_value = "60")]
        trials: usize,

        #[arg(long, default_value = "2000")]
        samples: usize,

        /// Oscillation as FREQ:AMPLITUDE, repeatable
        #[arg(long = "peak", value_parser = parse_peak, default_values = ["10:2.0", "22:1.2"])]
        peaks: Vec<(f64, f64)>,

        /// Per-trial frequency jitter (std, Hz)
        #[arg(long, default_value = "0.3")]
        jitter: f64,

        #[arg(long, default_value = "1.0")]
        noise: f64,

        /// Background noise falls off like 1/f^EXPONENT
        #[arg(long, default_value = "1.0")]
        exponent: f64,

        #[arg(long, default_value = "0")]
        seed: u64,

        /// zstd level for .zst outputs
        #[arg(long, default_value = "3")]
        level: i32,
    },
}

fn parse_peak(s: &str) -> std::result::Result<(f64, f64), String> {
    let (f, a) = s.split_once(':').ok_or_else(|| format!("expected FREQ:AMPLITUDE, got {}", s))?;
    let f: f64 = f.trim().parse().map_err(|e| format!("bad frequency {}: {}", f, e))?;
    let a: f64 = a.trim().parse().map_err(|e| format!("bad amplitude {}: {}", a, e))?;
    Ok((f, a))
}

#[derive(Serialize)]
struct ExtractionReport<'a> {
    center_frequencies: Vec<f64>,
    bandwidths: Vec<f64>,
    config: &'a PipelineConfig,
    extraction: &'a PeakExtraction,
}

#[allow(clippy::too_many_arguments)]
fn run_extract(
    input: PathBuf,
    sample_rate: f64,
    config: Option<PathBuf>,
    seed: Option<u64>,
    repetitions: Option<usize>,
    splits: Option<usize>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut config = match config {
        Some(path) => load_config(&path)?,
        None => PipelineConfig::default(),
    };
    if let Some(seed) = seed {
        config.cross_validation.seed = seed;
    }
    if let Some(r) = repetitions {
        config.cross_validation.outer_repetitions = r;
    }
    if let Some(s) = splits {
        config.cross_validation.inner_splits = s;
    }

    let trials = load_trials(&input)?;
    let profiler = WelchProfiler::new(config.profiler.clone());
    let extraction = extract_peaks(&trials, sample_rate, &profiler, &config)
        .with_context(|| format!("extracting peaks from {}", input.display()))?;

    let report = ExtractionReport {
        center_frequencies: extraction.center_frequencies(),
        bandwidths: extraction.bandwidths(),
        config: &config,
        extraction: &extraction,
    };

    if extraction.peaks.is_empty() {
        println!("no consensus peak");
    }
    for p in &extraction.peaks {
        println!(
            "{:8.3} Hz  [{:.3}, {:.3}]  FWHM {:6.3} Hz  [{:.3}, {:.3}]  n={}",
            p.center.median,
            p.center.ci_low,
            p.center.ci_high,
            p.bandwidth.median,
            p.bandwidth.ci_low,
            p.bandwidth.ci_high,
            p.members.len()
        );
    }

    if let Some(path) = output {
        write_json(&path, &report)?;
        log::info!("report written to {}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Extract { input, sample_rate, config, seed, repetitions, splits, output } => {
            run_extract(input, sample_rate, config, seed, repetitions, splits, output)
        }
        Commands::Simulate { output, sample_rate, trials, samples, peaks, jitter, noise, exponent, seed, level } => {
            if peaks.iter().any(|&(f, _)| !(f > 0.0 && f < sample_rate / 2.0)) {
                bail!("peak frequencies must lie between 0 and {} Hz", sample_rate / 2.0);
            }
            let sim = SyntheticTrials {
                sample_rate,
                n_trials: trials,
                n_samples: samples,
                oscillations: peaks
                    .into_iter()
                    .map(|(frequency, amplitude)| Oscillation { frequency, amplitude, jitter })
                    .collect(),
                noise_std: noise,
                aperiodic_exponent: exponent,
                seed,
            };
            let matrix = sim.generate()?;
            save_trials(&output, &matrix, level)?;
            log::info!("wrote {} trials x {} samples to {}", trials, samples, output.display());
            Ok(())
        }
    }
}
