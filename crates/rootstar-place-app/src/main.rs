//! Rootstar Place Application
//!
//! Command line front end for place-field decoding.
//!
//! # Usage
//!
//! ```bash
//! # Simulate a session, fit, score and save the model
//! rootstar-place simulate --out decoder.json
//!
//! # Use a pipeline configuration file
//! rootstar-place simulate --config pipeline.json
//!
//! # Summarize a saved model
//! rootstar-place inspect decoder.json
//!
//! # Stream a fresh session through the real-time decoder
//! rootstar-place replay decoder.json --seed 21
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rootstar_place_native::{
    rank, simulate_session, spike_count_matrix, DecodeError, DecoderModel, DecodingSession, PipelineConfig,
    RankMetric, RealtimeDecoder, SimulationConfig,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Rootstar Place Application
#[derive(Parser, Debug)]
#[command(name = "rootstar-place")]
#[command(author, version, about = "Place-field encoding and Bayesian position decoding", long_about = None)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Simulate a session, fit a decoder and score it
    Simulate {
        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Save the fitted model here
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Behavior and spike seed
        #[arg(long, default_value = "7")]
        seed: u64,

        /// Place-cell layout seed
        #[arg(long, default_value = "1")]
        layout_seed: u64,

        /// Number of place cells
        #[arg(short, long, default_value = "40")]
        neurons: usize,

        /// Session length (s)
        #[arg(short, long, default_value = "600")]
        duration: f64,
    },

    /// Print a summary of a saved model
    Inspect {
        /// Model file
        model: PathBuf,
    },

    /// Stream a fresh synthetic session through the real-time decoder
    Replay {
        /// Model file
        model: PathBuf,

        /// Behavior and spike seed of the fresh session
        #[arg(long, default_value = "21")]
        seed: u64,

        /// Place-cell layout seed (must match the fitted session)
        #[arg(long, default_value = "1")]
        layout_seed: u64,

        /// Number of place cells (must match the fitted session)
        #[arg(short, long, default_value = "40")]
        neurons: usize,

        /// Incoming bin length (s)
        #[arg(short, long, default_value = "0.1")]
        bin_size: f64,

        /// Session length (s)
        #[arg(short, long, default_value = "120")]
        duration: f64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Rootstar Place v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Simulate {
            config,
            out,
            seed,
            layout_seed,
            neurons,
            duration,
        } => {
            let sim = SimulationConfig {
                seed,
                layout_seed,
                n_place_cells: neurons,
                duration_s: duration,
                ..SimulationConfig::default()
            };
            run_simulate(config, out, &sim)?;
        }
        Commands::Inspect { model } => {
            run_inspect(&model)?;
        }
        Commands::Replay {
            model,
            seed,
            layout_seed,
            neurons,
            bin_size,
            duration,
        } => {
            let sim = SimulationConfig {
                seed,
                layout_seed,
                n_place_cells: neurons,
                duration_s: duration,
                ..SimulationConfig::default()
            };
            run_replay(&model, &sim, bin_size)?;
        }
    }

    Ok(())
}

/// Simulate, fit with unit selection, score and optionally save
fn run_simulate(config: Option<PathBuf>, out: Option<PathBuf>, sim: &SimulationConfig) -> anyhow::Result<()> {
    let pipeline = match config {
        Some(path) => PipelineConfig::load(&path).with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let session = simulate_session(sim)?;
    let decoding =
        DecodingSession::new(session.trajectory, session.spikes, pipeline.clone()).map_err(pipeline_error)?;
    let metrics = decoding.unit_metrics(None)?;
    let run = decoding
        .score_selected(pipeline.evaluation.smooth_sec, &pipeline.units)
        .map_err(pipeline_error)?;

    println!("R²  x = {:.3}  y = {:.3}  mean = {:.3}", run.r2.x, run.r2.y, run.r2.combined);
    println!(
        "decoder uses {} of {} units",
        run.decoder.active_model()?.n_neurons(),
        metrics.len()
    );
    println!();
    println!("{:>6} {:>10} {:>10} {:>10} {:>10}", "unit", "peak Hz", "mean Hz", "bits/spk", "sparsity");
    for i in rank(&metrics, RankMetric::SpatialBits).into_iter().take(10) {
        let m = &metrics[i];
        println!(
            "{:>6} {:>10.2} {:>10.2} {:>10.3} {:>10.3}",
            m.neuron_id, m.peak_rate, m.mean_rate, m.spatial_bits_per_spike, m.sparsity
        );
    }

    if let Some(path) = out {
        // the saved model keeps only the units the decoder actually used
        run.decoder.active_model()?.save(&path)?;
        println!("\nmodel saved to {}", path.display());
    }
    Ok(())
}

/// Flag errors a change to the pipeline configuration can fix
fn pipeline_error(err: DecodeError) -> anyhow::Error {
    if err.is_configuration() {
        anyhow::Error::new(err).context("invalid pipeline configuration")
    } else {
        err.into()
    }
}

fn run_inspect(path: &Path) -> anyhow::Result<()> {
    let model = DecoderModel::load(path).with_context(|| format!("loading {}", path.display()))?;
    let grid = model.grid();
    let ctx = model.context();
    println!("neurons      {}", model.n_neurons());
    println!("neuron ids   {:?}", model.neuron_ids());
    println!("grid         {} x {} bins of {}", grid.xbins(), grid.ybins(), grid.bin_size());
    println!("origin       {:?}", model.spatial_origin());
    println!("t_window     {} s", model.t_window());
    println!("kernel       len {} std {}", ctx.kernel_len, ctx.kernel_std);
    println!("v_cutoff     {}", ctx.v_cutoff);
    println!("train window [{}, {}] s", ctx.train_window.0, ctx.train_window.1);
    Ok(())
}

fn run_replay(path: &Path, sim: &SimulationConfig, bin_size: f64) -> anyhow::Result<()> {
    let model = Arc::new(DecoderModel::load(path).with_context(|| format!("loading {}", path.display()))?);
    let session = simulate_session(sim)?;
    let spikes = session.spikes.select(model.neuron_ids());
    anyhow::ensure!(
        spikes.len() == model.n_neurons(),
        "session lacks some of the model's units"
    );

    let trajectory = session.trajectory.resample(bin_size)?;
    let counts = spike_count_matrix(&spikes, bin_size, trajectory.ts())?;
    let mut decoder = RealtimeDecoder::new(Arc::clone(&model), bin_size)?;
    info!(window_bins = decoder.window_bins(), bins = counts.rows(), "replaying session");

    let mut errors = Vec::with_capacity(counts.rows());
    for (row, truth) in counts.counts.outer_iter().zip(trajectory.positions()) {
        let bin = row.to_vec();
        if let Some(estimate) = decoder.push_bin(&bin)? {
            // estimates are bin corners; compare against the bin center
            let half = model.spatial_bin_size() / 2.0;
            let dx = estimate.position[0] + half - truth[0];
            let dy = estimate.position[1] + half - truth[1];
            errors.push(dx.hypot(dy));
        }
    }
    anyhow::ensure!(!errors.is_empty(), "session too short for one decoding window");

    errors.sort_by(f64::total_cmp);
    let mean = errors.iter().sum::<f64>() / errors.len() as f64;
    let median = errors[errors.len() / 2];
    let within = errors.iter().filter(|&&e| e <= 10.0).count() as f64 / errors.len() as f64;
    println!("estimates        {}", errors.len());
    println!("mean error       {mean:.2}");
    println!("median error     {median:.2}");
    println!("within 10 units  {:.1}%", within * 100.0);
    Ok(())
}
