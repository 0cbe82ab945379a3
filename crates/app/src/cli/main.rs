//! Triode CLI Application

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use triode_core::domain::coefficients::{BiquadCoefficients, CoefficientStore, TubeCoefficients};
use triode_core::domain::config::{CoefficientWatcher, ConfigManager, TriodeConfig};
use triode_core::domain::dsp::SignalChain;
use triode_infra::audio::{AudioEngine, CpalBackend};

/// How often levels and stream counters are logged while running
const REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// Quiet period after a coefficient file event before reloading
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "triode")]
#[command(about = "Real-time tube amplifier coloration", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream the default input through the tube chain to the default output
    Run {
        /// Configuration file (defaults to the user config directory)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Raw f64 coefficient file; enables the pre/post filter banks
        #[arg(long)]
        coefficients: Option<PathBuf>,

        /// Start bypassed
        #[arg(long)]
        bypass: bool,
    },

    /// Print the coefficient sets used at a sample rate
    Inspect {
        /// Sample rate in Hz
        #[arg(short, long, default_value_t = 48000)]
        rate: u32,

        /// Raw f64 coefficient file to load first
        #[arg(long)]
        coefficients: Option<PathBuf>,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Command::Run {
            config,
            coefficients,
            bypass,
        } => run(config, coefficients, bypass).await,
        Command::Inspect {
            rate,
            coefficients,
            json,
        } => inspect(rate, coefficients, json).await,
    }
}

// ============================================================================
// run
// ============================================================================

async fn run(config_path: Option<PathBuf>, coefficients: Option<PathBuf>, bypass: bool) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => TriodeConfig::load_from_file(&path)
            .await
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ConfigManager::new(ConfigManager::default_config_dir()?).load().await,
    };

    if let Some(path) = coefficients {
        config.dsp.coefficient_file = Some(path);
        config.dsp.filter_banks = true;
    }
    if bypass {
        config.dsp.bypass = true;
    }

    info!("Triode starting");

    let store = match &config.dsp.coefficient_file {
        Some(path) => load_store(path).await.unwrap_or_default(),
        None => CoefficientStore::new(),
    };

    let mut engine = AudioEngine::new(Arc::new(CpalBackend::new()), &config, store);
    engine.start().context("Failed to start audio stream")?;

    let watcher = match &config.dsp.coefficient_file {
        Some(path) => match CoefficientWatcher::new(path.clone()).await {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(error = %e, "Coefficient hot reload disabled");
                None
            }
        },
        None => None,
    };
    let mut changes = watcher.as_ref().map(CoefficientWatcher::subscribe);

    let observer = engine.observer();
    let mut report = tokio::time::interval(REPORT_INTERVAL);
    report.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Interrupt received");
                break;
            }
            _ = report.tick() => {
                if let Some((left, right)) = observer.latest_levels() {
                    info!(
                        left_rms = %format!("{:.4}", left.rms),
                        left_peak = %format!("{:.4}", left.peak),
                        right_rms = %format!("{:.4}", right.rms),
                        right_peak = %format!("{:.4}", right.peak),
                        "Output level"
                    );
                }
                if let Some(stats) = engine.stats() {
                    debug!(
                        callbacks = stats.callbacks,
                        overruns = stats.overruns,
                        underruns = stats.underruns,
                        busy = stats.busy,
                        dropped_snapshots = observer.dropped(),
                        "Stream counters"
                    );
                }
            }
            change = next_change(&mut changes) => {
                match change {
                    Some(path) => reload(&mut engine, &path, &mut changes).await?,
                    None => changes = None,
                }
            }
        }
    }

    engine.stop()?;
    info!("Triode stopped");
    Ok(())
}

/// Next change notification; pends forever without a watcher
async fn next_change(changes: &mut Option<broadcast::Receiver<PathBuf>>) -> Option<PathBuf> {
    let Some(rx) = changes.as_mut() else {
        return std::future::pending().await;
    };

    loop {
        match rx.recv().await {
            Ok(path) => return Some(path),
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "Coalesced coefficient events"),
            Err(RecvError::Closed) => return None,
        }
    }
}

/// Stop, swap coefficients, restart
async fn reload(
    engine: &mut AudioEngine,
    path: &Path,
    changes: &mut Option<broadcast::Receiver<PathBuf>>,
) -> anyhow::Result<()> {
    tokio::time::sleep(RELOAD_DEBOUNCE).await;
    if let Some(rx) = changes.as_mut() {
        while rx.try_recv().is_ok() {}
    }

    let Some(store) = load_store(path).await else {
        return Ok(());
    };

    engine.stop()?;
    engine.apply_coefficients(store)?;
    engine.start().context("Failed to restart audio stream")?;
    info!(path = %path.display(), "Coefficients reloaded");
    Ok(())
}

/// Defaults overlaid with the file's stages, or `None` if the file was refused
async fn load_store(path: &Path) -> Option<CoefficientStore> {
    let mut store = CoefficientStore::new();
    match store.load_from_file(path).await {
        Ok(report) => {
            info!(
                path = %path.display(),
                pre = report.pre_stages,
                post = report.post_stages,
                rejected = report.rejected_stages,
                "Coefficient file loaded"
            );
            Some(store)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Coefficient file refused, keeping current tables");
            None
        }
    }
}

// ============================================================================
// inspect
// ============================================================================

#[derive(Serialize)]
struct Inspection {
    sample_rate: u32,
    tube_table_rate: u32,
    external_coefficients: bool,
    stages: [String; 3],
    pre_filter: Vec<[f64; 5]>,
    post_filter: Vec<[f64; 5]>,
    tube_b: [f64; 7],
    tube_a: [f64; 6],
}

fn section(coeffs: &BiquadCoefficients) -> [f64; 5] {
    [coeffs.b0(), coeffs.b1(), coeffs.b2(), coeffs.a1(), coeffs.a2()]
}

async fn inspect(rate: u32, coefficients: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let store = match coefficients {
        Some(path) => {
            let mut store = CoefficientStore::new();
            store
                .load_from_file(&path)
                .await
                .with_context(|| format!("Failed to load coefficients {}", path.display()))?;
            store
        }
        None => CoefficientStore::new(),
    };

    let chain = SignalChain::with_filter_banks(rate, &store);
    let tube = TubeCoefficients::for_rate(rate);
    let inspection = Inspection {
        sample_rate: rate,
        tube_table_rate: TubeCoefficients::resolved_rate(rate),
        external_coefficients: store.is_loaded(),
        stages: chain.stage_names().map(str::to_string),
        pre_filter: store.pre_filter(rate).iter().map(section).collect(),
        post_filter: store.post_filter(rate).iter().map(section).collect(),
        tube_b: tube.b,
        tube_a: tube.a,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&inspection)?);
        return Ok(());
    }

    println!("Sample rate: {} Hz (tube table {} Hz)", inspection.sample_rate, inspection.tube_table_rate);
    println!(
        "Source: {}",
        if inspection.external_coefficients { "external file" } else { "built-in defaults" }
    );
    println!("Chain: {}", inspection.stages.join(" -> "));
    print_bank("Pre-filter", &inspection.pre_filter);
    print_bank("Post-filter", &inspection.post_filter);
    println!("Tube b: {:?}", inspection.tube_b);
    println!("Tube a: {:?}", inspection.tube_a);
    Ok(())
}

fn print_bank(label: &str, stages: &[[f64; 5]]) {
    println!("{} ({} stages)", label, stages.len());
    for (i, [b0, b1, b2, a1, a2]) in stages.iter().enumerate() {
        println!("  [{}] b = ({:.9}, {:.9}, {:.9})  a = (1, {:.9}, {:.9})", i, b0, b1, b2, a1, a2);
    }
}
