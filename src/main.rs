//! CLI entry point for volt-runner
//!
//! # Usage
//!
//! Run a 60 s test at 12 V, printing the live feed (Ctrl-C stops it):
//! ```bash
//! volt-runner run --voltage 12 --current-limit 0.5 --duration 60
//! ```
//!
//! From another terminal:
//! ```bash
//! volt-runner watch
//! volt-runner stop
//! ```
//!
//! Summarise a finished artifact:
//! ```bash
//! volt-runner archive csv/PSU_Meter_Test_20240501_093000.csv --battery-capacity-mah 3000
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use volt_core::{
    stop_channel, AcquisitionTiming, InstrumentConnector, StatusText, StopSignal, TestConfiguration,
};
use volt_engine::{force_reset, request_stop_in_store, AcquisitionEngine, RunController};
use volt_hardware::{SerialConnector, SimulatedBench, SimulatedConnector};
use volt_runner::config::VoltConfig;
use volt_runner::logging;
use volt_runner::observer::{format_sample, format_status, Observer, ObserverUpdate};
use volt_storage::archive::list_artifacts;
use volt_storage::{Archive, MinuteWindow, SqliteStatusStore, SqliteStoreConfig, StatusStore, StoreKey};

#[derive(Parser)]
#[command(name = "volt-runner")]
#[command(about = "Timed constant-voltage load tests with energy logging", long_about = None)]
struct Cli {
    /// Configuration file (default: config/volt_runner.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the simulated bench instead of serial instruments
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a run in this process and follow it until it ends
    Run {
        /// Target voltage in volts (0-60)
        #[arg(long)]
        voltage: Option<f64>,

        /// Current limit in amps (0-10)
        #[arg(long)]
        current_limit: Option<f64>,

        /// Test duration in seconds (1-86400)
        #[arg(long)]
        duration: Option<u32>,

        #[arg(long)]
        supply_port: Option<String>,

        #[arg(long)]
        meter_port: Option<String>,
    },

    /// Follow the current run through the status store
    Watch,

    /// Print the published run status
    Status,

    /// Ask the current run to stop
    Stop,

    /// Return the status store to Idle
    Reset {
        /// Clear the run flag even though a run is marked in progress
        #[arg(long)]
        force: bool,
    },

    /// Summarise a run artifact, or list artifacts when no file is given
    Archive {
        file: Option<PathBuf>,

        /// Window start, minutes after the first row
        #[arg(long, requires = "to_minute")]
        from_minute: Option<u32>,

        /// Window end, minutes after the first row
        #[arg(long, requires = "from_minute")]
        to_minute: Option<u32>,

        /// Nominal battery voltage for the Wh figure
        #[arg(long, default_value_t = 3.7)]
        battery_voltage: f64,

        /// Battery capacity in mAh; enables the battery life estimate
        #[arg(long)]
        battery_capacity_mah: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => VoltConfig::load_from(path),
        None => VoltConfig::load(),
    }
    .context("Failed to load configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Run {
            voltage,
            current_limit,
            duration,
            supply_port,
            meter_port,
        } => {
            let mut test = config.test_configuration(voltage, current_limit, duration);
            if let Some(port) = supply_port {
                test.supply_port = port;
            }
            if let Some(port) = meter_port {
                test.meter_port = port;
            }
            run_test(&config, cli.simulate, test).await
        }
        Commands::Watch => watch(&config).await,
        Commands::Status => status(&config),
        Commands::Stop => stop(&config),
        Commands::Reset { force } => reset(&config, force),
        Commands::Archive {
            file,
            from_minute,
            to_minute,
            battery_voltage,
            battery_capacity_mah,
        } => {
            let window = from_minute
                .zip(to_minute)
                .map(|(from_minute, to_minute)| MinuteWindow {
                    from_minute,
                    to_minute,
                });
            archive(
                &config,
                file.as_deref(),
                window,
                battery_voltage,
                battery_capacity_mah,
            )
        }
    }
}

fn open_store(config: &VoltConfig) -> Result<Arc<SqliteStatusStore>> {
    let store = SqliteStatusStore::with_config(SqliteStoreConfig {
        path: config.storage.db_path.clone(),
        busy_timeout_ms: config.storage.busy_timeout_ms,
    })
    .with_context(|| {
        format!(
            "Failed to open status store {}",
            config.storage.db_path.display()
        )
    })?;
    Ok(Arc::new(store))
}

fn print_update(update: &ObserverUpdate) {
    for sample in &update.new_samples {
        println!("  {}", format_sample(sample));
    }
    if update.status_changed {
        println!("{}", format_status(&update.status));
    }
}

async fn run_test(
    config: &VoltConfig,
    simulate: bool,
    test: TestConfiguration,
) -> Result<()> {
    let store = open_store(config)?;
    let mut settings = config.engine_settings();
    let connector: Arc<dyn InstrumentConnector> = if simulate {
        info!(load_ohms = config.simulation.load_ohms, "Using simulated bench");
        settings.timing = AcquisitionTiming {
            observer_refresh: settings.timing.observer_refresh,
            ..AcquisitionTiming::without_settle(settings.timing.record_interval)
        };
        Arc::new(SimulatedConnector::new(SimulatedBench::new(
            config.simulation.load_ohms,
        )))
    } else {
        Arc::new(SerialConnector::new(settings.timing))
    };
    let refresh = settings.timing.observer_refresh;

    let engine = AcquisitionEngine::new(store.clone(), connector, settings);
    let controller = Arc::new(RunController::new(engine));
    controller.start(test.clone()).context("Could not start run")?;
    println!(
        "Running {:.1} V / {:.1} A for {} s (supply {}, meter {})",
        test.target_voltage,
        test.current_limit,
        test.duration_seconds,
        test.supply_port,
        test.meter_port
    );

    let interrupt = {
        let controller = controller.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                match controller.request_stop() {
                    Ok(_) => eprintln!("Stop requested, finishing the current tick"),
                    Err(e) => warn!(error = %e, "Stop request failed"),
                }
            }
        })
    };

    let mut observer = Observer::new(store, refresh);
    observer.watch(StopSignal::never(), print_update).await?;

    let outcome = controller.wait().await?;
    interrupt.abort();

    let Some(outcome) = outcome else {
        bail!("Run task was not found after start");
    };
    if let Some(path) = &outcome.artifact_path {
        println!("Artifact: {} ({} rows)", path.display(), outcome.rows_written);
    }
    match (outcome.status, &outcome.error) {
        (StatusText::Error, Some(message)) => bail!("Run failed: {}", message),
        (StatusText::Error, None) => bail!("Run failed"),
        (status, _) => {
            println!("Run ended: {}", status);
            Ok(())
        }
    }
}

async fn watch(config: &VoltConfig) -> Result<()> {
    let store = open_store(config)?;
    let (handle, signal) = stop_channel();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.stop();
        }
    });

    let mut observer = Observer::new(store, config.timing.to_timing().observer_refresh);
    let last = observer.watch(signal, print_update).await?;
    interrupt.abort();

    if !last.is_running {
        println!("No run in progress");
    }
    Ok(())
}

fn status(config: &VoltConfig) -> Result<()> {
    let store = open_store(config)?;
    let status = store.snapshot()?;
    let samples = store.read_all_samples()?;

    println!("{}", format_status(&status));
    println!("Live samples: {}", samples.len());
    if let Some(last) = samples.last() {
        println!("Latest: {}", format_sample(last));
    }
    if status.result_ready {
        println!("Result ready: {}", status.artifact_path);
    }
    if !status.is_consistent() {
        warn!(
            is_running = status.is_running,
            status = %status.status_text,
            "Store flags disagree; a worker may have died. Use `reset --force` if no run is active"
        );
    }
    Ok(())
}

fn stop(config: &VoltConfig) -> Result<()> {
    let store = open_store(config)?;
    if request_stop_in_store(store.as_ref()).context("Failed to publish stop request")? {
        println!("Stop requested; the run ends at its next tick");
    } else {
        println!("No run in progress");
    }
    Ok(())
}

fn reset(config: &VoltConfig, force: bool) -> Result<()> {
    let store = open_store(config)?;
    if store.get_flag(StoreKey::IsRunning)? && !force {
        bail!("A run is marked in progress; pass --force to clear it");
    }
    force_reset(store.as_ref()).context("Failed to reset status store")?;
    println!("Status reset to Idle");
    Ok(())
}

fn archive(
    config: &VoltConfig,
    file: Option<&Path>,
    window: Option<MinuteWindow>,
    battery_voltage: f64,
    battery_capacity_mah: Option<f64>,
) -> Result<()> {
    let Some(file) = file else {
        let dir = &config.storage.csv_dir;
        let files = list_artifacts(dir)
            .with_context(|| format!("Failed to list artifacts in {}", dir.display()))?;
        if files.is_empty() {
            println!("No artifacts in {}", dir.display());
        }
        for path in files {
            println!("{}", path.display());
        }
        return Ok(());
    };

    let archive =
        Archive::load(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let summary = archive.summarize(window)?;

    println!("{} ({} rows)", archive.path().display(), summary.rows);
    if let Some(window) = window {
        println!(
            "Window: minute {} to {}",
            window.from_minute, window.to_minute
        );
    }
    let channels = [
        ("Voltage (V)", summary.voltage_v),
        ("Current (mA)", summary.current_ma),
        ("Power (mW)", summary.power_mw),
    ];
    for (label, stats) in channels {
        match stats {
            Some(stats) => println!("{:<13} {}", label, stats),
            None => println!("{:<13} no data", label),
        }
    }

    if let Some(capacity_mah) = battery_capacity_mah {
        let estimate = summary.battery_life(battery_voltage, capacity_mah)?;
        println!(
            "Battery {:.0} mAh ({:.2} Wh at {:.2} V): {:.2} h ({:.2} days)",
            capacity_mah, estimate.capacity_wh, battery_voltage, estimate.hours, estimate.days
        );
    }
    Ok(())
}
