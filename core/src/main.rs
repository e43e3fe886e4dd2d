//! ROBOEST: run and compare state estimators on simulated vehicle runs.
//!
//! A run is described by a simulation configuration file (TOML/JSON/YAML) holding the vehicle, the
//! measurement model, the estimator and its noise settings, and the synthetic scenario. The
//! scenario is simulated once and replayed through the selected estimator (or all four with
//! `compare`); a summary with the average update runtime and the mean squared error is logged.

use clap::{Parser, Subcommand};
use log::{error, info};
use std::io::Write;
use std::path::PathBuf;

use roboest::config::SimulationConfig;
use roboest::estimator::EstimatorKind;
use roboest::scheduler::run_batch;
use roboest::sim::{Dataset, constant_inputs, simulate};

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Run and compare state estimators on simulated vehicle runs.")]
struct Cli {
    /// Simulation configuration file (TOML/JSON/YAML); built-in defaults when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Clone)]
enum Command {
    /// Replay the scenario through the configured estimator
    Run,
    /// Replay the scenario through every estimator
    Compare,
    /// Write a template configuration file
    Template {
        /// Output path; the extension selects the format
        output: PathBuf,
    },
}

fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SimulationConfig> {
    let mut config = match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            SimulationConfig::from_file(path)?
        }
        None => SimulationConfig::default(),
    };
    if config.run.dt.is_none() {
        config.run.dt = Some(0.1);
    }
    Ok(config)
}

fn simulate_scenario(config: &SimulationConfig) -> anyhow::Result<Dataset> {
    let run = &config.run;
    let dt = run
        .dt
        .ok_or_else(|| anyhow::anyhow!("the scenario needs an explicit dt"))?;
    let initial_state = run
        .initial_state()?
        .unwrap_or_else(|| nalgebra::DVector::zeros(run.vehicle.state_dimension()));
    let inputs = constant_inputs(&config.scenario_input()?, config.scenario.steps);
    let dataset = simulate(
        run.process_model().as_ref(),
        run.measurement_model().as_ref(),
        &initial_state,
        &inputs,
        dt,
        &config.scenario.noise,
        config.scenario.seed,
    )?;
    info!(
        "Simulated {} steps of a {} (dt = {dt} s, seed {})",
        dataset.len(),
        run.vehicle.name(),
        config.scenario.seed
    );
    Ok(dataset)
}

fn run(config: &SimulationConfig) -> anyhow::Result<()> {
    config.validate()?;
    let dataset = simulate_scenario(config)?;
    run_batch(&config.run, &dataset)?;
    Ok(())
}

fn compare(config: &SimulationConfig) -> anyhow::Result<()> {
    config.validate()?;
    let dataset = simulate_scenario(config)?;
    let mut failures = 0;
    for kind in EstimatorKind::ALL {
        let mut run_config = config.run.clone();
        run_config.estimator = kind.to_string();
        if let Err(e) = run_batch(&run_config, &dataset) {
            error!("{kind} failed: {e}");
            failures += 1;
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} estimator runs failed");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Err(e) = init_logger(&cli.log_level, cli.log_file.as_ref()) {
        eprintln!("Failed to initialize logger: {e}");
    }
    let config = load_config(cli.config.as_ref())?;
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config),
        Command::Compare => compare(&config),
        Command::Template { output } => {
            config.to_file(&output)?;
            info!("Wrote template configuration to {}", output.display());
            Ok(())
        }
    }
}
