use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pairnet::{
    config::{load_or_init, ExperimentConfig},
    device::Device,
    evaluate::{evaluate_model, validate_model},
    experiment::Experiment,
    grid_search::grid_search,
    mnist::MNISTData,
    models::Family,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Compares pairs of MNIST digits with several network families
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to MNIST folder with the uncompressed ubyte files
    mnist_folder: PathBuf,

    /// Experiment configuration, created with defaults when missing
    #[arg(long, default_value = "pairnet.json")]
    config: PathBuf,

    /// Render learning curves and boxplots into the configured plots directory
    #[arg(long)]
    plots: bool,

    /// Spread each mini-batch over all available worker threads
    #[arg(long)]
    accelerate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Train once on the validation seed and report the test score
    Validate {
        #[arg(long, value_enum)]
        family: Family,
    },
    /// Train once per configured seed with the family's hyperparameters
    Evaluate {
        #[arg(long, value_enum)]
        family: Family,
    },
    /// Grid-search the family's hyperparameters over all configured seeds
    Tune {
        #[arg(long, value_enum)]
        family: Family,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config: ExperimentConfig = load_or_init(&args.config, ExperimentConfig::default)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;

    info!("Loading MNIST data");

    let digits = MNISTData::parse(&args.mnist_folder)
        .with_context(|| format!("failed to load MNIST data from {}", args.mnist_folder.display()))?;

    let experiment = Experiment {
        digits: &digits,
        data: config.data,
        training: config.training,
        device: Device::select(args.accelerate),
        plots: args.plots.then(|| config.plots_dir.clone()),
    };

    match args.command {
        Command::Validate { family } => {
            let params = &config.families.get(family).params;
            validate_model(&family, params, config.validation_seed, &experiment)
                .context("validation run failed")?;
        }
        Command::Evaluate { family } => {
            let params = &config.families.get(family).params;
            evaluate_model(&family, params, &config.seeds, &experiment)
                .context("evaluation failed")?;
        }
        Command::Tune { family } => {
            let grid = &config.families.get(family).grid;
            let results =
                grid_search(&family, grid, &config.seeds, &experiment).context("grid search failed")?;

            println!("{}", serde_json::to_string_pretty(&results.best)?);
        }
    }

    Ok(())
}
