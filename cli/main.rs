#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use neoscore::config::EvaluationConfig;
use neoscore::pipeline::{configure_thread_pool, run_with_progress};

#[derive(Parser)]
#[command(
    name = "neoscore",
    about = "Patient-stratified bootstrap scoring for Barrett's neoplasia detection",
    long_about = "Scores per-image neoplasia likelihoods against ground truth and reports AUROC, \
                 AUPRC and PPV at 90% recall with patient-level 95% bootstrap confidence intervals."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a submission and write metrics.json
    #[command(about = "Score a submission (outputs: metrics.json)")]
    Evaluate(EvaluateArgs),

    /// Print the effective configuration as TOML
    #[command(about = "Print the effective configuration")]
    PrintConfig {
        /// TOML configuration file (optional; built-in defaults otherwise)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Display version information
    #[command(about = "Display version information")]
    Version,
}

#[derive(Args)]
struct EvaluateArgs {
    /// TOML configuration file (optional; built-in defaults otherwise)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding predictions.json and the per-job outputs
    #[arg(long, value_name = "DIR")]
    input: Option<PathBuf>,

    /// Directory that receives metrics.json
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Ground-truth metadata JSON
    #[arg(long, value_name = "FILE")]
    ground_truth: Option<PathBuf>,

    /// Number of bootstrap iterations
    #[arg(long, value_name = "N")]
    iterations: Option<usize>,

    /// Neoplastic patients drawn per iteration
    #[arg(long, value_name = "N")]
    sample_size: Option<usize>,

    /// NDBE patients drawn per neoplastic patient
    #[arg(long, value_name = "N")]
    imbalance_ratio: Option<usize>,

    /// Seed for reproducible resampling
    #[arg(long, value_name = "N")]
    seed: Option<u64>,

    /// Worker threads (defaults to one per core)
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Also write every iteration's metrics to this TSV file
    #[arg(long, value_name = "FILE")]
    bootstrap_samples: Option<PathBuf>,
}

fn load_config(path: Option<&PathBuf>) -> Result<EvaluationConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            log::info!("Loading configuration from {}", path.display());
            Ok(EvaluationConfig::load(path)?)
        }
        None => Ok(EvaluationConfig::default()),
    }
}

impl EvaluateArgs {
    fn apply(self, config: &mut EvaluationConfig) {
        let paths = &mut config.paths;
        if let Some(input) = self.input {
            paths.input_dir = input;
        }
        if let Some(output) = self.output {
            paths.output_dir = output;
        }
        if let Some(ground_truth) = self.ground_truth {
            paths.ground_truth = ground_truth;
        }
        if let Some(samples) = self.bootstrap_samples {
            paths.bootstrap_samples = Some(samples);
        }

        let bootstrap = &mut config.bootstrap;
        if let Some(n) = self.iterations {
            bootstrap.n_iterations = n;
        }
        if let Some(n) = self.sample_size {
            bootstrap.sample_size = n;
        }
        if let Some(n) = self.imbalance_ratio {
            bootstrap.imbalance_ratio = n;
        }
        if self.seed.is_some() {
            bootstrap.seed = self.seed;
        }
        if self.threads.is_some() {
            bootstrap.threads = self.threads;
        }
    }
}

fn run_evaluate(args: EvaluateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(args.config.as_ref())?;
    args.apply(&mut config);
    config.validate()?;

    configure_thread_pool(config.bootstrap.threads)?;
    log::info!("Using {} worker threads", rayon::current_num_threads());

    let summary = run_with_progress(&config)?;
    log::info!(
        "Scored {} records from {} jobs (seed {})",
        summary.records,
        summary.jobs,
        summary.seed
    );
    Ok(())
}

fn run_print_config(config: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config.as_ref())?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Evaluate(args)) => run_evaluate(args),
        Some(Commands::PrintConfig { config }) => run_print_config(config),
        Some(Commands::Version) => {
            println!("neoscore {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
