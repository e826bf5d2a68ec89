use anyhow::{Context, Result};
use avs_node::config::NodeConfig;
use avs_node::logging;
use avs_node::simulation::run_simulation;
use avs_tasks::TaskState;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG: &str = "./avs-config.toml";

#[derive(Parser)]
#[command(name = "avs-node")]
#[command(about = "AVS aggregator node - task responses and fraud challenges", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a local round against an in-memory ledger
    Simulate {
        /// Number of tasks to dispatch
        #[arg(short, long)]
        tasks: Option<usize>,

        /// How many of those tasks are answered wrongly
        #[arg(short, long)]
        faulty: Option<usize>,

        /// Directory for durable task records
        #[arg(long)]
        store_dir: Option<PathBuf>,
    },

    /// Write a configuration file with default values
    InitConfig {
        /// Output file
        #[arg(default_value = DEFAULT_CONFIG)]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<NodeConfig> {
    let mut config = match path {
        Some(path) => NodeConfig::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => NodeConfig::from_file(Path::new(DEFAULT_CONFIG))?,
        None => NodeConfig::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config early to get logging settings
    let early_config = load_config(cli.config.as_deref()).ok();
    let logging_config = early_config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();

    if logging_config.show_boot_banner && cli.verbose == 0 && std::env::var("RUST_LOG").is_err() {
        logging::display_boot_banner(env!("CARGO_PKG_VERSION"));
    }

    if let Err(e) = logging::init_logging(&logging_config, cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
        // Fall back to basic logging
        let log_level = logging::effective_level(&logging_config, cli.verbose);
        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(
                std::env::var("RUST_LOG").unwrap_or_else(|_| format!("avs={}", log_level)),
            ))
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    match cli.command {
        Commands::Simulate {
            tasks,
            faulty,
            store_dir,
        } => {
            // CLI args > env vars > config file > defaults
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(tasks) = tasks {
                config.simulation.tasks = tasks;
            }
            if let Some(faulty) = faulty {
                config.simulation.faulty_tasks = faulty;
            }
            if store_dir.is_some() {
                config.tasks.store_dir = store_dir;
            }

            info!(
                tasks = config.simulation.tasks,
                faulty = config.simulation.faulty_tasks,
                operators = config.simulation.operators,
                "🚀 Starting simulation"
            );
            let report = run_simulation(&config).await.context("simulation failed")?;

            for d in &report.dispositions {
                let tx = d
                    .response_tx
                    .map(|h| h.to_hex())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "task {:>4}  {:<24} response_tx {}",
                    d.task_index.to_string(),
                    format!("{:?}", d.state),
                    tx
                );
                if let Some(failure) = &d.failure {
                    println!("           failure {:?}", failure);
                }
            }
            println!(
                "final {}  challenged {}  abandoned {}  head {}",
                report.count(TaskState::Final),
                report.count(TaskState::Challenged),
                report.count(TaskState::Abandoned),
                report.head
            );

            let missed = report
                .faulty
                .iter()
                .filter(|i| {
                    report
                        .disposition(**i)
                        .map_or(true, |d| d.state != TaskState::Challenged)
                })
                .count();
            if missed > 0 && config.challenges.enabled {
                warn!(missed, "⚠️ Faulty responses went unchallenged");
            }
        }
        Commands::InitConfig { path, force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists, pass --force to overwrite", path.display());
            }
            NodeConfig::default()
                .save_to_file(&path)
                .with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "⚙️ Configuration written");
        }
    }

    Ok(())
}
