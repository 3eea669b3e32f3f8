use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "pulsed", about = "Control plane for pulse metric plugins")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Extra config file, applied over the user and project config
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the control plane and keep plugins running until interrupted
    Run(commands::run::RunArgs),
    /// Load a single plugin, print its record and exit
    Load(commands::load::LoadArgs),
    /// Show the merged configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = config::ConfigLoader::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => commands::run::run(config, args).await,
        Commands::Load(args) => commands::load::run(config, args).await,
        Commands::Config => commands::show_config(&config),
    }
}
