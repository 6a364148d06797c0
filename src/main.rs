use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{ChangesCommand, ConfigCommand, StatusCommand, SyncCommand, TablesCommand};
use sheetsync::config::Config;
use sheetsync_core::SyncContext;

#[derive(Parser)]
#[command(name = "sheetsync")]
#[command(version)]
#[command(about = "Verified replication between SQL tables and spreadsheets", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Use in-memory spreadsheets instead of the Sheets API
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full sync batch
    Sync(SyncCommand),

    /// Show ledger flags and change log statistics
    Status(StatusCommand),

    /// List configured table mappings
    Tables(TablesCommand),

    /// Process and maintain the change log
    Changes(ChangesCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sheetsync=info,sheetsync_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn open_context(config: &Config, dry_run: bool) -> Result<SyncContext, Box<dyn std::error::Error>> {
    let sheets = config.sheet_provider(dry_run)?;
    Ok(SyncContext::open(config.context_options(sheets)?).await?)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Sync(cmd)) => {
            let ctx = open_context(&config, cli.dry_run).await?;
            let result = cmd.run(&ctx).await;
            ctx.close().await;
            result?;
        }
        Some(Commands::Status(cmd)) => {
            let ctx = open_context(&config, cli.dry_run).await?;
            let result = cmd.run(&ctx).await;
            ctx.close().await;
            result?;
        }
        Some(Commands::Tables(cmd)) => {
            cmd.run(&config.registry()?)?;
        }
        Some(Commands::Changes(cmd)) => {
            let ctx = open_context(&config, cli.dry_run || !cmd.needs_sheets()).await?;
            let result = cmd.run(&ctx).await;
            ctx.close().await;
            result?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
