use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use testboard::config::{AppConfig, DEFAULT_CONFIG_FILE};

mod cmd;

#[derive(Parser)]
#[command(name = "testboard")]
#[command(version, about = "Test-report dashboard back-end")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file. Missing files fall back to defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server with the in-process report pipeline
    Serve {
        /// Port to serve on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Enable dev mode (CORS permissive for a local front-end dev server)
        #[arg(long)]
        dev: bool,
    },
    /// Create and migrate the database, then exit
    InitDb,
    /// Fetch one report from a running server
    Report {
        /// Report date (YYYY-MM-DD); defaults to today
        #[arg(short, long)]
        date: Option<String>,

        /// Delete the stored report and regenerate it
        #[arg(long)]
        force: bool,

        /// Enrichments as JSON, e.g. '{"includeDetails":true}'
        #[arg(long)]
        enrichments: Option<String>,

        /// Server base URL (defaults to the configured host and port)
        #[arg(long)]
        url: Option<String>,
    },
    /// Poll a report until it is ready, printing every state change
    Watch {
        /// Report date (YYYY-MM-DD); defaults to today
        #[arg(short, long)]
        date: Option<String>,

        /// Ask for a forced refresh once the first load finishes
        #[arg(long)]
        force: bool,

        /// Server base URL (defaults to the configured host and port)
        #[arg(long)]
        url: Option<String>,
    },
    /// Run the pull-request housekeeping job once
    Coordinate {
        /// Print the messages the job would publish without applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// Start tracking a pull request
    TrackPr {
        /// Repository as owner/name or a GitHub URL
        repository: String,

        /// Pull request number
        number: i64,

        /// Title to store; fetched from GitHub when omitted
        #[arg(long)]
        title: Option<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default testboard.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::resolve(&cli.config)?;
    let _log_guard = testboard::logging::init(&config.logging, cli.verbose)?;

    match &cli.command {
        Commands::Serve { port, host, dev } => {
            cmd::cmd_serve(config, *port, host.clone(), *dev).await?;
        }
        Commands::InitDb => cmd::cmd_init_db(&config)?,
        Commands::Report {
            date,
            force,
            enrichments,
            url,
        } => {
            cmd::cmd_report(
                &config,
                date.as_deref(),
                *force,
                enrichments.as_deref(),
                url.as_deref(),
            )
            .await?;
        }
        Commands::Watch { date, force, url } => {
            cmd::cmd_watch(&config, date.as_deref(), *force, url.as_deref()).await?;
        }
        Commands::Coordinate { dry_run } => cmd::cmd_coordinate(&config, *dry_run).await?,
        Commands::TrackPr {
            repository,
            number,
            title,
        } => {
            cmd::cmd_track_pr(&config, repository, *number, title.as_deref()).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&cli.config, &config, command.clone())?,
    }

    Ok(())
}
