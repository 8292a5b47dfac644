use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "teamboard")]
#[command(version, about = "Engineering dashboard backend for Jira, GitLab and Jenkins")]
pub struct Cli {
    /// Raise the default log level to debug
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to teamboard.toml (defaults to ./teamboard.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database path. Overrides [database] path.
    #[arg(long, global = true, env = "TEAMBOARD_DB")]
    pub db_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the dashboard API and run the enabled collectors
    Serve {
        /// Address to bind. Overrides [server] host.
        #[arg(long)]
        host: Option<String>,

        /// Port to serve on. Overrides [server] port.
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (permissive CORS)
        #[arg(long)]
        dev: bool,

        /// Serve queries only, without background collection
        #[arg(long)]
        no_collectors: bool,
    },
    /// Run each enabled collector once and exit
    Collect {
        /// Only run this source: jira, gitlab or jenkins
        #[arg(short, long)]
        source: Option<String>,
    },
    /// Create the database and apply migrations
    InitDb,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Manage dashboard components and their collector items
    Component {
        #[command(subcommand)]
        command: ComponentCommands,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default teamboard.toml file
    Init,
}

#[derive(Subcommand, Clone)]
pub enum ComponentCommands {
    /// List components and their linked items
    List,
    /// Create a component
    Add {
        name: String,
        #[arg(long)]
        owner: Option<String>,
    },
    /// Register a collector item under a collector and link it to a component
    Link {
        /// Component id
        component: String,
        /// Collector type the item is linked as (scope_owner, feature, scm, build, test)
        #[arg(long = "type")]
        collector_type: String,
        /// Name of the registered collector that owns the item
        #[arg(long)]
        collector: String,
        /// Item options as key=value pairs
        #[arg(long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(teamboard::config::CONFIG_FILE_NAME));

    if let Commands::Config { command } = &cli.command {
        return cmd::cmd_config(&config_path, command.clone());
    }

    let mut config = teamboard::config::TeamboardToml::load_or_default(&config_path)?;
    if let Some(db_path) = &cli.db_path {
        config.database.path = db_path.clone();
    }
    let _log_guard = teamboard::logging::init_logging(&config.logging, cli.verbose)?;

    match &cli.command {
        Commands::Serve {
            host,
            port,
            dev,
            no_collectors,
        } => {
            if let Some(host) = host {
                config.server.host = host.clone();
            }
            if let Some(port) = port {
                config.server.port = *port;
            }
            config.server.dev |= *dev;
            cmd::cmd_serve(&config, !*no_collectors).await?;
        }
        Commands::Collect { source } => cmd::cmd_collect(&config, source.as_deref()).await?,
        Commands::InitDb => cmd::cmd_init_db(&config)?,
        Commands::Component { command } => cmd::cmd_component(&config, command.clone()).await?,
        Commands::Config { .. } => {}
    }

    Ok(())
}
