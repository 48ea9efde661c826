//! Crucible CLI, the host process around the agent core.
//!
//! Commands:
//! - `run`    : one goal, protocol envelopes on stdout
//! - `serve`  : line-oriented stdio protocol for front ends
//! - `config` : show, locate or create the configuration file
//!
//! Logs go to stderr so stdout carries nothing but envelopes.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod host;
#[cfg(test)]
mod test_support;

#[derive(Parser)]
#[command(
    name = "crucible",
    about = "Crucible: a tool-using agent engine",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "CRUCIBLE_LOG_JSON")]
    log_json: bool,

    /// Config file (default: ~/.crucible/config.toml)
    #[arg(short, long, global = true, env = "CRUCIBLE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single goal and stream envelopes to stdout
    Run {
        /// What the agent should accomplish
        #[arg(short, long)]
        goal: String,

        /// Resume and persist this session
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Speak the stdio protocol: one JSON request per input line
    Serve {
        /// Resume this session instead of starting a fresh one
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file path
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config_path = cli
        .config
        .unwrap_or_else(crucible_config::AppConfig::default_path);

    match cli.command {
        Commands::Run { goal, session } => commands::run::run(&config_path, goal, session).await,
        Commands::Serve { session } => commands::serve::run(&config_path, session).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(&config_path),
            ConfigAction::Path => commands::config_cmd::path(&config_path),
            ConfigAction::Init { force } => commands::config_cmd::init(&config_path, force),
        },
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
