//! LCP CLI - Command-line client for protected publications
//!
//! Acquires the publication referenced by a license and manages the
//! consumable rights persisted for it.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// LCP - Protected publication client
#[derive(Parser)]
#[command(name = "lcp")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Data directory holding the rights vault and configuration
    #[arg(long, env = "LCP_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and verify the publication of a license
    Acquire {
        /// Path to the license document
        license: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rights management
    Rights {
        #[command(subcommand)]
        action: RightsAction,
    },

    /// Rights vault inspection
    Vault {
        #[command(subcommand)]
        action: VaultAction,
    },

    /// Show/update settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum RightsAction {
    /// Show all rights of a license
    Show {
        /// Path to the license document
        license: PathBuf,
    },

    /// Check whether a right can be used
    Check {
        /// Path to the license document
        license: PathBuf,

        /// Right id (print, copy, tts, start, end, ...)
        right: String,
    },

    /// Consume a right
    Use {
        /// Path to the license document
        license: PathBuf,

        /// Right id
        right: String,

        /// Units to consume
        #[arg(short, long, default_value_t = 1)]
        amount: u64,
    },

    /// Override the value of a right
    Set {
        /// Path to the license document
        license: PathBuf,

        /// Right id
        right: String,

        /// New value ("-1" for unlimited counters)
        value: String,
    },
}

#[derive(Subcommand)]
enum VaultAction {
    /// List persisted rights
    List,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key
        key: String,

        /// Config value
        value: String,
    },

    /// Show all config
    Show,

    /// Reset to defaults
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Commands::Completions { shell } = cli.command {
        use clap::CommandFactory;
        clap_complete::generate(shell, &mut Cli::command(), "lcp", &mut std::io::stdout());
        return Ok(());
    }

    // Determine data directory
    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .map(|d| d.join("lcp"))
            .unwrap_or_else(|| PathBuf::from(".lcp"))
    });

    // Initialize core
    let core = lcp_core::LcpCore::new(data_dir).await?;

    // Execute command
    match cli.command {
        Commands::Acquire { license, output } => {
            commands::acquire(&core, license, output, cli.output).await?
        }

        Commands::Rights { action } => commands::rights_action(&core, action, cli.output).await?,

        Commands::Vault { action } => commands::vault_action(&core, action, cli.output).await?,

        Commands::Config { action } => commands::config_action(&core, action, cli.output).await?,

        Commands::Completions { .. } => unreachable!("handled before core initialization"),
    }

    Ok(())
}
