//! Operative CLI: the main entry point.
//!
//! Commands:
//! - `init`   : Write a default config file
//! - `chat`   : Interactive chat or single-message mode
//! - `serve`  : Start the static file / front-end config server
//! - `doctor` : Diagnose configuration and credentials

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "operative",
    about = "Operative - an autonomous computer-use agent",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Chat with the agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Override the configured model
        #[arg(long, env = "OPERATIVE_MODEL")]
        model: Option<String>,
    },

    /// Serve the web front-end and its config endpoint
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Diagnose configuration and credentials
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so the transcript on stdout stays readable.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { force } => commands::init::run(force)?,
        Commands::Chat { message, model } => commands::chat::run(message, model).await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Doctor => commands::doctor::run()?,
    }

    Ok(())
}
