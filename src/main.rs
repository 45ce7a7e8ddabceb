use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use agentrun::{server, AgentRun, RunnerConfig};

#[derive(Parser)]
#[command(name = "agentrun")]
#[command(
    author,
    version,
    about = "Run untrusted Python snippets in an isolated Docker container"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the runner configuration file
    #[arg(short, long, global = true, default_value = "agentrun.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a snippet from a file ("-" reads stdin) and print the outcome
    Exec {
        /// Source file to run
        file: String,
    },

    /// Serve the HTTP run API
    Serve {
        /// Address to bind
        #[arg(short, long, default_value = "127.0.0.1:8000")]
        bind: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("agentrun=debug")
    } else {
        EnvFilter::new("agentrun=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = RunnerConfig::load(&cli.config)?;

    match cli.command {
        Commands::Exec { file } => {
            let source = read_source(&file)?;
            let runner = AgentRun::new(config).await?;
            let outcome = runner.execute(&source).await?;
            print!("{outcome}");
        }
        Commands::Serve { bind } => {
            let runner = AgentRun::new(config).await?;
            let app = server::build_app(Arc::new(runner));
            let listener = tokio::net::TcpListener::bind(bind)
                .await
                .with_context(|| format!("Failed to bind {bind}"))?;
            info!("Listening on {}", bind);
            axum::serve(listener, app)
                .await
                .context("HTTP server failed")?;
        }
    }

    Ok(())
}

fn read_source(file: &str) -> Result<String> {
    if file == "-" {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("Failed to read snippet from stdin")?;
        Ok(source)
    } else {
        std::fs::read_to_string(file).with_context(|| format!("Failed to read snippet: {file}"))
    }
}
