use std::path::PathBuf;

use botsmith::Result;
use botsmith::commands::{init_config, show_config, show_status};
use botsmith::config::Config;
use botsmith::server::serve;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "botsmith")]
#[command(about = "Chatbot-builder backend with per-bot document indexing and streaming chat")]
#[command(version)]
struct Cli {
    /// Override the data directory (defaults to the per-user data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Show or initialize the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Show per-bot indexing status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let base_dir = match cli.data_dir {
        Some(dir) => dir,
        None => Config::default_base_dir().map_err(anyhow::Error::from)?,
    };
    let mut config = Config::load(&base_dir)?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await?;
        }
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                init_config(&config)?;
            }
        }
        Commands::Status => {
            show_status(&config).await?;
        }
    }

    Ok(())
}
