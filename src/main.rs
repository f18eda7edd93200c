use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::error;

use gesture_studio_lib::models::ToolKind;
use gesture_studio_lib::settings::{CameraSource, Settings};
use gesture_studio_lib::utils::logging::init_logging;

#[derive(Parser)]
#[command(name = "gesture-studio")]
#[command(about = "Camera-driven gesture tools served over HTTP")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API (default)
    Serve {
        /// Settings file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Listen address, overrides the settings file
        #[arg(long)]
        bind: Option<String>,

        /// Use the generated test pattern instead of a capture device
        #[arg(long)]
        synthetic: bool,
    },

    /// Run a single tool headless until SIGINT/SIGTERM (spawned by the host)
    Worker {
        /// Tool to run, e.g. gesture-nav
        #[arg(long)]
        tool: ToolKind,

        /// Settings file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use the generated test pattern instead of a capture device
        #[arg(long)]
        synthetic: bool,
    },
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("{err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command.unwrap_or(Commands::Serve {
        config: None,
        bind: None,
        synthetic: false,
    }) {
        Commands::Serve {
            config,
            bind,
            synthetic,
        } => {
            let mut settings = load_settings(config, synthetic)?;
            if let Some(bind) = bind {
                settings.bind_addr = bind;
            }
            gesture_studio_lib::serve(settings).await
        }
        Commands::Worker {
            tool,
            config,
            synthetic,
        } => {
            let settings = load_settings(config, synthetic)?;
            gesture_studio_lib::worker::run_worker(tool, settings).await
        }
    }
}

fn load_settings(config: Option<PathBuf>, synthetic: bool) -> Result<Settings> {
    let mut settings = Settings::load(config.as_deref())?;
    if synthetic {
        settings.camera.source = CameraSource::Synthetic;
    }
    Ok(settings)
}
