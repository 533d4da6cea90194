use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use client_core::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod demo;

use config::load_settings;

#[derive(Parser, Debug)]
#[command(about = "Keeps a controller connection open and runs the registered automations")]
struct Args {
    #[arg(long, default_value = "agent.toml")]
    config: PathBuf,
    /// Overrides the controller url from the settings file and environment.
    #[arg(long)]
    url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = load_settings(&args.config)?;
    if let Some(url) = args.url {
        settings.controller_url = url;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();

    let config = settings
        .client_config()
        .context("invalid controller settings")?;
    let types = demo::control_types().context("failed to register control types")?;
    let controller = Controller::new(config, types);

    demo::register_handlers(&controller)
        .await
        .context("failed to register handlers")?;
    if let Some(connections) = &settings.cast_connections {
        controller.enable_cast(connections.as_slice()).await;
    }

    info!(url = %settings.controller_url, "agent starting");
    controller.run().await
}
