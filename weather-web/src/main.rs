//! Binary crate for the `weather-web` service.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Interactive configuration
//! - The HTTP routes, session carry and HTML pages

use clap::Parser;
use weather_core::Config;

mod cli;
mod handlers;
mod server;
mod session;
mod telemetry;
mod templates;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cmd = cli::Cli::parse();
    let config = Config::load()?;
    telemetry::init(&config.log)?;

    cmd.run(config).await
}
