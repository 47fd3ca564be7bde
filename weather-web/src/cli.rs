use anyhow::Context;
use clap::{Parser, Subcommand};
use inquire::{CustomType, Password, Select, Text};
use weather_core::{Config, PersistenceStrategy, Pipeline, WeatherReport};

use crate::server::{self, AppState};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather-web", version, about = "Weather lookup web service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server.
    Serve {
        /// Listen address; overrides the configured one.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Look up the weather for one location and print it.
    Show {
        /// Location name, e.g. "Paris" or "Springfield, IL".
        location: String,

        /// Skip the configured persistence strategy.
        #[arg(long)]
        no_persist: bool,
    },

    /// Interactively write the config file.
    Configure,
}

impl Cli {
    pub async fn run(self, config: Config) -> anyhow::Result<()> {
        match self.command {
            Command::Serve { bind } => {
                let addr = bind.unwrap_or_else(|| config.server.bind.clone());
                let state = AppState::from_config(&config)?;
                server::serve(state, &addr).await
            }
            Command::Show {
                location,
                no_persist,
            } => {
                let pipeline = show_pipeline(config, no_persist)?;
                let report = pipeline
                    .run(Some(&location))
                    .await
                    .with_context(|| format!("Weather lookup for '{location}' failed"))?;
                print!("{}", format_report(&report));
                Ok(())
            }
            Command::Configure => configure(),
        }
    }
}

/// `--no-persist` swaps the strategy before any sink is built.
fn show_pipeline(mut config: Config, no_persist: bool) -> anyhow::Result<Pipeline> {
    if no_persist {
        config.persistence.strategy = PersistenceStrategy::None;
    }
    Pipeline::from_config(&config)
}

fn format_report(report: &WeatherReport) -> String {
    let mut out = format!(
        "Weather in {}\n  Forecast:   {}\n  Feels like: {} °C\n  Wind speed: {} m/s\n  Cloudiness: {}%\n",
        report.location, report.forecast, report.temp, report.wind_speed, report.clouds
    );
    if let Some(at) = report.observed_at {
        out.push_str(&format!("  Observed:   {}\n", at.format("%Y-%m-%d %H:%M UTC")));
    }
    out
}

/// Prompt for credentials and persistence settings, starting from the saved
/// file so environment overrides are not written back.
fn configure() -> anyhow::Result<()> {
    let mut config = Config::load_file()?;

    let api_key = Password::new("OpenWeather API key:")
        .without_confirmation()
        .prompt()?;
    config.api_key = Some(api_key.trim().to_owned()).filter(|k| !k.is_empty());

    let secret = Password::new("Session signing secret:")
        .without_confirmation()
        .prompt()?;
    config.session_secret = Some(secret).filter(|s| !s.is_empty());

    let bind = Text::new("Listen address:")
        .with_default(&config.server.bind)
        .prompt()?;
    config.server.bind = bind;

    let strategies = PersistenceStrategy::all().to_vec();
    let current = strategies
        .iter()
        .position(|s| *s == config.persistence.strategy)
        .unwrap_or(0);
    config.persistence.strategy = Select::new("Persistence strategy:", strategies)
        .with_starting_cursor(current)
        .prompt()?;

    if config.persistence.strategy == PersistenceStrategy::Postgres {
        let db = &mut config.persistence.database;
        db.host = Text::new("Database host:").with_default(&db.host).prompt()?;
        db.port = CustomType::<u16>::new("Database port:")
            .with_default(db.port)
            .prompt()?;
        db.name = Some(Text::new("Database name:").prompt()?);
        db.user = Some(Text::new("Database user:").prompt()?);
        let password = Password::new("Database password:")
            .without_confirmation()
            .prompt()?;
        db.password = Some(password).filter(|p| !p.is_empty());
    }

    let path = config.save()?;
    println!("Configuration saved to {}", path.display());
    Ok(())
}
