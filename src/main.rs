use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use drought_service::artifacts::ArtifactSet;
use drought_service::config::{self, ServiceConfig};
use drought_service::db::PostgresStore;
use drought_service::ingest::{self, CsvOptions, ManualRequest};
use drought_service::logging::{self, Stage};
use drought_service::model::PredictionKind;
use drought_service::pipeline::Predictor;
use drought_service::store::PredictionStore;
use drought_service::verify;

/// Regional drought (REGCDI) inference from 12-month feature windows.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Configuration file; defaults to $DROUGHT_CONFIG or ./drought_service.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict every complete 12-month window in a CSV table
    PredictCsv {
        file: PathBuf,

        /// Location for rows without a location column
        #[arg(long)]
        location: Option<String>,

        /// First month (YYYY-MM) when the table has no date column
        #[arg(long)]
        start_month: Option<String>,

        /// Store the predictions in the database
        #[arg(long)]
        persist: bool,
    },
    /// Predict one window from a JSON request body
    PredictManual {
        file: PathBuf,

        #[arg(long)]
        persist: bool,
    },
    /// Check the model artifacts and run a probe inference
    Health,
    /// Stored predictions, most recent first
    History {
        #[arg(long, default_value_t = 0)]
        skip: usize,

        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Latest stored predictions, optionally for one location
    Forecast {
        #[arg(long)]
        location: Option<String>,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// One stored prediction by id
    Show { id: i64 },
    /// Aggregate statistics over stored predictions
    Summary,
}

fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    match path {
        Some(path) => {
            dotenv::dotenv().ok();
            let mut config = config::load_config(path)?;
            config.apply_overrides(|key| env::var(key).ok());
            Ok(config)
        }
        None => Ok(config::load_from_env()?),
    }
}

fn write_json<T: Serialize>(value: &T) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Loads the artifacts and refuses to serve if the health check fails.
fn load_predictor(config: &ServiceConfig) -> Result<Predictor> {
    let artifacts: Arc<ArtifactSet> =
        ArtifactSet::load(&config.artifacts).context("failed to load model artifacts")?;
    let health = verify::run_health_check(&artifacts);
    if !health.is_serving() {
        bail!("artifact health check failed: {}", serde_json::to_string(&health.checks)?);
    }
    Ok(Predictor::new(artifacts).with_default_location(&config.pipeline.default_location))
}

fn open_store(config: &ServiceConfig) -> Result<PostgresStore> {
    let mut store = PostgresStore::connect(config.database_url()?)
        .context("failed to connect to the prediction database")?;
    store.ensure_schema()?;
    Ok(store)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    logging::init_logging(&config.logging);

    match cli.command {
        Commands::PredictCsv {
            file,
            location,
            start_month,
            persist,
        } => {
            let predictor = load_predictor(&config)?;
            let options = CsvOptions {
                location,
                start_month: start_month.as_deref().map(ingest::parse_month_arg).transpose()?,
            };
            let rows = ingest::read_table(&file, &options)
                .with_context(|| format!("failed to read {}", file.display()))?;
            info!(stage = %Stage::Ingest, file = %file.display(), rows = rows.len(), "csv.loaded");

            let outcome = predictor.predict_batch(rows)?;
            if persist {
                let source = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.display().to_string());
                open_store(&config)?.save_batch(&source, &outcome.predictions)?;
            }
            write_json(&outcome)
        }
        Commands::PredictManual { file, persist } => {
            let predictor = load_predictor(&config)?;
            let text = fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let request = ManualRequest::from_json(&text)?;
            let location = request.location.clone();
            let rows = request.into_rows(Utc::now().date_naive())?;

            let result = predictor.predict_manual(location.as_deref(), rows)?;
            if persist {
                open_store(&config)?.save_prediction(PredictionKind::Manual, &result)?;
            }
            write_json(&result)
        }
        Commands::Health => {
            let report = match ArtifactSet::load(&config.artifacts) {
                Ok(artifacts) => verify::run_health_check(&artifacts),
                Err(err) => verify::failed_load_report(&err),
            };
            write_json(&report)?;
            if !report.is_serving() {
                bail!("artifacts are not fit to serve predictions");
            }
            Ok(())
        }
        Commands::History { skip, limit } => write_json(&open_store(&config)?.history(skip, limit)?),
        Commands::Forecast { location, limit } => {
            write_json(&open_store(&config)?.recent_predictions(location.as_deref(), limit)?)
        }
        Commands::Show { id } => match open_store(&config)?.prediction(id)? {
            Some(stored) => write_json(&stored),
            None => bail!("no stored prediction with id {id}"),
        },
        Commands::Summary => write_json(&open_store(&config)?.summary()?),
    }
}
