//! Financial Activity Anomaly Detection
//!
//! Batch CLI for training isolation-forest anomaly models over tabular
//! financial-activity data and re-applying them to new datasets.

use anomaly_model::TrainParams;
use anyhow::{Context, Result};
use artifact_store::ArtifactStore;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use config::Config;
use database::{create_pool, run_migrations};
use finsentry::inference::{DatasetKind, InferRequest};
use finsentry::training::TrainRequest;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Financial Activity Anomaly Detection
#[derive(Parser)]
#[command(name = "finsentry")]
#[command(about = "Anomaly detection runs over financial activity data")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model on a historical dataset and register it
    Train {
        /// Entity the model belongs to
        #[arg(long)]
        entity: Uuid,

        /// Identifier of the training dataset record
        #[arg(long)]
        dataset_id: Uuid,

        /// Artifact-store path of the training dataset CSV
        #[arg(long)]
        dataset_path: String,

        /// Logical model key within the entity
        #[arg(long, default_value = "activity_anomaly")]
        model_key: String,

        /// Comma-separated numeric feature columns
        #[arg(long, value_delimiter = ',', required = true)]
        numeric_cols: Vec<String>,

        /// Comma-separated categorical feature columns
        #[arg(long, value_delimiter = ',')]
        categorical_cols: Vec<String>,

        /// Expected anomaly fraction of the training data, in (0, 0.5]
        #[arg(long, default_value = "0.02")]
        contamination: f64,

        /// Number of trees in the ensemble
        #[arg(long, default_value = "200")]
        trees: usize,

        /// Rows subsampled per tree
        #[arg(long, default_value = "256")]
        sample_size: usize,

        /// Random seed for reproducible training
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Version to register the model under
        #[arg(long, default_value = "1")]
        model_version: i64,

        /// Actor recorded in documents and the audit ledger
        #[arg(long, default_value = "system")]
        actor: String,
    },

    /// Score a new dataset with a registered model
    Infer {
        /// Entity the data belongs to
        #[arg(long)]
        entity: Uuid,

        /// Registered model to score with
        #[arg(long)]
        model_id: Uuid,

        /// Artifact-store path of the dataset CSV to score
        #[arg(long)]
        dataset_path: String,

        /// First date covered by the input data
        #[arg(long)]
        period_start: NaiveDate,

        /// Last date covered by the input data
        #[arg(long)]
        period_end: NaiveDate,

        /// Dataset shape: periodic aggregates or discrete events
        #[arg(long, value_enum, default_value = "periodic")]
        kind: DatasetKind,

        /// Cap on stored event rows, most anomalous first; 0 = unlimited
        #[arg(long, default_value = "500")]
        event_cap: usize,

        /// Actor recorded in documents and the audit ledger
        #[arg(long, default_value = "system")]
        actor: String,
    },

    /// Run database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env()?;
    let pool = create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    match cli.command {
        Commands::Train {
            entity,
            dataset_id,
            dataset_path,
            model_key,
            numeric_cols,
            categorical_cols,
            contamination,
            trees,
            sample_size,
            seed,
            model_version,
            actor,
        } => {
            let store = ArtifactStore::local(&config.artifact_base_path)?;
            let outcome = finsentry::training::run(
                &pool,
                &store,
                &TrainRequest {
                    entity_id: entity,
                    model_key,
                    dataset_id,
                    dataset_path,
                    numeric_features: numeric_cols,
                    categorical_features: categorical_cols,
                    contamination,
                    params: TrainParams {
                        trees,
                        sample_size,
                        seed,
                    },
                    model_version,
                    actor,
                },
            )
            .await?;

            println!(
                "{}",
                serde_json::json!({
                    "model_id": outcome.model_id,
                    "run_id": outcome.run_id,
                    "status": outcome.status,
                })
            );
        }
        Commands::Infer {
            entity,
            model_id,
            dataset_path,
            period_start,
            period_end,
            kind,
            event_cap,
            actor,
        } => {
            let store = ArtifactStore::local(&config.artifact_base_path)?;
            let outcome = finsentry::inference::run(
                &pool,
                &store,
                &InferRequest {
                    entity_id: entity,
                    model_id,
                    dataset_path,
                    period_start,
                    period_end,
                    kind,
                    event_cap,
                    actor,
                },
            )
            .await?;

            let mut report = serde_json::json!({
                "run_id": outcome.run_id,
                "anomaly_count": outcome.anomaly_count,
                "status": outcome.status,
            });
            if let Some(written) = outcome.db_rows_written {
                report["db_rows_written"] = serde_json::json!(written);
            }
            println!("{report}");
        }
        Commands::Migrate => {
            info!("Migrations completed successfully");
        }
    }

    Ok(())
}
