//! Training runs: fit the feature pipeline, train the scorer, store the
//! model artifact, and register the model version.

use anomaly_model::{ALGORITHM_NAME, ModelBundle, TrainParams, is_anomalous};
use anyhow::{Context, Result};
use artifact_store::ArtifactStore;
use bytes::Bytes;
use database::{
    AppendAuditEvent, AuditRepository, CreateDocument, CreateModel, CreateTrainingRun,
    DocumentRepository, ModelRepository, RunStatus, TrainingRun, TrainingRunRepository,
};
use feature_pipeline::Dataset;
use sqlx::SqlitePool;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Everything a training invocation needs, assembled by the caller.
#[derive(Debug, Clone)]
pub struct TrainRequest {
    pub entity_id: Uuid,
    pub model_key: String,
    pub dataset_id: Uuid,
    /// Artifact-store path of the training dataset CSV.
    pub dataset_path: String,
    pub numeric_features: Vec<String>,
    pub categorical_features: Vec<String>,
    pub contamination: f64,
    pub params: TrainParams,
    pub model_version: i64,
    pub actor: String,
}

/// Result of a completed training run.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub run_id: Uuid,
    pub model_id: Uuid,
    pub status: RunStatus,
}

/// Executes one training run end to end.
///
/// Opens the run record, runs the pipeline stages, and closes the run
/// with a terminal status. Any stage error marks the run `failed` with
/// the error's summary and is then propagated to the caller.
///
/// # Errors
///
/// Returns an error if any stage of the run fails.
pub async fn run(
    pool: &SqlitePool,
    store: &ArtifactStore,
    request: &TrainRequest,
) -> Result<TrainOutcome> {
    let run = TrainingRunRepository::start(
        pool,
        CreateTrainingRun {
            entity_id: request.entity_id,
            model_key: request.model_key.clone(),
            dataset_id: request.dataset_id,
        },
    )
    .await
    .context("Failed to open training run")?;

    info!(
        run_id = %run.id,
        entity_id = %request.entity_id,
        model_key = %request.model_key,
        "Started training run"
    );

    match execute(pool, store, request, &run).await {
        Ok(model_id) => {
            info!(run_id = %run.id, model_id = %model_id, "Training run succeeded");
            Ok(TrainOutcome {
                run_id: run.id,
                model_id,
                status: RunStatus::Success,
            })
        }
        Err(err) => {
            let summary = format!("{err:#}");
            // The original error always wins. If the terminal transition
            // itself fails (for example the run already reached `success`
            // before a later stage broke), log it and propagate the cause.
            if let Err(finish_err) =
                TrainingRunRepository::finish_failed(pool, run.id, &summary).await
            {
                error!(
                    run_id = %run.id,
                    error = %finish_err,
                    "Failed to mark training run as failed"
                );
            }
            Err(err)
        }
    }
}

/// The sequential pipeline stages of a training run. Fails fast; the
/// caller owns the terminal transition.
async fn execute(
    pool: &SqlitePool,
    store: &ArtifactStore,
    request: &TrainRequest,
    run: &TrainingRun,
) -> Result<Uuid> {
    let raw = store.get(&request.dataset_path).await?;
    let dataset = Dataset::from_csv_bytes(&raw)?;
    info!(rows = dataset.n_rows(), "Loaded training dataset");

    let (matrix, feature_spec) = feature_pipeline::fit(
        &dataset,
        &request.numeric_features,
        &request.categorical_features,
    )?;

    let output = anomaly_model::train(&matrix, request.contamination, &request.params)?;
    let anomaly_count = output
        .scores
        .iter()
        .filter(|&&s| is_anomalous(s, output.threshold))
        .count();
    let score_min = output.scores.iter().copied().fold(f64::INFINITY, f64::min);
    let score_max = output.scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    info!(
        rows = matrix.n_rows(),
        anomaly_count,
        threshold = output.threshold,
        "Trained anomaly scorer"
    );

    // Model artifact: one indivisible bundle of scorer state, fitted
    // feature spec, and the training-derived threshold.
    let bundle = ModelBundle {
        algorithm: ALGORITHM_NAME.to_string(),
        params: request.params,
        contamination: request.contamination,
        threshold: output.threshold,
        feature_spec: feature_spec.clone(),
        forest: output.forest,
    };
    let artifact_path = format!(
        "models/{}/{}/v{}/{}.model.json",
        request.entity_id, request.model_key, request.model_version, run.id
    );
    let stored = store
        .put(&artifact_path, Bytes::from(bundle.to_bytes()?))
        .await?;
    let artifact_doc = DocumentRepository::create(
        pool,
        CreateDocument {
            entity_id: request.entity_id,
            category: "model_artifact".to_string(),
            title: format!("{} v{}", request.model_key, request.model_version),
            container: "artifacts".to_string(),
            path: artifact_path,
            content_type: "application/json".to_string(),
            size_bytes: stored.size as i64,
            content_hash: stored.hash,
            uploaded_by: request.actor.clone(),
            linked_type: Some("training_run".to_string()),
        },
    )
    .await?;

    let rows = matrix.n_rows();
    let metrics = serde_json::json!({
        "rows": rows,
        "anomaly_count": anomaly_count,
        "anomaly_rate": anomaly_count as f64 / rows as f64,
        "threshold": output.threshold,
        "score_min": score_min,
        "score_max": score_max,
    });
    let metrics_path = format!(
        "models/{}/{}/v{}/{}.metrics.json",
        request.entity_id, request.model_key, request.model_version, run.id
    );
    let stored_metrics = store
        .put(&metrics_path, Bytes::from(serde_json::to_vec(&metrics)?))
        .await?;
    let metrics_doc = DocumentRepository::create(
        pool,
        CreateDocument {
            entity_id: request.entity_id,
            category: "model_metrics".to_string(),
            title: format!("{} v{} metrics", request.model_key, request.model_version),
            container: "artifacts".to_string(),
            path: metrics_path,
            content_type: "application/json".to_string(),
            size_bytes: stored_metrics.size as i64,
            content_hash: stored_metrics.hash,
            uploaded_by: request.actor.clone(),
            linked_type: Some("training_run".to_string()),
        },
    )
    .await?;

    let registration = ModelRepository::register(
        pool,
        CreateModel {
            entity_id: request.entity_id,
            model_key: request.model_key.clone(),
            algorithm: ALGORITHM_NAME.to_string(),
            version: request.model_version,
            training_dataset_id: request.dataset_id,
            artifact_document_id: artifact_doc.id,
            metrics_document_id: Some(metrics_doc.id),
            hyperparameters: serde_json::json!({
                "trees": request.params.trees,
                "sample_size": request.params.sample_size,
                "seed": request.params.seed,
                "contamination": request.contamination,
            }),
            feature_spec: serde_json::to_value(&feature_spec)?,
        },
    )
    .await?;
    if !registration.newly_created {
        warn!(
            model_id = %registration.model.id,
            model_key = %request.model_key,
            version = request.model_version,
            "Model version already registered; keeping the existing row"
        );
    }

    TrainingRunRepository::finish_success(pool, run.id, artifact_doc.id, Some(metrics_doc.id), None)
        .await?;

    AuditRepository::append(
        pool,
        AppendAuditEvent {
            entity_id: request.entity_id,
            actor: request.actor.clone(),
            action: "training_run.completed".to_string(),
            target_type: "model".to_string(),
            target_id: registration.model.id.to_string(),
            payload: serde_json::json!({
                "run_id": run.id,
                "model_id": registration.model.id,
                "model_key": request.model_key,
                "version": request.model_version,
                "dataset_id": request.dataset_id,
                "rows": rows,
                "anomaly_count": anomaly_count,
                "threshold": output.threshold,
            }),
        },
    )
    .await
    .context("Failed to append audit event")?;

    Ok(registration.model.id)
}
