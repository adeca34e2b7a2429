//! Inference runs: replay a registered model's frozen feature spec over
//! new data and persist per-record anomaly verdicts.

use anomaly_model::{ModelBundle, is_anomalous};
use anyhow::{Context, Result, bail};
use artifact_store::ArtifactStore;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use database::{
    AppendAuditEvent, AuditRepository, CreateDocument, CreateInferenceRun, DocumentRepository,
    InferenceRun, InferenceRunRepository, InsertEventScore, ModelRepository, RunStatus,
    ScoreRepository, UpsertPeriodicScore,
};
use feature_pipeline::{Dataset, FeatureMatrix};
use sqlx::SqlitePool;
use tracing::{error, info};
use uuid::Uuid;

/// Key column of periodic (time-bucketed aggregate) datasets.
const PERIOD_COLUMN: &str = "period";
/// Identifying columns of event-level datasets.
const EVENT_ID_COLUMN: &str = "event_id";
const OCCURRED_AT_COLUMN: &str = "occurred_at";
const AMOUNT_COLUMN: &str = "amount";
const CURRENCY_COLUMN: &str = "currency";

/// Shape of the dataset being scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DatasetKind {
    /// One row per recurring time bucket; scores are upserted.
    Periodic,
    /// One row per discrete occurrence; scores are appended, capped.
    Event,
}

/// Everything an inference invocation needs, assembled by the caller.
#[derive(Debug, Clone)]
pub struct InferRequest {
    pub entity_id: Uuid,
    pub model_id: Uuid,
    /// Artifact-store path of the dataset CSV to score.
    pub dataset_path: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub kind: DatasetKind,
    /// Most-anomalous-first cap on relational event rows; 0 = unlimited.
    pub event_cap: usize,
    pub actor: String,
}

/// Result of a completed inference run.
#[derive(Debug, Clone)]
pub struct InferOutcome {
    pub run_id: Uuid,
    pub anomaly_count: usize,
    /// Relational rows persisted; reported for the event kind only.
    pub db_rows_written: Option<usize>,
    pub status: RunStatus,
}

/// Executes one inference run end to end, mirroring the training run's
/// lifecycle: open, execute stages sequentially, close with a terminal
/// status, audit on success only.
///
/// # Errors
///
/// Returns an error if any stage of the run fails.
pub async fn run(
    pool: &SqlitePool,
    store: &ArtifactStore,
    request: &InferRequest,
) -> Result<InferOutcome> {
    let run = InferenceRunRepository::start(
        pool,
        CreateInferenceRun {
            entity_id: request.entity_id,
            model_id: request.model_id,
            input_period_start: request.period_start,
            input_period_end: request.period_end,
        },
    )
    .await
    .context("Failed to open inference run")?;

    info!(
        run_id = %run.id,
        entity_id = %request.entity_id,
        model_id = %request.model_id,
        "Started inference run"
    );

    match execute(pool, store, request, &run).await {
        Ok((anomaly_count, db_rows_written)) => {
            info!(run_id = %run.id, anomaly_count, "Inference run succeeded");
            Ok(InferOutcome {
                run_id: run.id,
                anomaly_count,
                db_rows_written,
                status: RunStatus::Success,
            })
        }
        Err(err) => {
            let summary = format!("{err:#}");
            // The original error always wins. If the terminal transition
            // itself fails (for example the run already reached `success`
            // before a later stage broke), log it and propagate the cause.
            if let Err(finish_err) =
                InferenceRunRepository::finish_failed(pool, run.id, &summary).await
            {
                error!(
                    run_id = %run.id,
                    error = %finish_err,
                    "Failed to mark inference run as failed"
                );
            }
            Err(err)
        }
    }
}

async fn execute(
    pool: &SqlitePool,
    store: &ArtifactStore,
    request: &InferRequest,
    run: &InferenceRun,
) -> Result<(usize, Option<usize>)> {
    let model = ModelRepository::find_by_id(pool, request.model_id)
        .await?
        .with_context(|| format!("Model {} not found in registry", request.model_id))?;
    if model.entity_id != request.entity_id {
        bail!("Model {} belongs to a different entity", model.id);
    }

    let artifact_doc = DocumentRepository::find_by_id(pool, model.artifact_document_id)
        .await?
        .with_context(|| format!("Artifact document for model {} not found", model.id))?;
    let bundle = ModelBundle::from_bytes(&store.get(&artifact_doc.path).await?)?;

    let raw = store.get(&request.dataset_path).await?;
    let dataset = Dataset::from_csv_bytes(&raw)?;
    match request.kind {
        DatasetKind::Periodic => dataset.require_columns(&[PERIOD_COLUMN])?,
        DatasetKind::Event => dataset.require_columns(&[
            EVENT_ID_COLUMN,
            OCCURRED_AT_COLUMN,
            AMOUNT_COLUMN,
            CURRENCY_COLUMN,
        ])?,
    }
    info!(rows = dataset.n_rows(), "Loaded inference dataset");

    // The spec frozen at training time, never one derived from this batch.
    let matrix = feature_pipeline::apply(&dataset, &bundle.feature_spec)?;
    let scores = bundle.forest.decision_scores(&matrix)?;

    // Likewise the threshold: an inference batch may have a different
    // anomaly rate than the training set by design.
    let threshold = bundle.threshold;
    let flags: Vec<bool> = scores.iter().map(|&s| is_anomalous(s, threshold)).collect();
    let anomaly_count = flags.iter().filter(|&&f| f).count();

    // The full scored dataset goes to the artifact store before any
    // relational cap is applied, so the cap never loses evidence.
    let scored_csv = dataset.to_scored_csv(&scores, &flags, threshold)?;
    let output_path = format!("scores/{}/{}.csv", request.entity_id, run.id);
    let stored = store.put(&output_path, Bytes::from(scored_csv)).await?;
    let output_doc = DocumentRepository::create(
        pool,
        CreateDocument {
            entity_id: request.entity_id,
            category: "scored_dataset".to_string(),
            title: format!("Scored dataset {} to {}", request.period_start, request.period_end),
            container: "artifacts".to_string(),
            path: output_path,
            content_type: "text/csv".to_string(),
            size_bytes: stored.size as i64,
            content_hash: stored.hash,
            uploaded_by: request.actor.clone(),
            linked_type: Some("inference_run".to_string()),
        },
    )
    .await?;

    let db_rows_written = match request.kind {
        DatasetKind::Periodic => {
            for row in 0..dataset.n_rows() {
                let period_key = dataset
                    .value(row, PERIOD_COLUMN)
                    .unwrap_or_default()
                    .to_string();
                ScoreRepository::upsert_periodic(
                    pool,
                    UpsertPeriodicScore {
                        entity_id: request.entity_id,
                        period_key,
                        model_id: model.id,
                        features: feature_snapshot(&matrix, row),
                        score: scores[row],
                        is_anomaly: flags[row],
                        threshold,
                        inference_run_id: run.id,
                    },
                )
                .await?;
            }
            None
        }
        DatasetKind::Event => {
            let selected = select_event_rows(&scores, &flags, request.event_cap);
            for &row in &selected {
                ScoreRepository::insert_event(
                    pool,
                    InsertEventScore {
                        entity_id: request.entity_id,
                        event_ids: serde_json::json!({
                            EVENT_ID_COLUMN: dataset.value(row, EVENT_ID_COLUMN).unwrap_or_default(),
                        }),
                        occurred_at: dataset
                            .value(row, OCCURRED_AT_COLUMN)
                            .and_then(parse_timestamp),
                        amount: dataset
                            .value(row, AMOUNT_COLUMN)
                            .and_then(|v| v.trim().parse().ok()),
                        currency: dataset
                            .value(row, CURRENCY_COLUMN)
                            .filter(|v| !v.is_empty())
                            .map(str::to_string),
                        features: feature_snapshot(&matrix, row),
                        score: scores[row],
                        is_anomaly: flags[row],
                        threshold,
                        model_id: model.id,
                        inference_run_id: run.id,
                    },
                )
                .await?;
            }
            Some(selected.len())
        }
    };

    let rows = dataset.n_rows();
    let score_min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let score_max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut summary = serde_json::json!({
        "rows": rows,
        "anomaly_count": anomaly_count,
        "anomaly_rate": if rows > 0 { anomaly_count as f64 / rows as f64 } else { 0.0 },
        "threshold": threshold,
        "score_min": score_min,
        "score_max": score_max,
    });
    if let Some(written) = db_rows_written {
        summary["db_rows_written"] = serde_json::json!(written);
    }

    InferenceRunRepository::finish_success(pool, run.id, output_doc.id, summary).await?;

    AuditRepository::append(
        pool,
        AppendAuditEvent {
            entity_id: request.entity_id,
            actor: request.actor.clone(),
            action: "inference_run.completed".to_string(),
            target_type: "inference_run".to_string(),
            target_id: run.id.to_string(),
            payload: serde_json::json!({
                "run_id": run.id,
                "model_id": model.id,
                "period_start": request.period_start,
                "period_end": request.period_end,
                "rows": rows,
                "anomaly_count": anomaly_count,
                "output_document_id": output_doc.id,
            }),
        },
    )
    .await
    .context("Failed to append audit event")?;

    Ok((anomaly_count, db_rows_written))
}

/// Rows persisted relationally for an event run: flagged rows only,
/// most anomalous (lowest score) first, truncated to the cap.
fn select_event_rows(scores: &[f64], flags: &[bool], cap: usize) -> Vec<usize> {
    let mut flagged: Vec<usize> = (0..scores.len()).filter(|&i| flags[i]).collect();
    flagged.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
    if cap > 0 && flagged.len() > cap {
        flagged.truncate(cap);
    }
    flagged
}

/// Scaled feature values for one row, keyed by feature column.
fn feature_snapshot(matrix: &FeatureMatrix, row: usize) -> serde_json::Value {
    let object: serde_json::Map<String, serde_json::Value> = matrix
        .columns
        .iter()
        .zip(&matrix.rows[row])
        .map(|(column, value)| (column.clone(), serde_json::json!(value)))
        .collect();
    serde_json::Value::Object(object)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
