//! Database model types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status shared by training and inference runs.
///
/// `Started` is the only initial state; `Success` and `Failed` are
/// terminal and reached exactly once. A crash between start and finish
/// leaves the row in `Started` for an external monitor to reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Started,
    Success,
    Failed,
}

/// Catalogue status of a registered model.
///
/// New models are always created in `Draft`; promotion is an external
/// operator workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Draft,
    Active,
    Archived,
}

/// Provenance record for one model-training invocation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TrainingRun {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub model_key: String,
    pub dataset_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub artifact_document_id: Option<Uuid>,
    pub metrics_document_id: Option<Uuid>,
    pub log_document_id: Option<Uuid>,
    pub error: Option<String>,
}

/// Versioned catalogue entry for a trained scorer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Model {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub model_key: String,
    pub algorithm: String,
    pub version: i64,
    pub status: ModelStatus,
    pub training_dataset_id: Uuid,
    pub artifact_document_id: Uuid,
    pub metrics_document_id: Option<Uuid>,
    pub hyperparameters: serde_json::Value,
    pub feature_spec: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Provenance record for one scoring invocation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InferenceRun {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub model_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub input_period_start: NaiveDate,
    pub input_period_end: NaiveDate,
    pub output_document_id: Option<Uuid>,
    pub summary: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Anomaly verdict for one time-bucketed aggregate row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PeriodicScore {
    pub entity_id: Uuid,
    pub period_key: String,
    pub model_id: Uuid,
    pub features: serde_json::Value,
    pub score: f64,
    pub is_anomaly: bool,
    pub threshold: f64,
    pub inference_run_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Anomaly verdict for one discrete event.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventScore {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub event_ids: serde_json::Value,
    pub occurred_at: Option<DateTime<Utc>>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub features: serde_json::Value,
    pub score: f64,
    pub is_anomaly: bool,
    pub threshold: f64,
    pub model_id: Uuid,
    pub inference_run_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Metadata for one immutable blob held in the artifact store.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Document {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub category: String,
    pub title: String,
    pub container: String,
    pub path: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub uploaded_by: String,
    pub linked_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One append-only, hash-carrying ledger entry.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditEvent {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub actor: String,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub payload: serde_json::Value,
    pub payload_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Input for opening a training run.
#[derive(Debug, Clone)]
pub struct CreateTrainingRun {
    pub entity_id: Uuid,
    pub model_key: String,
    pub dataset_id: Uuid,
}

/// Input for opening an inference run.
#[derive(Debug, Clone)]
pub struct CreateInferenceRun {
    pub entity_id: Uuid,
    pub model_id: Uuid,
    pub input_period_start: NaiveDate,
    pub input_period_end: NaiveDate,
}

/// Input for registering a trained model.
#[derive(Debug, Clone)]
pub struct CreateModel {
    pub entity_id: Uuid,
    pub model_key: String,
    pub algorithm: String,
    pub version: i64,
    pub training_dataset_id: Uuid,
    pub artifact_document_id: Uuid,
    pub metrics_document_id: Option<Uuid>,
    pub hyperparameters: serde_json::Value,
    pub feature_spec: serde_json::Value,
}

/// Outcome of a registration attempt.
///
/// Under the (entity, model key, version) uniqueness invariant a
/// conflicting insert is a no-op; the surviving row is returned and
/// `newly_created` tells the caller which way it went.
#[derive(Debug, Clone)]
pub struct ModelRegistration {
    pub model: Model,
    pub newly_created: bool,
}

/// Input for recording one stored artifact.
#[derive(Debug, Clone)]
pub struct CreateDocument {
    pub entity_id: Uuid,
    pub category: String,
    pub title: String,
    pub container: String,
    pub path: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub uploaded_by: String,
    pub linked_type: Option<String>,
}

/// Input for upserting one periodic score.
#[derive(Debug, Clone)]
pub struct UpsertPeriodicScore {
    pub entity_id: Uuid,
    pub period_key: String,
    pub model_id: Uuid,
    pub features: serde_json::Value,
    pub score: f64,
    pub is_anomaly: bool,
    pub threshold: f64,
    pub inference_run_id: Uuid,
}

/// Input for appending one event score.
#[derive(Debug, Clone)]
pub struct InsertEventScore {
    pub entity_id: Uuid,
    pub event_ids: serde_json::Value,
    pub occurred_at: Option<DateTime<Utc>>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub features: serde_json::Value,
    pub score: f64,
    pub is_anomaly: bool,
    pub threshold: f64,
    pub model_id: Uuid,
    pub inference_run_id: Uuid,
}

/// Input for appending one audit ledger entry.
#[derive(Debug, Clone)]
pub struct AppendAuditEvent {
    pub entity_id: Uuid,
    pub actor: String,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub payload: serde_json::Value,
}
