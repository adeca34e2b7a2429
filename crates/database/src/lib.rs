//! Relational store for runs, models, documents, scores, and the audit
//! ledger, backed by SQLite via sqlx.

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

mod models;
mod repositories;

pub use models::{
    AppendAuditEvent, AuditEvent, CreateDocument, CreateInferenceRun, CreateModel,
    CreateTrainingRun, Document, EventScore, InferenceRun, InsertEventScore, Model,
    ModelRegistration, ModelStatus, PeriodicScore, RunStatus, TrainingRun, UpsertPeriodicScore,
};
pub use repositories::{
    AuditRepository, DocumentRepository, InferenceRunRepository, ModelRepository, ScoreRepository,
    TrainingRunRepository, payload_hash,
};

/// Creates a connection pool to the SQLite database, creating the file
/// if it does not exist yet.
///
/// A single connection is used: SQLite serializes writers anyway, and
/// it keeps `sqlite::memory:` databases coherent across calls.
///
/// # Errors
///
/// Returns an error if the connection to the database fails.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}

/// Runs all pending migrations.
///
/// # Errors
///
/// Returns an error if running migrations fails.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;

    async fn test_pool() -> SqlitePool {
        let pool = create_pool("sqlite::memory:")
            .await
            .expect("in-memory pool should connect");
        run_migrations(&pool).await.expect("migrations should run");
        pool
    }

    fn sample_model(entity_id: Uuid, version: i64, seed: u64) -> CreateModel {
        CreateModel {
            entity_id,
            model_key: "activity_anomaly".to_string(),
            algorithm: "isolation_forest".to_string(),
            version,
            training_dataset_id: Uuid::new_v4(),
            artifact_document_id: Uuid::new_v4(),
            metrics_document_id: None,
            hyperparameters: json!({ "trees": 200, "seed": seed }),
            feature_spec: json!({ "numeric_features": ["amount"] }),
        }
    }

    #[tokio::test]
    async fn training_run_reaches_terminal_status_exactly_once() {
        let pool = test_pool().await;

        let run = TrainingRunRepository::start(
            &pool,
            CreateTrainingRun {
                entity_id: Uuid::new_v4(),
                model_key: "activity_anomaly".to_string(),
                dataset_id: Uuid::new_v4(),
            },
        )
        .await
        .expect("start should succeed");

        assert_eq!(run.status, RunStatus::Started);
        assert!(run.finished_at.is_none());

        let artifact_doc = Uuid::new_v4();
        TrainingRunRepository::finish_success(&pool, run.id, artifact_doc, None, None)
            .await
            .expect("first finish should succeed");

        let stored = TrainingRunRepository::find_by_id(&pool, run.id)
            .await
            .expect("lookup should succeed")
            .expect("run should exist");
        assert_eq!(stored.status, RunStatus::Success);
        assert_eq!(stored.artifact_document_id, Some(artifact_doc));
        assert!(stored.finished_at.is_some());

        // A terminal run never transitions again.
        let second = TrainingRunRepository::finish_failed(&pool, run.id, "late failure").await;
        assert!(matches!(second, Err(sqlx::Error::RowNotFound)));
    }

    #[tokio::test]
    async fn failed_training_run_keeps_error_text() {
        let pool = test_pool().await;

        let run = TrainingRunRepository::start(
            &pool,
            CreateTrainingRun {
                entity_id: Uuid::new_v4(),
                model_key: "activity_anomaly".to_string(),
                dataset_id: Uuid::new_v4(),
            },
        )
        .await
        .expect("start should succeed");

        TrainingRunRepository::finish_failed(&pool, run.id, "dataset missing column amount")
            .await
            .expect("finish_failed should succeed");

        let stored = TrainingRunRepository::find_by_id(&pool, run.id)
            .await
            .expect("lookup should succeed")
            .expect("run should exist");
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(
            stored.error.as_deref(),
            Some("dataset missing column amount")
        );
    }

    #[tokio::test]
    async fn model_registration_is_idempotent() {
        let pool = test_pool().await;
        let entity_id = Uuid::new_v4();

        let first = ModelRepository::register(&pool, sample_model(entity_id, 1, 42))
            .await
            .expect("first registration should succeed");
        assert!(first.newly_created);
        assert_eq!(first.model.status, ModelStatus::Draft);

        // Same triple, different hyperparameters: silent no-op, first row wins.
        let second = ModelRepository::register(&pool, sample_model(entity_id, 1, 99))
            .await
            .expect("second registration should succeed");
        assert!(!second.newly_created);
        assert_eq!(second.model.id, first.model.id);
        assert_eq!(second.model.hyperparameters["seed"], json!(42));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM models")
            .fetch_one(&pool)
            .await
            .expect("count should succeed");
        assert_eq!(count, 1);

        // A different version is a distinct model.
        let v2 = ModelRepository::register(&pool, sample_model(entity_id, 2, 42))
            .await
            .expect("v2 registration should succeed");
        assert!(v2.newly_created);
    }

    #[tokio::test]
    async fn find_latest_returns_highest_version() {
        let pool = test_pool().await;
        let entity_id = Uuid::new_v4();

        ModelRepository::register(&pool, sample_model(entity_id, 1, 42))
            .await
            .expect("v1 registration should succeed");
        let v3 = ModelRepository::register(&pool, sample_model(entity_id, 3, 42))
            .await
            .expect("v3 registration should succeed");

        let latest = ModelRepository::find_latest(&pool, entity_id, "activity_anomaly")
            .await
            .expect("lookup should succeed")
            .expect("model should exist");
        assert_eq!(latest.id, v3.model.id);
        assert_eq!(latest.version, 3);
    }

    #[tokio::test]
    async fn periodic_rescore_overwrites_prior_row() {
        let pool = test_pool().await;
        let entity_id = Uuid::new_v4();
        let model_id = Uuid::new_v4();

        let mut input = UpsertPeriodicScore {
            entity_id,
            period_key: "2026-03-14".to_string(),
            model_id,
            features: json!({ "amount": 1.2 }),
            score: 0.31,
            is_anomaly: false,
            threshold: 0.05,
            inference_run_id: Uuid::new_v4(),
        };
        ScoreRepository::upsert_periodic(&pool, input.clone())
            .await
            .expect("first upsert should succeed");

        input.score = -0.12;
        input.is_anomaly = true;
        input.inference_run_id = Uuid::new_v4();
        ScoreRepository::upsert_periodic(&pool, input.clone())
            .await
            .expect("second upsert should succeed");

        let rows = ScoreRepository::list_periodic(&pool, entity_id, model_id)
            .await
            .expect("list should succeed");
        assert_eq!(rows.len(), 1);
        assert!((rows[0].score - (-0.12)).abs() < f64::EPSILON);
        assert!(rows[0].is_anomaly);
        assert_eq!(rows[0].inference_run_id, input.inference_run_id);
    }

    #[tokio::test]
    async fn event_scores_append_across_runs() {
        let pool = test_pool().await;
        let entity_id = Uuid::new_v4();
        let model_id = Uuid::new_v4();
        let run_id = Uuid::new_v4();

        for score in [0.2, -0.1] {
            ScoreRepository::insert_event(
                &pool,
                InsertEventScore {
                    entity_id,
                    event_ids: json!({ "event_id": "txn-001" }),
                    occurred_at: None,
                    amount: Some(42.0),
                    currency: Some("usd".to_string()),
                    features: json!({ "amount": 0.4 }),
                    score,
                    is_anomaly: score < 0.0,
                    threshold: 0.0,
                    model_id,
                    inference_run_id: run_id,
                },
            )
            .await
            .expect("insert should succeed");
        }

        let rows = ScoreRepository::list_events_for_run(&pool, run_id)
            .await
            .expect("list should succeed");
        assert_eq!(rows.len(), 2);
        // Most anomalous first.
        assert!(rows[0].score < rows[1].score);
    }

    #[tokio::test]
    async fn audit_append_records_stable_payload_hash() {
        let pool = test_pool().await;
        let entity_id = Uuid::new_v4();

        let payload = json!({
            "run_id": "r-1",
            "model_id": "m-1",
            "anomaly_count": 7,
        });
        AuditRepository::append(
            &pool,
            AppendAuditEvent {
                entity_id,
                actor: "system".to_string(),
                action: "training_run.completed".to_string(),
                target_type: "model".to_string(),
                target_id: "m-1".to_string(),
                payload: payload.clone(),
            },
        )
        .await
        .expect("append should succeed");

        let events = AuditRepository::list_for_entity(&pool, entity_id)
            .await
            .expect("list should succeed");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload, payload);
        assert_eq!(events[0].payload_hash, payload_hash(&payload));
        // Re-serialization of the stored payload yields the same digest.
        assert_eq!(events[0].payload_hash, payload_hash(&events[0].payload));
    }
}
