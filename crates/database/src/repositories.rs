//! Repository functions for database operations.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{
    AppendAuditEvent, AuditEvent, CreateDocument, CreateInferenceRun, CreateModel,
    CreateTrainingRun, Document, EventScore, InferenceRun, InsertEventScore, Model,
    ModelRegistration, ModelStatus, PeriodicScore, RunStatus, TrainingRun, UpsertPeriodicScore,
};

/// Repository for training run lifecycle operations.
pub struct TrainingRunRepository;

impl TrainingRunRepository {
    /// Opens a new run in `started` status. One durable write.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn start(pool: &SqlitePool, input: CreateTrainingRun) -> Result<TrainingRun, sqlx::Error> {
        let id = Uuid::new_v4();

        sqlx::query_as::<_, TrainingRun>(
            r"
            INSERT INTO training_runs (id, entity_id, model_key, dataset_id, status, started_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            ",
        )
        .bind(id)
        .bind(input.entity_id)
        .bind(&input.model_key)
        .bind(input.dataset_id)
        .bind(RunStatus::Started)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    /// Moves a started run to `success`, recording its result documents.
    ///
    /// # Errors
    ///
    /// Returns `RowNotFound` if the run does not exist or has already
    /// reached a terminal status; the `started -> terminal` transition
    /// happens exactly once.
    pub async fn finish_success(
        pool: &SqlitePool,
        id: Uuid,
        artifact_document_id: Uuid,
        metrics_document_id: Option<Uuid>,
        log_document_id: Option<Uuid>,
    ) -> Result<(), sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE training_runs
            SET status = $2,
                finished_at = $3,
                artifact_document_id = $4,
                metrics_document_id = $5,
                log_document_id = $6
            WHERE id = $1 AND status = $7
            ",
        )
        .bind(id)
        .bind(RunStatus::Success)
        .bind(Utc::now())
        .bind(artifact_document_id)
        .bind(metrics_document_id)
        .bind(log_document_id)
        .bind(RunStatus::Started)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    /// Moves a started run to `failed`, recording the error summary.
    ///
    /// # Errors
    ///
    /// Returns `RowNotFound` if the run does not exist or has already
    /// reached a terminal status.
    pub async fn finish_failed(pool: &SqlitePool, id: Uuid, error: &str) -> Result<(), sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE training_runs
            SET status = $2, finished_at = $3, error = $4
            WHERE id = $1 AND status = $5
            ",
        )
        .bind(id)
        .bind(RunStatus::Failed)
        .bind(Utc::now())
        .bind(error)
        .bind(RunStatus::Started)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    /// Finds a run by its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<TrainingRun>, sqlx::Error> {
        sqlx::query_as::<_, TrainingRun>("SELECT * FROM training_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Lists runs for one entity, newest first. Lets an external
    /// monitor find runs stuck in `started`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn list_for_entity(
        pool: &SqlitePool,
        entity_id: Uuid,
    ) -> Result<Vec<TrainingRun>, sqlx::Error> {
        sqlx::query_as::<_, TrainingRun>(
            "SELECT * FROM training_runs WHERE entity_id = $1 ORDER BY started_at DESC",
        )
        .bind(entity_id)
        .fetch_all(pool)
        .await
    }
}

/// Repository for inference run lifecycle operations.
pub struct InferenceRunRepository;

impl InferenceRunRepository {
    /// Opens a new run in `started` status. One durable write.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn start(
        pool: &SqlitePool,
        input: CreateInferenceRun,
    ) -> Result<InferenceRun, sqlx::Error> {
        let id = Uuid::new_v4();

        sqlx::query_as::<_, InferenceRun>(
            r"
            INSERT INTO inference_runs
                (id, entity_id, model_id, status, started_at, input_period_start, input_period_end)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            ",
        )
        .bind(id)
        .bind(input.entity_id)
        .bind(input.model_id)
        .bind(RunStatus::Started)
        .bind(Utc::now())
        .bind(input.input_period_start)
        .bind(input.input_period_end)
        .fetch_one(pool)
        .await
    }

    /// Moves a started run to `success` with its output document and summary.
    ///
    /// # Errors
    ///
    /// Returns `RowNotFound` if the run does not exist or has already
    /// reached a terminal status.
    pub async fn finish_success(
        pool: &SqlitePool,
        id: Uuid,
        output_document_id: Uuid,
        summary: serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE inference_runs
            SET status = $2, finished_at = $3, output_document_id = $4, summary = $5
            WHERE id = $1 AND status = $6
            ",
        )
        .bind(id)
        .bind(RunStatus::Success)
        .bind(Utc::now())
        .bind(output_document_id)
        .bind(summary)
        .bind(RunStatus::Started)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    /// Moves a started run to `failed`, recording the error summary.
    ///
    /// # Errors
    ///
    /// Returns `RowNotFound` if the run does not exist or has already
    /// reached a terminal status.
    pub async fn finish_failed(pool: &SqlitePool, id: Uuid, error: &str) -> Result<(), sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE inference_runs
            SET status = $2, finished_at = $3, error = $4
            WHERE id = $1 AND status = $5
            ",
        )
        .bind(id)
        .bind(RunStatus::Failed)
        .bind(Utc::now())
        .bind(error)
        .bind(RunStatus::Started)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    /// Finds a run by its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn find_by_id(
        pool: &SqlitePool,
        id: Uuid,
    ) -> Result<Option<InferenceRun>, sqlx::Error> {
        sqlx::query_as::<_, InferenceRun>("SELECT * FROM inference_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Lists runs for one entity, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn list_for_entity(
        pool: &SqlitePool,
        entity_id: Uuid,
    ) -> Result<Vec<InferenceRun>, sqlx::Error> {
        sqlx::query_as::<_, InferenceRun>(
            "SELECT * FROM inference_runs WHERE entity_id = $1 ORDER BY started_at DESC",
        )
        .bind(entity_id)
        .fetch_all(pool)
        .await
    }
}

/// Repository for the versioned model catalogue.
pub struct ModelRepository;

impl ModelRepository {
    /// Registers a trained model in `draft` status.
    ///
    /// Idempotent under the (entity, model key, version) uniqueness
    /// invariant: a conflicting insert is dropped and the surviving row
    /// is returned with `newly_created = false`, so re-running a
    /// training job after a partial failure never produces a duplicate.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn register(
        pool: &SqlitePool,
        input: CreateModel,
    ) -> Result<ModelRegistration, sqlx::Error> {
        let id = Uuid::new_v4();

        let result = sqlx::query(
            r"
            INSERT INTO models
                (id, entity_id, model_key, algorithm, version, status, training_dataset_id,
                 artifact_document_id, metrics_document_id, hyperparameters, feature_spec,
                 created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (entity_id, model_key, version) DO NOTHING
            ",
        )
        .bind(id)
        .bind(input.entity_id)
        .bind(&input.model_key)
        .bind(&input.algorithm)
        .bind(input.version)
        .bind(ModelStatus::Draft)
        .bind(input.training_dataset_id)
        .bind(input.artifact_document_id)
        .bind(input.metrics_document_id)
        .bind(&input.hyperparameters)
        .bind(&input.feature_spec)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        let newly_created = result.rows_affected() > 0;

        let model = Self::find_by_key_version(pool, input.entity_id, &input.model_key, input.version)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;

        Ok(ModelRegistration {
            model,
            newly_created,
        })
    }

    /// Finds a model by its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Model>, sqlx::Error> {
        sqlx::query_as::<_, Model>("SELECT * FROM models WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Finds a model by its logical key and version.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn find_by_key_version(
        pool: &SqlitePool,
        entity_id: Uuid,
        model_key: &str,
        version: i64,
    ) -> Result<Option<Model>, sqlx::Error> {
        sqlx::query_as::<_, Model>(
            "SELECT * FROM models WHERE entity_id = $1 AND model_key = $2 AND version = $3",
        )
        .bind(entity_id)
        .bind(model_key)
        .bind(version)
        .fetch_optional(pool)
        .await
    }

    /// Gets the latest version of a model by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn find_latest(
        pool: &SqlitePool,
        entity_id: Uuid,
        model_key: &str,
    ) -> Result<Option<Model>, sqlx::Error> {
        sqlx::query_as::<_, Model>(
            r"
            SELECT * FROM models
            WHERE entity_id = $1 AND model_key = $2
            ORDER BY version DESC
            LIMIT 1
            ",
        )
        .bind(entity_id)
        .bind(model_key)
        .fetch_optional(pool)
        .await
    }
}

/// Repository for the document ledger.
pub struct DocumentRepository;

impl DocumentRepository {
    /// Records metadata for one artifact placed in the artifact store.
    /// Documents are immutable once created.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn create(pool: &SqlitePool, input: CreateDocument) -> Result<Document, sqlx::Error> {
        let id = Uuid::new_v4();

        sqlx::query_as::<_, Document>(
            r"
            INSERT INTO documents
                (id, entity_id, category, title, container, path, content_type, size_bytes,
                 content_hash, uploaded_by, linked_type, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            ",
        )
        .bind(id)
        .bind(input.entity_id)
        .bind(&input.category)
        .bind(&input.title)
        .bind(&input.container)
        .bind(&input.path)
        .bind(&input.content_type)
        .bind(input.size_bytes)
        .bind(&input.content_hash)
        .bind(&input.uploaded_by)
        .bind(&input.linked_type)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    /// Finds a document by its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Document>, sqlx::Error> {
        sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}

/// Repository for per-record anomaly verdicts.
pub struct ScoreRepository;

impl ScoreRepository {
    /// Upserts one periodic score keyed by (entity, period key, model).
    /// Rescoring the same period with the same model overwrites the
    /// prior row rather than duplicating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn upsert_periodic(
        pool: &SqlitePool,
        input: UpsertPeriodicScore,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            INSERT INTO periodic_scores
                (entity_id, period_key, model_id, features, score, is_anomaly, threshold,
                 inference_run_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (entity_id, period_key, model_id) DO UPDATE SET
                features = excluded.features,
                score = excluded.score,
                is_anomaly = excluded.is_anomaly,
                threshold = excluded.threshold,
                inference_run_id = excluded.inference_run_id,
                created_at = excluded.created_at
            ",
        )
        .bind(input.entity_id)
        .bind(&input.period_key)
        .bind(input.model_id)
        .bind(&input.features)
        .bind(input.score)
        .bind(input.is_anomaly)
        .bind(input.threshold)
        .bind(input.inference_run_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Appends one event score. No dedup key: an event may legitimately
    /// be rescored by a newer model.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn insert_event(
        pool: &SqlitePool,
        input: InsertEventScore,
    ) -> Result<(), sqlx::Error> {
        let id = Uuid::new_v4();

        sqlx::query(
            r"
            INSERT INTO event_scores
                (id, entity_id, event_ids, occurred_at, amount, currency, features, score,
                 is_anomaly, threshold, model_id, inference_run_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ",
        )
        .bind(id)
        .bind(input.entity_id)
        .bind(&input.event_ids)
        .bind(input.occurred_at)
        .bind(input.amount)
        .bind(&input.currency)
        .bind(&input.features)
        .bind(input.score)
        .bind(input.is_anomaly)
        .bind(input.threshold)
        .bind(input.model_id)
        .bind(input.inference_run_id)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Lists periodic scores for one entity and model, ordered by period.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn list_periodic(
        pool: &SqlitePool,
        entity_id: Uuid,
        model_id: Uuid,
    ) -> Result<Vec<PeriodicScore>, sqlx::Error> {
        sqlx::query_as::<_, PeriodicScore>(
            r"
            SELECT * FROM periodic_scores
            WHERE entity_id = $1 AND model_id = $2
            ORDER BY period_key
            ",
        )
        .bind(entity_id)
        .bind(model_id)
        .fetch_all(pool)
        .await
    }

    /// Lists event scores written by one inference run, most anomalous first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn list_events_for_run(
        pool: &SqlitePool,
        inference_run_id: Uuid,
    ) -> Result<Vec<EventScore>, sqlx::Error> {
        sqlx::query_as::<_, EventScore>(
            r"
            SELECT * FROM event_scores
            WHERE inference_run_id = $1
            ORDER BY score
            ",
        )
        .bind(inference_run_id)
        .fetch_all(pool)
        .await
    }
}

/// Repository for the append-only audit ledger.
///
/// No update or delete operation is exposed here at all.
pub struct AuditRepository;

impl AuditRepository {
    /// Appends one ledger entry, hashing the serialized payload before
    /// insertion so a downstream verifier can detect tampering without
    /// re-deriving the payload from the row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn append(pool: &SqlitePool, input: AppendAuditEvent) -> Result<(), sqlx::Error> {
        let id = Uuid::new_v4();
        let payload_hash = payload_hash(&input.payload);

        sqlx::query(
            r"
            INSERT INTO audit_events
                (id, entity_id, actor, action, target_type, target_id, payload, payload_hash,
                 created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(id)
        .bind(input.entity_id)
        .bind(&input.actor)
        .bind(&input.action)
        .bind(&input.target_type)
        .bind(&input.target_id)
        .bind(&input.payload)
        .bind(payload_hash)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Lists ledger entries for one entity, ordered by creation time.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn list_for_entity(
        pool: &SqlitePool,
        entity_id: Uuid,
    ) -> Result<Vec<AuditEvent>, sqlx::Error> {
        sqlx::query_as::<_, AuditEvent>(
            "SELECT * FROM audit_events WHERE entity_id = $1 ORDER BY created_at, id",
        )
        .bind(entity_id)
        .fetch_all(pool)
        .await
    }
}

/// SHA-256 hex digest of a payload's canonical JSON serialization.
///
/// `serde_json` keeps object keys sorted, so the digest is stable
/// across re-serialization of the same payload.
#[must_use]
pub fn payload_hash(payload: &serde_json::Value) -> String {
    let serialized = payload.to_string();
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
