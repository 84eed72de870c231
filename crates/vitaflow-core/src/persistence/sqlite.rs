//! SQLite-backed store implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::{EngineError, Result};

use super::{
    AdvanceUpdate, ContentAccessRecord, ExecutionEventRecord, ExecutionRecord, FlowStore,
    NewExecution, ProfileRecord, ProviderSettingsRecord, TemplateRecord,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

const EXECUTION_COLUMNS: &str = "id, flow_id, flow_name, patient_id, status, progress, \
     completed_steps, total_steps, cursor, started_at, completed_at, \
     next_step_available_at, error, created_at, updated_at";

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a SQLite store from a file path.
    ///
    /// Creates parent directories and the database file if needed, connects
    /// with sensible defaults, and runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let path_str = path.to_string_lossy();
        let url = format!("sqlite:{}?mode=rwc", path_str);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| EngineError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        Self::migrated(pool).await
    }

    /// Create an in-memory store for tests.
    ///
    /// Pinned to a single connection so the in-memory database outlives
    /// individual pool checkouts.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| EngineError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to open in-memory SQLite: {}", e),
            })?;

        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self> {
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| EngineError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;
        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl FlowStore for SqliteStore {
    async fn create_execution(&self, execution: &NewExecution) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO flow_executions
                (id, flow_id, flow_name, patient_id, status, progress,
                 completed_steps, total_steps, cursor, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'pending', 0, 0, ?, ?, ?, ?)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.flow_id)
        .bind(&execution.flow_name)
        .bind(&execution.patient_id)
        .bind(execution.total_steps)
        .bind(&execution.cursor)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        let record = sqlx::query_as::<_, ExecutionRecord>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM flow_executions WHERE id = ?"
        ))
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn apply_advance(&self, execution_id: &str, update: &AdvanceUpdate) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE flow_executions
            SET status = ?,
                progress = ?,
                completed_steps = ?,
                cursor = ?,
                completed_at = COALESCE(?, completed_at),
                updated_at = ?
            WHERE id = ? AND completed_steps < ?
            "#,
        )
        .bind(&update.status)
        .bind(update.progress)
        .bind(update.completed_steps)
        .bind(&update.cursor)
        .bind(update.completed_at)
        .bind(Utc::now())
        .bind(execution_id)
        .bind(update.completed_steps)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn save_cursor(&self, execution_id: &str, cursor: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE flow_executions
            SET cursor = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(cursor)
        .bind(Utc::now())
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_active(&self, execution_id: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE flow_executions
            SET status = 'active',
                started_at = COALESCE(started_at, ?),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_waiting(&self, execution_id: &str, until: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE flow_executions
            SET status = 'waiting',
                next_step_available_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(until)
        .bind(Utc::now())
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_completed(&self, execution_id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE flow_executions
            SET status = 'completed',
                progress = 100,
                completed_at = ?,
                next_step_available_at = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(at)
        .bind(Utc::now())
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, execution_id: &str, cursor: &str, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE flow_executions
            SET status = 'failed',
                cursor = ?,
                error = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(cursor)
        .bind(error)
        .bind(Utc::now())
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn due_waiting_executions(&self, limit: i64) -> Result<Vec<ExecutionRecord>> {
        let records = sqlx::query_as::<_, ExecutionRecord>(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM flow_executions
            WHERE status = 'waiting' AND next_step_available_at <= ?
            ORDER BY next_step_available_at ASC
            LIMIT ?
            "#
        ))
        .bind(Utc::now())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn wake_execution(&self, execution_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE flow_executions
            SET status = 'active',
                next_step_available_at = NULL,
                updated_at = ?
            WHERE id = ? AND status = 'waiting'
            "#,
        )
        .bind(Utc::now())
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_content_access(&self, access: &ContentAccessRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO content_access
                (id, access_token, execution_id, patient_id, files,
                 file_set_hash, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&access.id)
        .bind(&access.access_token)
        .bind(&access.execution_id)
        .bind(&access.patient_id)
        .bind(&access.files)
        .bind(&access.file_set_hash)
        .bind(access.expires_at)
        .bind(access.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_content_access(
        &self,
        execution_id: &str,
        file_set_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ContentAccessRecord>> {
        let record = sqlx::query_as::<_, ContentAccessRecord>(
            r#"
            SELECT id, access_token, execution_id, patient_id, files,
                   file_set_hash, expires_at, created_at
            FROM content_access
            WHERE execution_id = ? AND file_set_hash = ? AND expires_at > ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(execution_id)
        .bind(file_set_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_content_access_by_token(
        &self,
        token: &str,
    ) -> Result<Option<ContentAccessRecord>> {
        let record = sqlx::query_as::<_, ContentAccessRecord>(
            r#"
            SELECT id, access_token, execution_id, patient_id, files,
                   file_set_hash, expires_at, created_at
            FROM content_access
            WHERE access_token = ?
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_profile(&self, patient_id: &str) -> Result<Option<ProfileRecord>> {
        let record = sqlx::query_as::<_, ProfileRecord>(
            r#"
            SELECT patient_id, name, phone, clinic_id
            FROM profiles
            WHERE patient_id = ?
            "#,
        )
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn upsert_profile(&self, profile: &ProfileRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO profiles (patient_id, name, phone, clinic_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(patient_id) DO UPDATE SET
                name = excluded.name,
                phone = excluded.phone,
                clinic_id = excluded.clinic_id
            "#,
        )
        .bind(&profile.patient_id)
        .bind(&profile.name)
        .bind(&profile.phone)
        .bind(&profile.clinic_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_template(&self, name: &str) -> Result<Option<TemplateRecord>> {
        let record = sqlx::query_as::<_, TemplateRecord>(
            r#"
            SELECT name, is_active, is_official
            FROM whatsapp_templates
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn upsert_template(&self, template: &TemplateRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO whatsapp_templates (name, is_active, is_official)
            VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                is_active = excluded.is_active,
                is_official = excluded.is_official
            "#,
        )
        .bind(&template.name)
        .bind(template.is_active)
        .bind(template.is_official)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_provider_settings(
        &self,
        clinic_id: &str,
    ) -> Result<Option<ProviderSettingsRecord>> {
        let record = sqlx::query_as::<_, ProviderSettingsRecord>(
            r#"
            SELECT clinic_id, provider, access_token, phone_number_id,
                   base_url, session_name, api_key
            FROM clinic_provider_settings
            WHERE clinic_id = ?
            "#,
        )
        .bind(clinic_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn upsert_provider_settings(&self, settings: &ProviderSettingsRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO clinic_provider_settings
                (clinic_id, provider, access_token, phone_number_id,
                 base_url, session_name, api_key)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(clinic_id) DO UPDATE SET
                provider = excluded.provider,
                access_token = excluded.access_token,
                phone_number_id = excluded.phone_number_id,
                base_url = excluded.base_url,
                session_name = excluded.session_name,
                api_key = excluded.api_key
            "#,
        )
        .bind(&settings.clinic_id)
        .bind(&settings.provider)
        .bind(&settings.access_token)
        .bind(&settings.phone_number_id)
        .bind(&settings.base_url)
        .bind(&settings.session_name)
        .bind(&settings.api_key)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_event(
        &self,
        execution_id: &str,
        event_type: &str,
        payload: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_events (execution_id, event_type, payload, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(execution_id)
        .bind(event_type)
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_events(&self, execution_id: &str) -> Result<Vec<ExecutionEventRecord>> {
        let records = sqlx::query_as::<_, ExecutionEventRecord>(
            r#"
            SELECT id, execution_id, event_type, payload, created_at
            FROM execution_events
            WHERE execution_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
