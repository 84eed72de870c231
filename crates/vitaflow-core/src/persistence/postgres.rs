//! PostgreSQL-backed store implementation.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::{EngineError, Result};

use super::{
    AdvanceUpdate, ContentAccessRecord, ExecutionEventRecord, ExecutionRecord, FlowStore,
    NewExecution, ProfileRecord, ProviderSettingsRecord, TemplateRecord,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgresql");

const EXECUTION_COLUMNS: &str = "id, flow_id, flow_name, patient_id, status, progress, \
     completed_steps, total_steps, cursor, started_at, completed_at, \
     next_step_available_at, error, created_at, updated_at";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a store from an existing pool after bringing its schema up to
    /// date. Already-applied migrations are skipped.
    pub async fn migrated(pool: PgPool) -> Result<Self> {
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
impl FlowStore for PostgresStore {
    async fn create_execution(&self, execution: &NewExecution) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO flow_executions
                (id, flow_id, flow_name, patient_id, status, progress,
                 completed_steps, total_steps, cursor, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'pending', 0, 0, $5, $6, $7, $8)
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
            "SELECT {EXECUTION_COLUMNS} FROM flow_executions WHERE id = $1"
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
            SET status = $1,
                progress = $2,
                completed_steps = $3,
                cursor = $4,
                completed_at = COALESCE($5, completed_at),
                updated_at = $6
            WHERE id = $7 AND completed_steps < $3
            "#,
        )
        .bind(&update.status)
        .bind(update.progress)
        .bind(update.completed_steps)
        .bind(&update.cursor)
        .bind(update.completed_at)
        .bind(Utc::now())
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn save_cursor(&self, execution_id: &str, cursor: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE flow_executions
            SET cursor = $1, updated_at = $2
            WHERE id = $3
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
                started_at = COALESCE(started_at, $1),
                updated_at = $2
            WHERE id = $3
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
                next_step_available_at = $1,
                updated_at = $2
            WHERE id = $3
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
                completed_at = $1,
                next_step_available_at = NULL,
                updated_at = $2
            WHERE id = $3
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
                cursor = $1,
                error = $2,
                updated_at = $3
            WHERE id = $4
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
            WHERE status = 'waiting' AND next_step_available_at <= $1
            ORDER BY next_step_available_at ASC
            LIMIT $2
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
                updated_at = $1
            WHERE id = $2 AND status = 'waiting'
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
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
            WHERE execution_id = $1 AND file_set_hash = $2 AND expires_at > $3
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
            WHERE access_token = $1
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
            WHERE patient_id = $1
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
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (patient_id) DO UPDATE SET
                name = EXCLUDED.name,
                phone = EXCLUDED.phone,
                clinic_id = EXCLUDED.clinic_id
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
            WHERE name = $1
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
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE SET
                is_active = EXCLUDED.is_active,
                is_official = EXCLUDED.is_official
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
            WHERE clinic_id = $1
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
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (clinic_id) DO UPDATE SET
                provider = EXCLUDED.provider,
                access_token = EXCLUDED.access_token,
                phone_number_id = EXCLUDED.phone_number_id,
                base_url = EXCLUDED.base_url,
                session_name = EXCLUDED.session_name,
                api_key = EXCLUDED.api_key
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
            VALUES ($1, $2, $3, $4)
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
            WHERE execution_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}
