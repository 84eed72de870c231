//! Persistence interfaces and backends for vitaflow-core.
//!
//! This module defines the storage abstraction and backend implementations.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use chrono::{DateTime, Utc};

use crate::error::{EngineError, Result};
use crate::model::{ExecutionCursor, ExecutionSnapshot, ExecutionStatus, FileRef};

/// Flow execution record from the persistence layer.
///
/// `cursor` is one JSON column; [`ExecutionRecord::snapshot`] validates it at
/// the storage boundary.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExecutionRecord {
    /// Unique identifier for the execution.
    pub id: String,
    /// Flow definition this execution was created from.
    pub flow_id: String,
    /// Flow name captured at assignment time.
    pub flow_name: String,
    /// Patient the flow was assigned to.
    pub patient_id: String,
    /// Current status (pending, active, waiting, completed, failed).
    pub status: String,
    /// Progress percentage in [0, 100].
    pub progress: i32,
    /// Completed step count.
    pub completed_steps: i32,
    /// Total step count.
    pub total_steps: i32,
    /// Step cursor serialized as JSON.
    pub cursor: String,
    /// When the execution started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the next step becomes available after a delay.
    pub next_step_available_at: Option<DateTime<Utc>>,
    /// Failure message when status is failed.
    pub error: Option<String>,
    /// When the execution was created.
    pub created_at: DateTime<Utc>,
    /// When the execution was last updated.
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// Parse the stored row into a typed snapshot.
    pub fn snapshot(&self) -> Result<ExecutionSnapshot> {
        let status =
            ExecutionStatus::parse(&self.status).ok_or_else(|| EngineError::ValidationError {
                field: "status".to_string(),
                message: format!("unknown execution status '{}'", self.status),
            })?;
        let cursor: ExecutionCursor = serde_json::from_str(&self.cursor)?;
        Ok(ExecutionSnapshot {
            id: self.id.clone(),
            flow_id: self.flow_id.clone(),
            flow_name: self.flow_name.clone(),
            patient_id: self.patient_id.clone(),
            status,
            progress: self.progress,
            completed_steps: self.completed_steps,
            total_steps: self.total_steps,
            cursor,
            started_at: self.started_at,
            completed_at: self.completed_at,
            next_step_available_at: self.next_step_available_at,
            error: self.error.clone(),
        })
    }
}

/// Fields for creating a new execution.
#[derive(Debug, Clone)]
pub struct NewExecution {
    /// Execution id.
    pub id: String,
    /// Flow definition id.
    pub flow_id: String,
    /// Flow name at assignment time.
    pub flow_name: String,
    /// Patient the flow is assigned to.
    pub patient_id: String,
    /// Total step count.
    pub total_steps: i32,
    /// Initial cursor serialized as JSON.
    pub cursor: String,
}

/// Guarded write produced by an advance.
///
/// Applied with `WHERE completed_steps < ?` so the write with the higher
/// completed count wins when two advances race.
#[derive(Debug, Clone)]
pub struct AdvanceUpdate {
    /// New status string.
    pub status: String,
    /// New progress percentage.
    pub progress: i32,
    /// New completed step count (also the guard value).
    pub completed_steps: i32,
    /// New cursor serialized as JSON.
    pub cursor: String,
    /// Completion timestamp, set when the advance finishes the flow.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Content access record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ContentAccessRecord {
    /// Unique identifier for the access grant.
    pub id: String,
    /// Opaque unguessable token.
    pub access_token: String,
    /// Execution the grant belongs to.
    pub execution_id: String,
    /// Patient the grant belongs to.
    pub patient_id: String,
    /// Granted files serialized as JSON.
    pub files: String,
    /// Hash of the granted file set, for get-or-create lookups.
    pub file_set_hash: String,
    /// When the token stops resolving.
    pub expires_at: DateTime<Utc>,
    /// When the grant was created.
    pub created_at: DateTime<Utc>,
}

impl ContentAccessRecord {
    /// Parse the stored file list.
    pub fn file_refs(&self) -> Result<Vec<FileRef>> {
        Ok(serde_json::from_str(&self.files)?)
    }
}

/// Patient profile record (read-only for the engine).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProfileRecord {
    /// Patient identifier.
    pub patient_id: String,
    /// Patient display name.
    pub name: String,
    /// WhatsApp phone number, if known.
    pub phone: Option<String>,
    /// Clinic the patient belongs to.
    pub clinic_id: Option<String>,
}

/// WhatsApp template registry record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TemplateRecord {
    /// Template name as registered with the provider.
    pub name: String,
    /// Whether the template may be used.
    pub is_active: bool,
    /// Whether the template is provider-approved.
    pub is_official: bool,
}

/// Per-clinic messaging provider settings record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProviderSettingsRecord {
    /// Clinic identifier.
    pub clinic_id: String,
    /// Provider name (meta, evolution).
    pub provider: String,
    /// Meta: bearer token.
    pub access_token: Option<String>,
    /// Meta: business phone number id.
    pub phone_number_id: Option<String>,
    /// Evolution: gateway base URL.
    pub base_url: Option<String>,
    /// Evolution: session name.
    pub session_name: Option<String>,
    /// Evolution: gateway API key.
    pub api_key: Option<String>,
}

impl ProviderSettingsRecord {
    /// Convert the stored row into resolver settings.
    pub fn to_settings(
        &self,
    ) -> std::result::Result<vitaflow_notify::ProviderSettings, vitaflow_notify::ProviderError>
    {
        Ok(vitaflow_notify::ProviderSettings {
            kind: self.provider.parse()?,
            access_token: self.access_token.clone(),
            phone_number_id: self.phone_number_id.clone(),
            base_url: self.base_url.clone(),
            session_name: self.session_name.clone(),
            api_key: self.api_key.clone(),
        })
    }
}

/// Execution event record for the audit trail.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExecutionEventRecord {
    /// Database primary key.
    pub id: i64,
    /// Execution this event belongs to.
    pub execution_id: String,
    /// Type of event (started, step_completed, notification_sent, ...).
    pub event_type: String,
    /// Optional event payload as JSON.
    pub payload: Option<String>,
    /// When the event occurred.
    pub created_at: DateTime<Utc>,
}

/// Storage abstraction over execution state, content access grants, and the
/// read models the processors need.
#[async_trait::async_trait]
pub trait FlowStore: Send + Sync {
    /// Insert a new execution.
    async fn create_execution(&self, execution: &NewExecution) -> Result<()>;

    /// Fetch an execution by id.
    async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>>;

    /// Apply an advance, guarded so only a higher completed count wins.
    ///
    /// Returns `false` when the guard rejected the write (a racing advance
    /// already recorded equal or higher progress).
    async fn apply_advance(&self, execution_id: &str, update: &AdvanceUpdate) -> Result<bool>;

    /// Rewrite the cursor column only (step revisits, staged payloads).
    async fn save_cursor(&self, execution_id: &str, cursor: &str) -> Result<()>;

    /// Mark an execution active, setting `started_at` on first activation.
    async fn mark_active(&self, execution_id: &str) -> Result<()>;

    /// Mark an execution waiting until the given wake time.
    async fn mark_waiting(&self, execution_id: &str, until: DateTime<Utc>) -> Result<()>;

    /// Mark an execution completed with full progress.
    async fn mark_completed(&self, execution_id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Force an execution to failed with the given detail.
    async fn mark_failed(&self, execution_id: &str, cursor: &str, error: &str) -> Result<()>;

    /// Waiting executions whose wake time has passed, oldest first.
    async fn due_waiting_executions(&self, limit: i64) -> Result<Vec<ExecutionRecord>>;

    /// Flip a waiting execution back to active and clear its wake time.
    async fn wake_execution(&self, execution_id: &str) -> Result<()>;

    /// Insert a content access grant.
    async fn insert_content_access(&self, access: &ContentAccessRecord) -> Result<()>;

    /// Find an unexpired grant for `(execution_id, file_set_hash)`.
    async fn find_content_access(
        &self,
        execution_id: &str,
        file_set_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ContentAccessRecord>>;

    /// Look up a grant by token.
    async fn get_content_access_by_token(
        &self,
        token: &str,
    ) -> Result<Option<ContentAccessRecord>>;

    /// Fetch a patient profile.
    async fn get_profile(&self, patient_id: &str) -> Result<Option<ProfileRecord>>;

    /// Insert or replace a patient profile.
    async fn upsert_profile(&self, profile: &ProfileRecord) -> Result<()>;

    /// Fetch a WhatsApp template by name.
    async fn get_template(&self, name: &str) -> Result<Option<TemplateRecord>>;

    /// Insert or replace a WhatsApp template.
    async fn upsert_template(&self, template: &TemplateRecord) -> Result<()>;

    /// Fetch messaging provider settings for a clinic.
    async fn get_provider_settings(
        &self,
        clinic_id: &str,
    ) -> Result<Option<ProviderSettingsRecord>>;

    /// Insert or replace messaging provider settings for a clinic.
    async fn upsert_provider_settings(&self, settings: &ProviderSettingsRecord) -> Result<()>;

    /// Append an execution event. Callers treat failures as best-effort.
    async fn append_event(
        &self,
        execution_id: &str,
        event_type: &str,
        payload: Option<&str>,
    ) -> Result<()>;

    /// List events for an execution, oldest first.
    async fn list_events(&self, execution_id: &str) -> Result<Vec<ExecutionEventRecord>>;
}
