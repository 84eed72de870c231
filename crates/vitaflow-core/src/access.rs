// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Content access tokens for patient downloads.
//!
//! When a form completes with attached files, the patient receives a link
//! carrying an opaque token instead of raw storage URLs. Tokens are 32
//! random bytes, base64 URL-safe encoded, and expire after 30 days. The
//! retrieval endpoint resolves tokens through [`ContentAccessIssuer::resolve`],
//! which enforces expiry server-side.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::model::FileRef;
use crate::persistence::{ContentAccessRecord, FlowStore};

/// Default token lifetime.
pub const DEFAULT_TTL_DAYS: i64 = 30;

/// A granted content access, the typed view over a stored record.
#[derive(Debug, Clone)]
pub struct ContentAccess {
    /// Grant id.
    pub id: String,
    /// Opaque token carried in the download link.
    pub access_token: String,
    /// Execution the grant belongs to.
    pub execution_id: String,
    /// Patient the grant belongs to.
    pub patient_id: String,
    /// Granted files.
    pub files: Vec<FileRef>,
    /// Hash of the granted file set.
    pub file_set_hash: String,
    /// When the token stops resolving.
    pub expires_at: DateTime<Utc>,
    /// When the grant was created.
    pub created_at: DateTime<Utc>,
}

impl ContentAccess {
    fn from_record(record: ContentAccessRecord) -> Result<Self> {
        let files = record.file_refs()?;
        Ok(Self {
            id: record.id,
            access_token: record.access_token,
            execution_id: record.execution_id,
            patient_id: record.patient_id,
            files,
            file_set_hash: record.file_set_hash,
            expires_at: record.expires_at,
            created_at: record.created_at,
        })
    }
}

/// Canonical hash of a file set, independent of file order.
pub fn file_set_hash(files: &[FileRef]) -> String {
    let mut entries: Vec<String> = files
        .iter()
        .map(|f| format!("{}\u{0}{}", f.name, f.url.as_deref().unwrap_or("")))
        .collect();
    entries.sort();

    let mut hasher = Sha256::new();
    for entry in &entries {
        hasher.update(entry.as_bytes());
        hasher.update(b"\n");
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Issues and resolves content access tokens.
#[derive(Clone)]
pub struct ContentAccessIssuer {
    store: Arc<dyn FlowStore>,
    content_base_url: String,
    ttl: chrono::Duration,
}

impl ContentAccessIssuer {
    /// Create an issuer with the default 30-day token lifetime.
    pub fn new(store: Arc<dyn FlowStore>, content_base_url: impl Into<String>) -> Self {
        Self {
            store,
            content_base_url: content_base_url.into().trim_end_matches('/').to_string(),
            ttl: chrono::Duration::days(DEFAULT_TTL_DAYS),
        }
    }

    /// Override the token lifetime.
    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Issue a fresh grant. Never reuses: two calls produce two
    /// independently resolvable tokens.
    pub async fn issue(
        &self,
        execution_id: &str,
        patient_id: &str,
        files: &[FileRef],
    ) -> Result<ContentAccess> {
        let now = Utc::now();
        let record = ContentAccessRecord {
            id: Uuid::new_v4().to_string(),
            access_token: generate_token(),
            execution_id: execution_id.to_string(),
            patient_id: patient_id.to_string(),
            files: serde_json::to_string(files)?,
            file_set_hash: file_set_hash(files),
            expires_at: now + self.ttl,
            created_at: now,
        };
        self.store.insert_content_access(&record).await?;

        debug!(
            execution_id,
            grant_id = %record.id,
            file_count = files.len(),
            "Issued content access grant"
        );
        ContentAccess::from_record(record)
    }

    /// Return the existing unexpired grant for this execution and file set,
    /// or issue a fresh one. This is the single get-or-create path used by
    /// form completion.
    pub async fn issue_or_reuse(
        &self,
        execution_id: &str,
        patient_id: &str,
        files: &[FileRef],
    ) -> Result<ContentAccess> {
        let hash = file_set_hash(files);
        if let Some(existing) = self
            .store
            .find_content_access(execution_id, &hash, Utc::now())
            .await?
        {
            debug!(execution_id, grant_id = %existing.id, "Reusing content access grant");
            return ContentAccess::from_record(existing);
        }
        self.issue(execution_id, patient_id, files).await
    }

    /// Resolve a token at `now`, enforcing expiry.
    pub async fn resolve(&self, token: &str, now: DateTime<Utc>) -> Result<ContentAccess> {
        let record = self
            .store
            .get_content_access_by_token(token)
            .await?
            .ok_or(EngineError::AccessNotFound)?;
        if now >= record.expires_at {
            return Err(EngineError::AccessExpired {
                expired_at: record.expires_at,
            });
        }
        ContentAccess::from_record(record)
    }

    /// The patient-facing download link for a token.
    pub fn download_url(&self, token: &str) -> String {
        format!("{}/serve-content?token={}", self.content_base_url, token)
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
