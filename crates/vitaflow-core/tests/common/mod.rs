// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for vitaflow-core integration tests.
//!
//! Provides a TestContext over an in-memory SQLite store with a recording
//! messaging provider, plus flow definition builders.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use vitaflow_core::access::ContentAccessIssuer;
use vitaflow_core::engine::ExecutionEngine;
use vitaflow_core::model::{ExecutionSnapshot, FlowDefinition};
use vitaflow_core::persistence::{FlowStore, ProfileRecord, ProviderSettingsRecord, SqliteStore, TemplateRecord};
use vitaflow_core::processors::ProcessorContext;
use vitaflow_notify::{
    DeliveryReceipt, MessagingProvider, ProviderError, ProviderResolver, ProviderSettings,
    RetryPolicy, TemplateMessage,
};

pub const PORTAL_BASE: &str = "https://portal.test";
pub const CONTENT_BASE: &str = "https://portal.test/functions/v1";

/// One message accepted by the recording provider.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub to: String,
    pub body: String,
    pub template: Option<String>,
}

/// Provider that records every send and always succeeds.
pub struct RecordingProvider {
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingProvider for RecordingProvider {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn supports_templates(&self) -> bool {
        true
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<DeliveryReceipt, ProviderError> {
        self.sent.lock().unwrap().push(SentMessage {
            to: to.to_string(),
            body: body.to_string(),
            template: None,
        });
        Ok(DeliveryReceipt {
            provider: "recording",
            message_id: Some("recorded".to_string()),
        })
    }

    async fn send_template(
        &self,
        to: &str,
        template: &TemplateMessage,
    ) -> Result<DeliveryReceipt, ProviderError> {
        self.sent.lock().unwrap().push(SentMessage {
            to: to.to_string(),
            body: template.fallback_body.clone(),
            template: Some(template.name.clone()),
        });
        Ok(DeliveryReceipt {
            provider: "recording",
            message_id: Some("recorded".to_string()),
        })
    }
}

/// Provider that rejects every send.
pub struct FailingProvider;

#[async_trait]
impl MessagingProvider for FailingProvider {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn supports_templates(&self) -> bool {
        true
    }

    async fn send_text(&self, _to: &str, _body: &str) -> Result<DeliveryReceipt, ProviderError> {
        Err(ProviderError::Rejected {
            provider: "failing",
            status: 500,
            body: "unavailable".to_string(),
        })
    }
}

/// Resolver handing out one fixed provider regardless of clinic settings.
pub struct StaticResolver(pub Arc<dyn MessagingProvider>);

impl ProviderResolver for StaticResolver {
    fn resolve(
        &self,
        _settings: &ProviderSettings,
    ) -> Result<Arc<dyn MessagingProvider>, ProviderError> {
        Ok(self.0.clone())
    }
}

/// Everything a store-backed test needs.
pub struct TestContext {
    pub store: Arc<SqliteStore>,
    pub provider: Arc<RecordingProvider>,
    pub issuer: ContentAccessIssuer,
    pub processors: ProcessorContext,
    pub engine: ExecutionEngine,
}

impl TestContext {
    pub async fn new() -> Self {
        let provider = Arc::new(RecordingProvider::new());
        Self::with_provider_and_policy(provider.clone(), provider, RetryPolicy::default()).await
    }

    /// Build a context around a custom provider and retry policy. The
    /// recording provider passed separately keeps `sent()` available even
    /// when the active provider is a failing one.
    pub async fn with_provider_and_policy(
        active: Arc<dyn MessagingProvider>,
        recording: Arc<RecordingProvider>,
        retry: RetryPolicy,
    ) -> Self {
        let store = Arc::new(SqliteStore::in_memory().await.expect("in-memory store"));
        let store_dyn: Arc<dyn FlowStore> = store.clone();
        let issuer = ContentAccessIssuer::new(store_dyn.clone(), CONTENT_BASE);
        let processors = ProcessorContext::new(
            store_dyn.clone(),
            Arc::new(StaticResolver(active)),
            retry,
            PORTAL_BASE,
            issuer.clone(),
        );
        let engine = ExecutionEngine::new(store_dyn, processors.clone());
        Self {
            store,
            provider: recording,
            issuer,
            processors,
            engine,
        }
    }

    /// Seed a patient with a phone and a clinic with working provider settings.
    pub async fn seed_reachable_patient(&self, patient_id: &str, name: &str) {
        self.store
            .upsert_profile(&ProfileRecord {
                patient_id: patient_id.to_string(),
                name: name.to_string(),
                phone: Some("5511999999999".to_string()),
                clinic_id: Some("clinic-1".to_string()),
            })
            .await
            .expect("seed profile");
        self.store
            .upsert_provider_settings(&ProviderSettingsRecord {
                clinic_id: "clinic-1".to_string(),
                provider: "meta".to_string(),
                access_token: Some("token".to_string()),
                phone_number_id: Some("5511000".to_string()),
                base_url: None,
                session_name: None,
                api_key: None,
            })
            .await
            .expect("seed provider settings");
    }

    /// Seed a patient without a phone number.
    pub async fn seed_phoneless_patient(&self, patient_id: &str, name: &str) {
        self.store
            .upsert_profile(&ProfileRecord {
                patient_id: patient_id.to_string(),
                name: name.to_string(),
                phone: None,
                clinic_id: Some("clinic-1".to_string()),
            })
            .await
            .expect("seed profile");
    }

    /// Register the completion template.
    pub async fn seed_completion_template(&self, active: bool) {
        self.store
            .upsert_template(&TemplateRecord {
                name: "formulario_concluido".to_string(),
                is_active: active,
                is_official: true,
            })
            .await
            .expect("seed template");
    }

    pub async fn snapshot(&self, execution_id: &str) -> ExecutionSnapshot {
        self.store
            .get_execution(execution_id)
            .await
            .expect("load execution")
            .expect("execution exists")
            .snapshot()
            .expect("valid snapshot")
    }

    pub async fn event_types(&self, execution_id: &str) -> Vec<String> {
        self.store
            .list_events(execution_id)
            .await
            .expect("list events")
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }
}

/// Linear flow: start -> the given step nodes -> end.
pub fn linear_flow(id: &str, name: &str, steps: Vec<serde_json::Value>) -> FlowDefinition {
    let mut nodes = vec![json!({ "id": "start", "type": "start" })];
    let mut edges = Vec::new();
    let mut previous = "start".to_string();

    for (i, mut step) in steps.into_iter().enumerate() {
        let node_id = format!("step-{i}");
        step["id"] = json!(node_id);
        nodes.push(step);
        edges.push(json!({ "source": previous, "target": node_id }));
        previous = node_id;
    }

    nodes.push(json!({ "id": "end", "type": "end" }));
    edges.push(json!({ "source": previous, "target": "end" }));

    serde_json::from_value(json!({
        "id": id,
        "name": name,
        "nodes": nodes,
        "edges": edges,
    }))
    .expect("valid definition")
}

/// Five-step anamnesis flow used by the end-to-end tests.
pub fn five_step_flow() -> FlowDefinition {
    linear_flow(
        "flow-anamnese",
        "Anamnese inicial",
        vec![
            json!({ "type": "formStart", "data": { "titulo": "Anamnese" } }),
            json!({ "type": "question", "data": { "pergunta": "Como você dorme?" } }),
            json!({ "type": "question", "data": { "pergunta": "Pratica atividade física?" } }),
            json!({ "type": "question", "data": { "pergunta": "Possui alergias?" } }),
            json!({ "type": "formEnd", "data": { "titulo": "Anamnese" } }),
        ],
    )
}
