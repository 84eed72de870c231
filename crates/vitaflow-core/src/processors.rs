// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Node processors.
//!
//! Each runtime node kind maps to one processing routine driven by
//! [`ProcessorContext::process`]. Notifications are fire-and-forget: the
//! processor spawns a detached task and returns its handle so tests can
//! await the outcome; the engine drops the handle. Delivery failure is
//! recorded in the event log and never un-completes workflow state.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use vitaflow_notify::{NotificationDispatcher, ProviderResolver, RetryPolicy, TemplateMessage};

use crate::access::ContentAccessIssuer;
use crate::error::{EngineError, Result};
use crate::model::{
    DelayData, ExecutionSnapshot, FlowNode, FormEndData, FormStartData, NodePayload, WhatsappData,
};
use crate::persistence::{FlowStore, ProfileRecord};

/// Name of the provider-approved form completion template.
pub const COMPLETION_TEMPLATE: &str = "formulario_concluido";

/// Handle to a detached notification task.
///
/// The engine drops it; tests await it to observe the send outcome.
pub type NotificationHandle = tokio::task::JoinHandle<()>;

enum Outbound {
    Text(String),
    Template(TemplateMessage),
}

/// Shared dependencies for node processing.
#[derive(Clone)]
pub struct ProcessorContext {
    store: Arc<dyn FlowStore>,
    providers: Arc<dyn ProviderResolver>,
    retry: RetryPolicy,
    portal_base_url: String,
    issuer: ContentAccessIssuer,
}

impl ProcessorContext {
    /// Create a processor context.
    pub fn new(
        store: Arc<dyn FlowStore>,
        providers: Arc<dyn ProviderResolver>,
        retry: RetryPolicy,
        portal_base_url: impl Into<String>,
        issuer: ContentAccessIssuer,
    ) -> Self {
        Self {
            store,
            providers,
            retry,
            portal_base_url: portal_base_url.into().trim_end_matches('/').to_string(),
            issuer,
        }
    }

    /// Process one node against the given execution.
    ///
    /// Returns the handle of the detached notification task when the node
    /// produced one.
    #[instrument(
        skip(self, execution, node),
        fields(execution_id = %execution.id, node_kind = node.payload.kind().as_str())
    )]
    pub async fn process(
        &self,
        execution: &ExecutionSnapshot,
        node: &FlowNode,
    ) -> Result<Option<NotificationHandle>> {
        match &node.payload {
            NodePayload::Start => self.process_start(execution).await,
            NodePayload::FormStart(data) => self.process_form_start(execution, data).await,
            NodePayload::FormEnd(data) => self.process_form_end(execution, data).await,
            NodePayload::Delay(data) => self.process_delay(execution, data).await,
            NodePayload::Question(_) => {
                // The cursor already points at the question; nothing to do
                // until the patient answers through advance.
                Ok(None)
            }
            NodePayload::Whatsapp(data) => self.process_whatsapp(execution, data).await,
            NodePayload::End => self.process_end(execution).await,
            NodePayload::FormSelect | NodePayload::Calculator | NodePayload::Conditions => {
                Err(EngineError::UnsupportedNodeType {
                    kind: node.payload.kind().as_str().to_string(),
                })
            }
        }
    }

    async fn process_start(&self, execution: &ExecutionSnapshot) -> Result<Option<NotificationHandle>> {
        self.store.mark_active(&execution.id).await?;
        self.record_event(&execution.id, "started", None).await;
        info!("Execution started");
        Ok(None)
    }

    async fn process_form_start(
        &self,
        execution: &ExecutionSnapshot,
        data: &FormStartData,
    ) -> Result<Option<NotificationHandle>> {
        self.store.mark_active(&execution.id).await?;

        let Some((profile, phone)) = self.patient_contact(execution).await? else {
            return Ok(None);
        };
        let title = data.title.as_deref().unwrap_or(&execution.flow_name);
        let link = self.portal_link(&execution.id);
        let body = format!(
            "Olá, {}! Um novo formulário \"{}\" está disponível para você.\n\nAcesse: {}",
            profile.name, title, link
        );

        Ok(self
            .spawn_notification(execution, &profile, phone, Outbound::Text(body))
            .await)
    }

    async fn process_form_end(
        &self,
        execution: &ExecutionSnapshot,
        data: &FormEndData,
    ) -> Result<Option<NotificationHandle>> {
        let Some((profile, phone)) = self.patient_contact(execution).await? else {
            return Ok(None);
        };

        // Files attached: mint (or reuse) a download token. No files: notify
        // without touching the issuer.
        let download_link = if data.files.is_empty() {
            None
        } else {
            let access = self
                .issuer
                .issue_or_reuse(&execution.id, &execution.patient_id, &data.files)
                .await?;
            Some(self.issuer.download_url(&access.access_token))
        };

        let title = data.title.as_deref().unwrap_or(&execution.flow_name);
        let body = completion_text(
            &profile.name,
            title,
            data.final_message.as_deref(),
            download_link.as_deref(),
        );

        let template_active = self
            .store
            .get_template(COMPLETION_TEMPLATE)
            .await?
            .map(|t| t.is_active)
            .unwrap_or(false);

        let outbound = if template_active {
            let mut template = TemplateMessage::new(COMPLETION_TEMPLATE, body.clone())
                .with_parameter(profile.name.clone());
            if let Some(ref link) = download_link {
                template = template.with_parameter(link.clone());
            }
            Outbound::Template(template)
        } else {
            debug!("Completion template inactive, sending plain text");
            Outbound::Text(body)
        };

        Ok(self
            .spawn_notification(execution, &profile, phone, outbound)
            .await)
    }

    async fn process_delay(
        &self,
        execution: &ExecutionSnapshot,
        data: &DelayData,
    ) -> Result<Option<NotificationHandle>> {
        let until = Utc::now() + data.unit.interval(data.quantity);
        self.store.mark_waiting(&execution.id, until).await?;
        self.record_event(
            &execution.id,
            "waiting",
            Some(json!({
                "until": until,
                "quantity": data.quantity,
                "unit": data.unit.as_str(),
            })),
        )
        .await;
        info!(until = %until, "Execution waiting on delay");
        Ok(None)
    }

    async fn process_whatsapp(
        &self,
        execution: &ExecutionSnapshot,
        data: &WhatsappData,
    ) -> Result<Option<NotificationHandle>> {
        // Staged only: the message is stored on the current step and sent by
        // operator tooling, not from the execution path.
        let mut cursor = execution.cursor.clone();
        let index = cursor.index;
        let step = cursor
            .steps
            .get_mut(index)
            .ok_or_else(|| EngineError::StepNotFound {
                execution_id: execution.id.clone(),
                index,
            })?;
        step.response = Some(json!({
            "phone": data.phone,
            "message": data.message,
        }));
        self.store
            .save_cursor(&execution.id, &serde_json::to_string(&cursor)?)
            .await?;
        Ok(None)
    }

    async fn process_end(&self, execution: &ExecutionSnapshot) -> Result<Option<NotificationHandle>> {
        let now = Utc::now();
        self.store.mark_completed(&execution.id, now).await?;
        self.record_event(
            &execution.id,
            "completed",
            Some(json!({ "flow_name": execution.flow_name })),
        )
        .await;
        info!("Execution completed");
        Ok(None)
    }

    /// Resolve the patient and their phone number. A missing phone is a
    /// logged terminal state for notification, not an error.
    async fn patient_contact(
        &self,
        execution: &ExecutionSnapshot,
    ) -> Result<Option<(ProfileRecord, String)>> {
        let profile = self
            .store
            .get_profile(&execution.patient_id)
            .await?
            .ok_or_else(|| EngineError::ValidationError {
                field: "patient_id".to_string(),
                message: format!("profile '{}' not found", execution.patient_id),
            })?;

        match profile.phone.clone() {
            Some(phone) if !phone.trim().is_empty() => Ok(Some((profile, phone))),
            _ => {
                warn!(patient_id = %execution.patient_id, "Patient has no phone, skipping notification");
                self.record_event(
                    &execution.id,
                    "notification_failed",
                    Some(json!({ "reason": "missing_phone" })),
                )
                .await;
                Ok(None)
            }
        }
    }

    /// Build a dispatcher for the patient's clinic and send in a detached
    /// task. Returns `None` when the clinic has no usable provider settings.
    async fn spawn_notification(
        &self,
        execution: &ExecutionSnapshot,
        profile: &ProfileRecord,
        phone: String,
        outbound: Outbound,
    ) -> Option<NotificationHandle> {
        let Some(clinic_id) = profile.clinic_id.as_deref() else {
            warn!(patient_id = %profile.patient_id, "Patient has no clinic, skipping notification");
            self.record_event(
                &execution.id,
                "notification_failed",
                Some(json!({ "reason": "missing_clinic" })),
            )
            .await;
            return None;
        };

        let settings = match self.store.get_provider_settings(clinic_id).await {
            Ok(Some(record)) => match record.to_settings() {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(clinic_id, error = %e, "Invalid provider settings, skipping notification");
                    self.record_event(
                        &execution.id,
                        "notification_failed",
                        Some(json!({ "reason": "provider_not_configured", "detail": e.to_string() })),
                    )
                    .await;
                    return None;
                }
            },
            Ok(None) => {
                warn!(clinic_id, "No provider settings for clinic, skipping notification");
                self.record_event(
                    &execution.id,
                    "notification_failed",
                    Some(json!({ "reason": "provider_not_configured" })),
                )
                .await;
                return None;
            }
            Err(e) => {
                warn!(clinic_id, error = %e, "Failed to load provider settings");
                return None;
            }
        };

        let provider = match self.providers.resolve(&settings) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(clinic_id, error = %e, "Provider resolution failed, skipping notification");
                self.record_event(
                    &execution.id,
                    "notification_failed",
                    Some(json!({ "reason": "provider_not_configured", "detail": e.to_string() })),
                )
                .await;
                return None;
            }
        };

        let dispatcher = NotificationDispatcher::new(provider, self.retry.clone());
        let store = self.store.clone();
        let execution_id = execution.id.clone();

        Some(tokio::spawn(async move {
            let result = match &outbound {
                Outbound::Text(body) => dispatcher.send_text(&phone, body).await,
                Outbound::Template(template) => dispatcher.send_template(&phone, template).await,
            };
            match result {
                Ok(receipt) => {
                    info!(
                        execution_id = %execution_id,
                        provider = receipt.provider,
                        message_id = ?receipt.message_id,
                        "Notification delivered"
                    );
                    let payload = json!({
                        "provider": receipt.provider,
                        "message_id": receipt.message_id,
                    });
                    if let Err(e) = store
                        .append_event(&execution_id, "notification_sent", Some(&payload.to_string()))
                        .await
                    {
                        warn!(error = %e, "Failed to record notification_sent event");
                    }
                }
                Err(e) => {
                    warn!(execution_id = %execution_id, error = %e, "Notification delivery failed");
                    let payload = json!({ "reason": "exhausted", "detail": e.to_string() });
                    if let Err(e) = store
                        .append_event(
                            &execution_id,
                            "notification_failed",
                            Some(&payload.to_string()),
                        )
                        .await
                    {
                        warn!(error = %e, "Failed to record notification_failed event");
                    }
                }
            }
        }))
    }

    fn portal_link(&self, execution_id: &str) -> String {
        format!("{}/flow-execution/{}", self.portal_base_url, execution_id)
    }

    async fn record_event(
        &self,
        execution_id: &str,
        event_type: &str,
        payload: Option<serde_json::Value>,
    ) {
        let payload = payload.map(|p| p.to_string());
        if let Err(e) = self
            .store
            .append_event(execution_id, event_type, payload.as_deref())
            .await
        {
            warn!(execution_id, event_type, error = %e, "Failed to append execution event");
        }
    }
}

/// Compose the form completion message.
fn completion_text(
    patient_name: &str,
    title: &str,
    final_message: Option<&str>,
    download_link: Option<&str>,
) -> String {
    let mut body = match final_message {
        Some(message) => format!("Olá, {}! {}", patient_name, message),
        None => format!(
            "Olá, {}! Você concluiu o formulário \"{}\". 🎉",
            patient_name, title
        ),
    };
    if let Some(link) = download_link {
        body.push_str(&format!(
            "\n\nSeus materiais estão disponíveis em: {}\n\nO link expira em 30 dias.",
            link
        ));
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_text_default_wording() {
        let body = completion_text("Maria", "Anamnese", None, None);
        assert!(body.contains("Maria"));
        assert!(body.contains("\"Anamnese\""));
        assert!(!body.contains("materiais"));
    }

    #[test]
    fn test_completion_text_with_download_link() {
        let body = completion_text(
            "Maria",
            "Anamnese",
            None,
            Some("https://app.vitaflow.health/functions/v1/serve-content?token=abc"),
        );
        assert!(body.contains("serve-content?token=abc"));
        assert!(body.contains("30 dias"));
    }

    #[test]
    fn test_completion_text_custom_final_message() {
        let body = completion_text("Maria", "Anamnese", Some("Obrigado por participar!"), None);
        assert!(body.contains("Obrigado por participar!"));
        assert!(!body.contains("\"Anamnese\""));
    }
}
