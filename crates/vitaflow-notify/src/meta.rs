// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Meta Graph API provider.
//!
//! Sends WhatsApp messages through the Cloud API
//! (`POST /{version}/{phone_number_id}/messages`). Supports both approved
//! templates and plain text.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::provider::{DeliveryReceipt, MessagingProvider, ProviderError, TemplateMessage};

const PROVIDER_NAME: &str = "meta";
const DEFAULT_GRAPH_BASE: &str = "https://graph.facebook.com/v17.0";

/// Meta Graph API (WhatsApp Cloud API) provider.
pub struct MetaProvider {
    http: reqwest::Client,
    base_url: String,
    phone_number_id: String,
    access_token: String,
}

impl MetaProvider {
    /// Create a provider for the given business phone number.
    ///
    /// Every request carries `timeout`; the Graph API has no server-side
    /// deadline we can rely on.
    pub fn new(
        phone_number_id: impl Into<String>,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport {
                provider: PROVIDER_NAME,
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: DEFAULT_GRAPH_BASE.to_string(),
            phone_number_id: phone_number_id.into(),
            access_token: access_token.into(),
        })
    }

    /// Override the Graph API base URL. Used by tests to point at a stub.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.base_url, self.phone_number_id)
    }

    async fn post_message(
        &self,
        payload: serde_json::Value,
    ) -> Result<DeliveryReceipt, ProviderError> {
        let response = self
            .http
            .post(self.messages_url())
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::Transport {
                provider: PROVIDER_NAME,
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ProviderError::Rejected {
                provider: PROVIDER_NAME,
                status: status.as_u16(),
                body,
            });
        }

        // 2xx alone is not acceptance: the Graph API reports per-message
        // errors inside the body.
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
        if parsed.get("error").is_some() {
            return Err(ProviderError::Rejected {
                provider: PROVIDER_NAME,
                status: status.as_u16(),
                body,
            });
        }

        let message_id = parsed
            .get("messages")
            .and_then(|m| m.get(0))
            .and_then(|m| m.get("id"))
            .and_then(|id| id.as_str())
            .map(str::to_string);

        debug!(?message_id, "Graph API accepted message");
        Ok(DeliveryReceipt {
            provider: PROVIDER_NAME,
            message_id,
        })
    }
}

#[async_trait]
impl MessagingProvider for MetaProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn supports_templates(&self) -> bool {
        true
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<DeliveryReceipt, ProviderError> {
        let payload = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": body }
        });
        self.post_message(payload).await
    }

    async fn send_template(
        &self,
        to: &str,
        template: &TemplateMessage,
    ) -> Result<DeliveryReceipt, ProviderError> {
        let parameters: Vec<serde_json::Value> = template
            .parameters
            .iter()
            .map(|p| json!({ "type": "text", "text": p }))
            .collect();
        let payload = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "template",
            "template": {
                "name": template.name,
                "language": { "code": template.language },
                "components": [
                    { "type": "body", "parameters": parameters }
                ]
            }
        });
        self.post_message(payload).await
    }
}
