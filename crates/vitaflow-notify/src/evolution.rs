// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Evolution API provider.
//!
//! Self-hosted gateway speaking `POST /message/sendText/{session}`. Text
//! only; template sends degrade to the rendered fallback body at the
//! dispatcher level.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::provider::{DeliveryReceipt, MessagingProvider, ProviderError};

const PROVIDER_NAME: &str = "evolution";

/// Evolution API provider (text-only).
pub struct EvolutionProvider {
    http: reqwest::Client,
    base_url: String,
    session_name: String,
    api_key: Option<String>,
}

impl EvolutionProvider {
    /// Create a provider for one Evolution session.
    pub fn new(
        base_url: impl Into<String>,
        session_name: impl Into<String>,
        api_key: Option<String>,
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
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_name: session_name.into(),
            api_key,
        })
    }

    fn send_text_url(&self) -> String {
        format!("{}/message/sendText/{}", self.base_url, self.session_name)
    }
}

#[async_trait]
impl MessagingProvider for EvolutionProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn supports_templates(&self) -> bool {
        false
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<DeliveryReceipt, ProviderError> {
        let mut request = self
            .http
            .post(self.send_text_url())
            .json(&json!({ "number": to, "text": body }));
        if let Some(ref key) = self.api_key {
            request = request.header("apikey", key);
        }

        let response = request.send().await.map_err(|e| ProviderError::Transport {
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

        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
        let message_id = parsed
            .get("key")
            .and_then(|k| k.get("id"))
            .and_then(|id| id.as_str())
            .map(str::to_string);

        debug!(?message_id, "Evolution API accepted message");
        Ok(DeliveryReceipt {
            provider: PROVIDER_NAME,
            message_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::TemplateMessage;

    #[test]
    fn test_send_text_url_strips_trailing_slash() {
        let provider = EvolutionProvider::new(
            "https://evo.clinic.test/",
            "clinic-main",
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            provider.send_text_url(),
            "https://evo.clinic.test/message/sendText/clinic-main"
        );
    }

    #[tokio::test]
    async fn test_template_send_is_refused() {
        let provider = EvolutionProvider::new(
            "https://evo.clinic.test",
            "clinic-main",
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(!provider.supports_templates());

        let template = TemplateMessage::new("formulario_concluido", "fallback");
        let err = provider
            .send_template("5511999999999", &template)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::TemplatesUnsupported {
                provider: "evolution"
            }
        ));
    }
}
