// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Messaging provider abstraction.
//!
//! A [`MessagingProvider`] wraps one upstream WhatsApp API. The dispatcher is
//! polymorphic over the provider's capability set: every provider can send
//! plain text, and providers that cannot send approved templates say so via
//! [`MessagingProvider::supports_templates`] so callers can degrade to the
//! rendered fallback body.

use async_trait::async_trait;

/// Receipt returned once a provider accepted a message.
///
/// Acceptance means the provider's API answered 2xx with its success shape;
/// it says nothing about end-device delivery.
#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    /// Provider that accepted the message (`"meta"` or `"evolution"`).
    pub provider: &'static str,
    /// Provider-assigned message id, when the response carried one.
    pub message_id: Option<String>,
}

/// An approved template message plus the plain-text body to fall back to.
#[derive(Debug, Clone)]
pub struct TemplateMessage {
    /// Template name as registered with the provider.
    pub name: String,
    /// Template language code.
    pub language: String,
    /// Positional body parameters, in template order.
    pub parameters: Vec<String>,
    /// Rendered plain-text equivalent, sent when the provider cannot do
    /// template messages.
    pub fallback_body: String,
}

impl TemplateMessage {
    /// Create a template message with the default `pt_BR` language.
    pub fn new(name: impl Into<String>, fallback_body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            language: "pt_BR".to_string(),
            parameters: Vec::new(),
            fallback_body: fallback_body.into(),
        }
    }

    /// Append a positional body parameter.
    pub fn with_parameter(mut self, value: impl Into<String>) -> Self {
        self.parameters.push(value.into());
        self
    }
}

/// Errors a single provider call can produce.
///
/// The dispatcher treats all of these as retryable except
/// [`ProviderError::Misconfigured`] style errors raised before any request
/// is made; a provider call that keeps failing simply exhausts the retry
/// budget.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider answered with a non-success status.
    #[error("{provider} rejected the message: HTTP {status}: {body}")]
    Rejected {
        /// Provider name.
        provider: &'static str,
        /// HTTP status code of the rejection.
        status: u16,
        /// Response body, for operator diagnostics.
        body: String,
    },

    /// The request never got a usable response (timeout, DNS, TLS, ...).
    #[error("request to {provider} failed: {reason}")]
    Transport {
        /// Provider name.
        provider: &'static str,
        /// Underlying failure description.
        reason: String,
    },

    /// The provider cannot send template messages.
    #[error("{provider} does not support template messages")]
    TemplatesUnsupported {
        /// Provider name.
        provider: &'static str,
    },

    /// Provider settings are missing a required field.
    #[error("provider misconfigured: missing {field}")]
    Misconfigured {
        /// The settings field that was absent.
        field: &'static str,
    },

    /// The stored provider selection names an unknown provider.
    #[error("unsupported messaging provider '{0}'")]
    UnsupportedProvider(String),
}

/// One upstream WhatsApp API.
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    /// Stable provider name used in receipts and logs.
    fn name(&self) -> &'static str;

    /// Whether this provider can send approved template messages.
    fn supports_templates(&self) -> bool;

    /// Send a plain text message to `to` (E.164 phone number).
    async fn send_text(&self, to: &str, body: &str) -> Result<DeliveryReceipt, ProviderError>;

    /// Send an approved template message.
    ///
    /// The default implementation refuses; text-only providers keep it.
    async fn send_template(
        &self,
        to: &str,
        template: &TemplateMessage,
    ) -> Result<DeliveryReceipt, ProviderError> {
        let _ = (to, template);
        Err(ProviderError::TemplatesUnsupported {
            provider: self.name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_message_defaults() {
        let template = TemplateMessage::new("formulario_concluido", "fallback text");
        assert_eq!(template.name, "formulario_concluido");
        assert_eq!(template.language, "pt_BR");
        assert!(template.parameters.is_empty());
        assert_eq!(template.fallback_body, "fallback text");
    }

    #[test]
    fn test_template_message_parameters_keep_order() {
        let template = TemplateMessage::new("t", "f")
            .with_parameter("Maria")
            .with_parameter("https://example.test/serve-content?token=abc");
        assert_eq!(
            template.parameters,
            vec![
                "Maria".to_string(),
                "https://example.test/serve-content?token=abc".to_string()
            ]
        );
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::Rejected {
            provider: "meta",
            status: 400,
            body: "bad request".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "meta rejected the message: HTTP 400: bad request"
        );

        let err = ProviderError::TemplatesUnsupported {
            provider: "evolution",
        };
        assert_eq!(
            err.to_string(),
            "evolution does not support template messages"
        );
    }
}
