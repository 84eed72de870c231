// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Notification dispatch with bounded retry.
//!
//! Every outbound message in vitaflow goes through
//! [`NotificationDispatcher::send_text`] or
//! [`NotificationDispatcher::send_template`]. The retry budget and backoff
//! live in one [`RetryPolicy`] instead of ad-hoc loops at each call site.
//!
//! # Contract
//!
//! - At most `max_attempts` provider calls per send.
//! - Inter-attempt delay grows strictly: `attempt_index * base_delay`
//!   (template sends use the larger `template_base_delay`; providers
//!   rate-limit template traffic more aggressively).
//! - Exhaustion resolves to [`DispatchError::Exhausted`], an error value.
//!   Nothing here panics or un-completes workflow state.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::provider::{DeliveryReceipt, MessagingProvider, ProviderError, TemplateMessage};

/// Retry budget and backoff configuration for one dispatcher.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum provider calls per send.
    pub max_attempts: u32,
    /// Backoff unit for text sends.
    pub base_delay: Duration,
    /// Backoff unit for template sends.
    pub template_base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            template_base_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32, template: bool) -> Duration {
        let base = if template {
            self.template_base_delay
        } else {
            self.base_delay
        };
        base * attempt
    }
}

/// Errors surfaced by the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// All attempts failed; the last provider error is attached.
    #[error("delivery failed after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Number of provider calls made.
        attempts: u32,
        /// The error from the final attempt.
        last_error: ProviderError,
    },
}

enum Payload<'a> {
    Text(&'a str),
    Template(&'a TemplateMessage),
}

impl Payload<'_> {
    fn is_template(&self) -> bool {
        matches!(self, Payload::Template(_))
    }
}

/// Sends messages through one provider with the configured retry policy.
pub struct NotificationDispatcher {
    provider: Arc<dyn MessagingProvider>,
    policy: RetryPolicy,
}

impl NotificationDispatcher {
    /// Create a dispatcher over `provider` with the given policy.
    pub fn new(provider: Arc<dyn MessagingProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    /// Send a plain text message, retrying per the policy.
    pub async fn send_text(
        &self,
        to: &str,
        body: &str,
    ) -> Result<DeliveryReceipt, DispatchError> {
        self.send_with_retry(to, Payload::Text(body)).await
    }

    /// Send a template message, retrying per the policy.
    ///
    /// Providers without template capability get the rendered fallback body
    /// as a text send instead.
    pub async fn send_template(
        &self,
        to: &str,
        template: &TemplateMessage,
    ) -> Result<DeliveryReceipt, DispatchError> {
        if !self.provider.supports_templates() {
            debug!(
                provider = self.provider.name(),
                template = %template.name,
                "Provider has no template capability, sending fallback text"
            );
            return self
                .send_with_retry(to, Payload::Text(&template.fallback_body))
                .await;
        }
        self.send_with_retry(to, Payload::Template(template)).await
    }

    async fn send_with_retry(
        &self,
        to: &str,
        payload: Payload<'_>,
    ) -> Result<DeliveryReceipt, DispatchError> {
        let max = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max {
            let result = match payload {
                Payload::Text(body) => self.provider.send_text(to, body).await,
                Payload::Template(template) => self.provider.send_template(to, template).await,
            };

            match result {
                Ok(receipt) => {
                    debug!(
                        provider = receipt.provider,
                        message_id = ?receipt.message_id,
                        attempt,
                        "Message accepted"
                    );
                    return Ok(receipt);
                }
                Err(e) => {
                    warn!(
                        provider = self.provider.name(),
                        attempt,
                        max_attempts = max,
                        error = %e,
                        "Send attempt failed"
                    );
                    last_error = Some(e);
                    if attempt < max {
                        tokio::time::sleep(self.policy.backoff(attempt, payload.is_template()))
                            .await;
                    }
                }
            }
        }

        Err(DispatchError::Exhausted {
            attempts: max,
            last_error: last_error.expect("at least one attempt was made"),
        })
    }
}
