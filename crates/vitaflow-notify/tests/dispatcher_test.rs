// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry behavior tests for the notification dispatcher.
//!
//! These run under `start_paused` so backoff sleeps advance virtual time
//! instead of wall-clock time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use vitaflow_notify::{
    DeliveryReceipt, DispatchError, MessagingProvider, NotificationDispatcher, ProviderError,
    RetryPolicy, TemplateMessage,
};

/// Provider that fails the first `fail_first` calls, then succeeds.
/// Records the virtual instant of every call.
struct FlakyProvider {
    fail_first: u32,
    calls: Mutex<Vec<Instant>>,
    template_calls: Mutex<u32>,
    templates: bool,
}

impl FlakyProvider {
    fn new(fail_first: u32) -> Self {
        Self {
            fail_first,
            calls: Mutex::new(Vec::new()),
            template_calls: Mutex::new(0),
            templates: true,
        }
    }

    fn text_only(fail_first: u32) -> Self {
        Self {
            templates: false,
            ..Self::new(fail_first)
        }
    }

    fn record(&self) -> u32 {
        let mut calls = self.calls.lock().unwrap();
        calls.push(Instant::now());
        calls.len() as u32
    }

    fn call_instants(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagingProvider for FlakyProvider {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn supports_templates(&self) -> bool {
        self.templates
    }

    async fn send_text(&self, _to: &str, _body: &str) -> Result<DeliveryReceipt, ProviderError> {
        let call = self.record();
        if call <= self.fail_first {
            return Err(ProviderError::Rejected {
                provider: "flaky",
                status: 500,
                body: "unavailable".to_string(),
            });
        }
        Ok(DeliveryReceipt {
            provider: "flaky",
            message_id: Some(format!("msg-{call}")),
        })
    }

    async fn send_template(
        &self,
        to: &str,
        _template: &TemplateMessage,
    ) -> Result<DeliveryReceipt, ProviderError> {
        *self.template_calls.lock().unwrap() += 1;
        self.send_text(to, "template").await
    }
}

#[tokio::test(start_paused = true)]
async fn test_persistent_failure_makes_exactly_five_attempts() {
    let provider = Arc::new(FlakyProvider::new(u32::MAX));
    let dispatcher = NotificationDispatcher::new(provider.clone(), RetryPolicy::default());

    let result = dispatcher.send_text("5511999999999", "hello").await;

    let err = result.unwrap_err();
    let DispatchError::Exhausted {
        attempts,
        last_error,
    } = err;
    assert_eq!(attempts, 5);
    assert!(matches!(
        last_error,
        ProviderError::Rejected { status: 500, .. }
    ));
    assert_eq!(provider.call_instants().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_strictly_increase() {
    let provider = Arc::new(FlakyProvider::new(u32::MAX));
    let dispatcher = NotificationDispatcher::new(provider.clone(), RetryPolicy::default());

    let _ = dispatcher.send_text("5511999999999", "hello").await;

    let instants = provider.call_instants();
    assert_eq!(instants.len(), 5);
    // Gaps between attempts: 1s, 2s, 3s, 4s.
    let gaps: Vec<Duration> = instants.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps[0], Duration::from_secs(1));
    for pair in gaps.windows(2) {
        assert!(pair[0] < pair[1], "expected increasing gaps, got {gaps:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_recovery_on_third_attempt_stops_retrying() {
    let provider = Arc::new(FlakyProvider::new(2));
    let dispatcher = NotificationDispatcher::new(provider.clone(), RetryPolicy::default());

    let receipt = dispatcher.send_text("5511999999999", "hello").await.unwrap();
    assert_eq!(receipt.message_id.as_deref(), Some("msg-3"));
    assert_eq!(provider.call_instants().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_template_send_uses_slower_backoff() {
    let provider = Arc::new(FlakyProvider::new(u32::MAX));
    let dispatcher = NotificationDispatcher::new(provider.clone(), RetryPolicy::default());

    let template = TemplateMessage::new("formulario_concluido", "fallback");
    let _ = dispatcher.send_template("5511999999999", &template).await;

    let instants = provider.call_instants();
    let first_gap = instants[1] - instants[0];
    assert_eq!(first_gap, Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_text_only_provider_gets_fallback_body_for_templates() {
    let provider = Arc::new(FlakyProvider::text_only(0));
    let dispatcher = NotificationDispatcher::new(provider.clone(), RetryPolicy::default());

    let template = TemplateMessage::new("formulario_concluido", "plain fallback");
    let receipt = dispatcher
        .send_template("5511999999999", &template)
        .await
        .unwrap();

    assert_eq!(receipt.provider, "flaky");
    // The provider's template path was never taken.
    assert_eq!(*provider.template_calls.lock().unwrap(), 0);
    assert_eq!(provider.call_instants().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_custom_policy_attempt_budget() {
    let provider = Arc::new(FlakyProvider::new(u32::MAX));
    let policy = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(100),
        template_base_delay: Duration::from_millis(300),
    };
    let dispatcher = NotificationDispatcher::new(provider.clone(), policy);

    let err = dispatcher.send_text("5511999999999", "hello").await;
    assert!(matches!(
        err,
        Err(DispatchError::Exhausted { attempts: 2, .. })
    ));
    assert_eq!(provider.call_instants().len(), 2);
}
