// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Vitaflow Notify - Outbound WhatsApp Messaging
//!
//! This crate owns everything between "the engine wants to tell a patient
//! something" and the third-party WhatsApp API accepting (or not accepting)
//! the message:
//!
//! - [`MessagingProvider`]: the provider seam. One implementation per
//!   upstream API ([`MetaProvider`] for the Meta Graph API,
//!   [`EvolutionProvider`] for Evolution API instances). Providers advertise
//!   whether they can send approved templates via
//!   [`MessagingProvider::supports_templates`].
//! - [`NotificationDispatcher`]: the single retry path. Bounded attempts with
//!   strictly increasing linear backoff, configured through [`RetryPolicy`].
//!   Exhaustion resolves to an error value - delivery is best-effort and a
//!   failed send is never allowed to surface as a panic.
//! - [`ProviderSettings`] / [`ProviderResolver`]: per-clinic provider
//!   selection. The store hands the engine a settings row; the resolver turns
//!   it into a live provider.
//!
//! # Delivery contract
//!
//! Callers treat the dispatcher as a side channel: a [`DispatchError`] is
//! logged and recorded, never propagated as a workflow failure. Workflow
//! state is owned by `vitaflow-core`; this crate never reads or writes it.

#![deny(missing_docs)]

/// Retry policy and the dispatcher that applies it.
pub mod dispatcher;

/// Evolution API provider (text-only).
pub mod evolution;

/// Meta Graph API provider (templates and text).
pub mod meta;

/// Provider trait, receipts, and provider-level errors.
pub mod provider;

/// Per-clinic provider settings and the resolver seam.
pub mod settings;

pub use dispatcher::{DispatchError, NotificationDispatcher, RetryPolicy};
pub use evolution::EvolutionProvider;
pub use meta::MetaProvider;
pub use provider::{DeliveryReceipt, MessagingProvider, ProviderError, TemplateMessage};
pub use settings::{HttpProviderResolver, ProviderKind, ProviderResolver, ProviderSettings};
