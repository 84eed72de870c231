// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-clinic provider settings and the resolver seam.
//!
//! Which WhatsApp API a clinic uses is a stored setting. The engine loads the
//! settings row, converts it into [`ProviderSettings`], and asks a
//! [`ProviderResolver`] for a live provider. Tests swap the resolver for one
//! returning a recording mock.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::evolution::EvolutionProvider;
use crate::meta::MetaProvider;
use crate::provider::{MessagingProvider, ProviderError};

/// Supported messaging providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Meta Graph API (WhatsApp Cloud API).
    Meta,
    /// Evolution API (self-hosted gateway).
    Evolution,
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "meta" => Ok(Self::Meta),
            "evolution" => Ok(Self::Evolution),
            other => Err(ProviderError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Provider configuration as stored per clinic.
///
/// Which optional fields are required depends on `kind`; the resolver
/// validates on construction.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Which provider this clinic uses.
    pub kind: ProviderKind,
    /// Meta: bearer token for the Graph API.
    pub access_token: Option<String>,
    /// Meta: business phone number id.
    pub phone_number_id: Option<String>,
    /// Evolution: gateway base URL.
    pub base_url: Option<String>,
    /// Evolution: session name.
    pub session_name: Option<String>,
    /// Evolution: gateway API key, if the instance requires one.
    pub api_key: Option<String>,
}

/// Turns stored settings into a live provider.
pub trait ProviderResolver: Send + Sync {
    /// Build (or fetch) a provider for the given settings.
    fn resolve(
        &self,
        settings: &ProviderSettings,
    ) -> Result<Arc<dyn MessagingProvider>, ProviderError>;
}

/// Default resolver constructing real HTTP providers.
pub struct HttpProviderResolver {
    timeout: Duration,
}

impl HttpProviderResolver {
    /// Create a resolver; `timeout` applies to every provider request.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ProviderResolver for HttpProviderResolver {
    fn resolve(
        &self,
        settings: &ProviderSettings,
    ) -> Result<Arc<dyn MessagingProvider>, ProviderError> {
        match settings.kind {
            ProviderKind::Meta => {
                let phone_number_id = settings
                    .phone_number_id
                    .as_deref()
                    .ok_or(ProviderError::Misconfigured {
                        field: "phone_number_id",
                    })?;
                let access_token =
                    settings
                        .access_token
                        .as_deref()
                        .ok_or(ProviderError::Misconfigured {
                            field: "access_token",
                        })?;
                Ok(Arc::new(MetaProvider::new(
                    phone_number_id,
                    access_token,
                    self.timeout,
                )?))
            }
            ProviderKind::Evolution => {
                let base_url = settings
                    .base_url
                    .as_deref()
                    .ok_or(ProviderError::Misconfigured { field: "base_url" })?;
                let session_name =
                    settings
                        .session_name
                        .as_deref()
                        .ok_or(ProviderError::Misconfigured {
                            field: "session_name",
                        })?;
                Ok(Arc::new(EvolutionProvider::new(
                    base_url,
                    session_name,
                    settings.api_key.clone(),
                    self.timeout,
                )?))
            }
        }
    }
}
