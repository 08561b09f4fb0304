//! Live configuration shared between contexts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime tuning knobs.
///
/// These are empirically chosen defaults, not protocol constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Tuning {
    /// Deadline for a cross-context request.
    pub request_timeout_ms: u64,
    /// Quiet period before a debounced call runs.
    pub debounce_ms: u64,
    /// Lifetime of a cached service result.
    pub cache_ttl_ms: u64,
    /// Maximum number of cached results.
    pub cache_capacity: usize,
    /// Attempts per cache miss, including the first.
    pub retries: u32,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            debounce_ms: 400,
            cache_ttl_ms: 5 * 60 * 1000,
            cache_capacity: 500,
            retries: 3,
        }
    }
}

impl Tuning {
    /// Deadline for outbound requests.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Quiet period for generation calls.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Lifetime of a cached translation.
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

/// Full configuration as held by a [`ConfigStore`](crate::ConfigStore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// LLM provider name, e.g. `openai`.
    pub provider: String,
    /// Credential for the provider. Blank means "not configured".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Model name passed to the provider.
    pub model: String,
    /// Endpoint override for self-hosted or proxied providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Language translations are produced in unless a request overrides it.
    pub target_language: String,
    /// Timing and cache knobs.
    pub tuning: Tuning,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            target_language: "en".to_string(),
            tuning: Tuning::default(),
        }
    }
}

impl Config {
    /// Whether a usable credential is present.
    #[must_use]
    pub fn has_credential(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Provider settings services are built from, if a credential is present.
    #[must_use]
    pub fn provider_settings(&self) -> Option<ProviderSettings> {
        if !self.has_credential() {
            return None;
        }
        Some(ProviderSettings {
            provider: self.provider.clone(),
            api_key: self.api_key.clone().unwrap_or_default(),
            model: self.model.clone(),
            base_url: self.base_url.clone(),
        })
    }

    /// Apply a partial update.
    pub fn apply(&mut self, patch: ConfigPatch) {
        if let Some(provider) = patch.provider {
            self.provider = provider;
        }
        if let Some(api_key) = patch.api_key {
            self.api_key = if api_key.trim().is_empty() {
                None
            } else {
                Some(api_key)
            };
        }
        if let Some(model) = patch.model {
            self.model = model;
        }
        if let Some(base_url) = patch.base_url {
            self.base_url = if base_url.is_empty() { None } else { Some(base_url) };
        }
        if let Some(target_language) = patch.target_language {
            self.target_language = target_language;
        }
        if let Some(tuning) = patch.tuning {
            self.tuning = tuning;
        }
    }

    /// Copy safe to hand to untrusted contexts.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.has_credential() {
            copy.api_key = Some("********".to_string());
        }
        copy
    }
}

/// Partial configuration update. Absent fields are left unchanged.
///
/// An empty `apiKey` or `baseUrl` clears the field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuning: Option<Tuning>,
}

impl ConfigPatch {
    /// Patch that only sets the credential.
    #[must_use]
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..Self::default()
        }
    }
}

/// The subset of configuration a service bundle is bound to.
///
/// Two bundles built from equal settings are interchangeable.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub provider: String,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}
