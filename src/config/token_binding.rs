//! Token Binding verification configuration types.

use super::defaults::{
    default_cache_capacity, default_cache_cleanup_interval_secs, default_cache_ttl_secs,
    default_context_env_var, default_enabled, default_provided_env_var, default_referred_env_var,
    default_verification_failure_policy,
};
use crate::cache::VerificationCacheSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Token Binding verification settings.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct TokenBindingConfig {
    /// Verify `Sec-Token-Binding` on TLS connections that negotiated Token Binding.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Variable name under which the Provided Token Binding ID is exposed
    #[serde(default = "default_provided_env_var")]
    pub provided_env_var: String,
    /// Variable name under which the Referred Token Binding ID is exposed
    #[serde(default = "default_referred_env_var")]
    pub referred_env_var: String,
    /// Variable name under which the TLS termination context is exposed
    #[serde(default = "default_context_env_var")]
    pub context_env_var: String,
    /// What happens to a request whose Token Binding message fails verification
    #[serde(default = "default_verification_failure_policy")]
    pub on_verification_failure: VerificationFailurePolicy,
    #[serde(default)]
    pub cache: VerificationCacheConfig,
}

impl Default for TokenBindingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            provided_env_var: default_provided_env_var(),
            referred_env_var: default_referred_env_var(),
            context_env_var: default_context_env_var(),
            on_verification_failure: default_verification_failure_policy(),
            cache: VerificationCacheConfig::default(),
        }
    }
}

/// Disposition of a request whose Token Binding signature does not verify.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerificationFailurePolicy {
    /// Continue the request without any Token Binding outputs.
    #[default]
    Continue,
    /// Answer 401 Unauthorized.
    Reject,
}

/// Verification cache configuration.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct VerificationCacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for VerificationCacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
            cleanup_interval_secs: default_cache_cleanup_interval_secs(),
        }
    }
}

impl VerificationCacheConfig {
    #[must_use]
    pub fn settings(&self) -> VerificationCacheSettings {
        VerificationCacheSettings {
            capacity: self.capacity,
            ttl: Duration::from_secs(self.ttl_secs),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
        }
    }
}
