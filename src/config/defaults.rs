//! Default value functions for configuration fields.
//!
//! These back the `#[serde(default = ...)]` attributes throughout the
//! configuration tree.

use super::logging::LogFormat;
use super::token_binding::VerificationFailurePolicy;
use crate::protocol::{
    SEC_PROVIDED_TOKEN_BINDING_ID, SEC_REFERRED_TOKEN_BINDING_ID, SEC_TOKEN_BINDING_CONTEXT,
};

// =============================================================================
// Token Binding Defaults
// =============================================================================

pub const fn default_enabled() -> bool {
    true
}

pub fn default_provided_env_var() -> String {
    SEC_PROVIDED_TOKEN_BINDING_ID.to_string()
}

pub fn default_referred_env_var() -> String {
    SEC_REFERRED_TOKEN_BINDING_ID.to_string()
}

pub fn default_context_env_var() -> String {
    SEC_TOKEN_BINDING_CONTEXT.to_string()
}

pub const fn default_verification_failure_policy() -> VerificationFailurePolicy {
    VerificationFailurePolicy::Continue
}

// =============================================================================
// Verification Cache Defaults
// =============================================================================

pub const fn default_cache_capacity() -> usize {
    10_000
}

pub const fn default_cache_ttl_secs() -> u64 {
    300 // 5 minutes
}

pub const fn default_cache_cleanup_interval_secs() -> u64 {
    60
}

// =============================================================================
// Logging Defaults
// =============================================================================

pub fn default_log_dir() -> String {
    "logs".to_string()
}

pub fn default_log_filename() -> String {
    "token-binding-gate.log".to_string()
}

pub fn default_rotation() -> String {
    "daily".to_string()
}

pub const fn default_enable_file_logging() -> bool {
    false
}

pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}
