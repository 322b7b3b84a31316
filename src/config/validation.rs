//! Configuration validation functions.

use super::Config;
use crate::headers::env_name_eq;
use anyhow::{bail, ensure};

/// Reject configurations the pipeline cannot run with.
///
/// Output variable names must be non-empty printable tokens without
/// whitespace and must not collide under env-style name comparison, and the
/// verification cache limits must be non-zero.
pub fn validate_config(config: &Config) -> anyhow::Result<()> {
    let tb = &config.token_binding;
    let names = [
        ("token_binding.provided_env_var", tb.provided_env_var.as_str()),
        ("token_binding.referred_env_var", tb.referred_env_var.as_str()),
        ("token_binding.context_env_var", tb.context_env_var.as_str()),
    ];

    for (field, name) in names {
        ensure!(!name.is_empty(), "{field} must not be empty");
        if let Some(c) = name.chars().find(|c| !c.is_ascii_graphic()) {
            bail!("{field} contains invalid character {c:?} in {name:?}");
        }
    }

    for (i, (field_a, a)) in names.iter().enumerate() {
        for (field_b, b) in names.iter().skip(i + 1) {
            ensure!(
                !env_name_eq(a, b),
                "{field_a} ({a:?}) and {field_b} ({b:?}) name the same variable"
            );
        }
    }

    ensure!(
        tb.cache.capacity > 0,
        "token_binding.cache.capacity must be greater than zero"
    );
    ensure!(
        tb.cache.ttl_secs > 0,
        "token_binding.cache.ttl_secs must be greater than zero"
    );
    ensure!(
        tb.cache.cleanup_interval_secs > 0,
        "token_binding.cache.cleanup_interval_secs must be greater than zero"
    );

    let rotation = config.logging.rotation.trim().to_ascii_lowercase();
    ensure!(
        matches!(rotation.as_str(), "daily" | "hourly" | "minutely" | "never"),
        "logging.rotation must be one of daily, hourly, minutely, never (got {:?})",
        config.logging.rotation
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        validate_config(&Config::default()).unwrap();
    }

    #[test]
    fn empty_name_is_rejected() {
        let mut config = Config::default();
        config.token_binding.referred_env_var.clear();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("referred_env_var"));
    }

    #[test]
    fn whitespace_in_name_is_rejected() {
        let mut config = Config::default();
        config.token_binding.context_env_var = "TB CONTEXT".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn names_colliding_under_env_comparison_are_rejected() {
        let mut config = Config::default();
        config.token_binding.referred_env_var = "SEC_PROVIDED_TOKEN_BINDING_ID".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("same variable"));
    }

    #[test]
    fn zero_cache_limits_are_rejected() {
        let mut config = Config::default();
        config.token_binding.cache.ttl_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.token_binding.cache.cleanup_interval_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn unknown_rotation_is_rejected() {
        let mut config = Config::default();
        config.logging.rotation = "weekly".to_string();
        assert!(validate_config(&config).is_err());
    }
}
