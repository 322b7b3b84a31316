//! Configuration loading and environment parsing.

use super::validation::validate_config;
use super::Config;
use anyhow::Context;
use serde_json::{Map, Value};
use std::env;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Inline JSON document with the highest precedence.
pub const CONFIG_JSON_VAR: &str = "TOKEN_BINDING_GATE_CONFIG_JSON";
/// When truthy, a JSON document is read from stdin.
pub const CONFIG_STDIN_VAR: &str = "TOKEN_BINDING_GATE_CONFIG_STDIN";
/// Explicit path to a JSON config file.
pub const CONFIG_PATH_VAR: &str = "TOKEN_BINDING_GATE_CONFIG_PATH";
/// Prefix of per-field overrides, e.g. `TOKEN_BINDING_GATE__TOKEN_BINDING__ENABLED=false`.
pub const ENV_OVERRIDE_PREFIX: &str = "TOKEN_BINDING_GATE__";

const CONFIG_FILE_NAME: &str = "config.json";

/// Load configuration with the following precedence (highest first):
/// 1) [`CONFIG_JSON_VAR`] containing raw JSON
/// 2) stdin, when [`CONFIG_STDIN_VAR`] is `1`/`true`/`yes`
/// 3) the file named by [`CONFIG_PATH_VAR`]
/// 4) `config.json` in the current working directory
/// 5) `config.json` next to the executable
/// 6) compiled-in defaults
///
/// Individual fields are then overridden by [`ENV_OVERRIDE_PREFIX`] variables
/// using `__` as the nesting separator. Unreadable sources are reported on
/// stderr and skipped; a document that fails to deserialize falls back to the
/// defaults. Validation problems are reported but not returned, use
/// [`try_load`] for a hard failure.
#[must_use]
pub fn load() -> Config {
    let config = match serde_json::from_value::<Config>(merged_document()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to deserialize config; using defaults: {e}");
            Config::default()
        }
    };

    if let Err(e) = validate_config(&config) {
        eprintln!("Configuration validation error: {e:#}");
    }

    config
}

/// Like [`load`], but deserialization and validation failures are errors.
pub fn try_load() -> anyhow::Result<Config> {
    let config = serde_json::from_value::<Config>(merged_document())
        .context("failed to deserialize merged configuration")?;
    validate_config(&config)?;
    Ok(config)
}

/// Parse and validate a single JSON document layered over the defaults.
pub fn from_json_str(raw: &str) -> anyhow::Result<Config> {
    let mut merged = defaults_document();
    let value: Value = serde_json::from_str(raw).context("invalid configuration JSON")?;
    merge_values(&mut merged, value);
    let config =
        serde_json::from_value::<Config>(merged).context("invalid configuration document")?;
    validate_config(&config)?;
    Ok(config)
}

fn defaults_document() -> Value {
    serde_json::to_value(Config::default()).unwrap_or_else(|_| Value::Object(Map::new()))
}

/// Sources are merged lowest precedence first so later ones win.
fn merged_document() -> Value {
    let mut merged = defaults_document();

    if let Some(path) = exe_dir_config() {
        merge_file_source(&mut merged, &path);
    }

    merge_file_source(&mut merged, Path::new(CONFIG_FILE_NAME));

    if let Ok(path) = env::var(CONFIG_PATH_VAR) {
        merge_file_source(&mut merged, Path::new(&path));
    }

    if env::var(CONFIG_STDIN_VAR).is_ok_and(|v| env_var_truthy(&v)) {
        let mut buf = String::new();
        match std::io::stdin().read_to_string(&mut buf) {
            Ok(_) => {
                if let Some(value) = parse_json_document(&buf, "stdin") {
                    merge_values(&mut merged, value);
                }
            }
            Err(e) => eprintln!("Failed to read config from stdin: {e}"),
        }
    }

    if let Ok(json) = env::var(CONFIG_JSON_VAR) {
        if let Some(value) = parse_json_document(&json, CONFIG_JSON_VAR) {
            merge_values(&mut merged, value);
        }
    }

    apply_env_overrides(&mut merged, env::vars());
    merged
}

fn exe_dir_config() -> Option<PathBuf> {
    let exe = env::current_exe().ok()?;
    Some(exe.parent()?.join(CONFIG_FILE_NAME))
}

fn parse_json_document(raw: &str, label: &str) -> Option<Value> {
    if raw.trim().is_empty() {
        return None;
    }

    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            eprintln!("Failed to parse config from {label}: {err}");
            None
        }
    }
}

fn merge_file_source(target: &mut Value, path: &Path) {
    if path.as_os_str().is_empty() || !path.exists() {
        return;
    }

    match fs::read_to_string(path) {
        Ok(contents) => {
            let label = format!("file {}", path.display());
            if let Some(value) = parse_json_document(&contents, &label) {
                merge_values(target, value);
            }
        }
        Err(err) => eprintln!("Failed to read config from {}: {err}", path.display()),
    }
}

/// Deep-merge `source` into `target`; objects merge key by key, anything else replaces.
fn merge_values(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, value) in source_map {
                match target_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn apply_env_overrides(root: &mut Value, vars: impl IntoIterator<Item = (String, String)>) {
    for (key, raw_value) in vars {
        let Some(stripped) = key.strip_prefix(ENV_OVERRIDE_PREFIX) else {
            continue;
        };

        let path: Vec<String> = stripped
            .split("__")
            .filter(|segment| !segment.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();

        if !path.is_empty() {
            set_nested_value(root, &path, parse_scalar(raw_value.trim()));
        }
    }
}

fn env_var_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

/// JSON scalars (`false`, `42`, `"x"`) are taken literally; anything else is a string.
fn parse_scalar(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn set_nested_value(target: &mut Value, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *target = value;
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let Value::Object(map) = target else {
        return;
    };

    if rest.is_empty() {
        map.insert(head.clone(), value);
    } else {
        let child = map
            .entry(head.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        set_nested_value(child, rest, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_replaces_leaves_and_keeps_siblings() {
        let mut base = json!({"token_binding": {"enabled": true, "cache": {"capacity": 10}}});
        merge_values(
            &mut base,
            json!({"token_binding": {"cache": {"capacity": 5, "ttl_secs": 9}}}),
        );
        assert_eq!(
            base,
            json!({"token_binding": {"enabled": true, "cache": {"capacity": 5, "ttl_secs": 9}}})
        );
    }

    #[test]
    fn env_overrides_nest_and_parse_scalars() {
        let mut root = defaults_document();
        apply_env_overrides(
            &mut root,
            vec![
                (
                    "TOKEN_BINDING_GATE__TOKEN_BINDING__ENABLED".to_string(),
                    "false".to_string(),
                ),
                (
                    "TOKEN_BINDING_GATE__TOKEN_BINDING__CACHE__CAPACITY".to_string(),
                    " 42 ".to_string(),
                ),
                (
                    "TOKEN_BINDING_GATE__TOKEN_BINDING__CONTEXT_ENV_VAR".to_string(),
                    "TB_CONTEXT".to_string(),
                ),
                ("UNRELATED__TOKEN_BINDING__ENABLED".to_string(), "true".to_string()),
            ],
        );

        let config: Config = serde_json::from_value(root).unwrap();
        assert!(!config.token_binding.enabled);
        assert_eq!(config.token_binding.cache.capacity, 42);
        assert_eq!(config.token_binding.context_env_var, "TB_CONTEXT");
    }

    #[test]
    fn set_nested_value_replaces_non_objects() {
        let mut root = json!({"logging": "text"});
        set_nested_value(
            &mut root,
            &["logging".to_string(), "format".to_string()],
            json!("json"),
        );
        assert_eq!(root, json!({"logging": {"format": "json"}}));
    }

    #[test]
    fn truthy_values() {
        for v in ["1", "true", "TRUE", " yes "] {
            assert!(env_var_truthy(v), "{v}");
        }
        for v in ["0", "false", "", "on"] {
            assert!(!env_var_truthy(v), "{v}");
        }
    }

    #[test]
    fn from_json_str_layers_over_defaults() {
        let config = from_json_str(r#"{"token_binding": {"on_verification_failure": "reject"}}"#)
            .unwrap();
        assert_eq!(
            config.token_binding.on_verification_failure,
            crate::config::VerificationFailurePolicy::Reject
        );
        assert_eq!(config.token_binding.cache.ttl_secs, 300);
    }

    #[test]
    fn from_json_str_rejects_invalid_documents() {
        assert!(from_json_str("{").is_err());
        assert!(from_json_str(r#"{"token_binding": {"cache": {"capacity": 0}}}"#).is_err());
    }
}
