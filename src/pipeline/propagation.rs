//! Exposing verified Token Binding results to downstream request processing.
//!
//! Each value is published twice, base64url without padding: as an
//! env-style variable under a configurable name, and as an inbound request
//! header under its fixed name.

use axum::http::{HeaderName, HeaderValue};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::TokenBindingConfig;
use crate::headers::RequestHeaders;
use crate::protocol::{encode, InvalidKeyType, KeyParameters};
use crate::security::{Ekm, ProtocolVersion, VerifiedBinding, EKM_LEN};

pub const PROVIDED_HEADER: HeaderName = HeaderName::from_static("sec-provided-token-binding-id");
pub const REFERRED_HEADER: HeaderName = HeaderName::from_static("sec-referred-token-binding-id");
pub const CONTEXT_HEADER: HeaderName = HeaderName::from_static("sec-token-binding-context");

/// Length of the TLS termination context: version, key type, EKM.
pub const TERMINATION_CONTEXT_LEN: usize = 2 + 1 + EKM_LEN;

/// Variable names the outputs are published under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNames {
    pub provided: String,
    pub referred: String,
    pub context: String,
}

impl From<&TokenBindingConfig> for OutputNames {
    fn from(cfg: &TokenBindingConfig) -> Self {
        Self {
            provided: cfg.provided_env_var.clone(),
            referred: cfg.referred_env_var.clone(),
            context: cfg.context_env_var.clone(),
        }
    }
}

impl Default for OutputNames {
    fn default() -> Self {
        Self::from(&TokenBindingConfig::default())
    }
}

/// Request-scoped variables set by the pipeline.
///
/// Inserted into request extensions by the middleware, replacing anything a
/// previous layer put there.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TokenBindingEnv(BTreeMap<String, String>);

impl TokenBindingEnv {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("cannot build termination context: {0}")]
    InvalidKeyType(#[from] InvalidKeyType),
}

/// TLS termination context (draft-campbell-tokbind-tls-term):
/// `protocol_version (2) || key_parameters (1) || EKM (32)`.
pub fn termination_context(
    version: ProtocolVersion,
    key_parameters: KeyParameters,
    ekm: &Ekm,
) -> Result<Vec<u8>, ContextError> {
    let key_type = key_parameters.key_type()?;

    let mut context = Vec::with_capacity(TERMINATION_CONTEXT_LEN);
    context.extend_from_slice(&version.to_bytes());
    context.push(key_type.as_u8());
    context.extend_from_slice(ekm.as_bytes());
    Ok(context)
}

/// Publishes outputs into the rewritten headers and the variable map.
pub(crate) struct Publisher<'a> {
    names: &'a OutputNames,
    pub(crate) headers: RequestHeaders,
    pub(crate) env: TokenBindingEnv,
}

impl<'a> Publisher<'a> {
    pub(crate) fn new(names: &'a OutputNames, headers: RequestHeaders) -> Self {
        Self {
            names,
            headers,
            env: TokenBindingEnv::default(),
        }
    }

    pub(crate) fn binding(&mut self, binding: &VerifiedBinding) {
        let names = self.names;
        self.publish(PROVIDED_HEADER, &names.provided, binding.provided.as_bytes());

        match &binding.referred {
            Some(referred) => {
                self.publish(REFERRED_HEADER, &names.referred, referred.as_bytes());
            }
            None => tracing::debug!("no referred token binding id in message"),
        }
    }

    pub(crate) fn context(&mut self, context: &[u8]) {
        let names = self.names;
        self.publish(CONTEXT_HEADER, &names.context, context);
    }

    fn publish(&mut self, header: HeaderName, var: &str, value: &[u8]) {
        let encoded = encode(value);
        match HeaderValue::from_str(&encoded) {
            Ok(header_value) => self.headers.set(header, header_value),
            Err(err) => tracing::error!(%header, error = %err, "cannot set output header"),
        }
        tracing::debug!(variable = var, "set token binding variable");
        self.env.insert(var, encoded);
    }
}
