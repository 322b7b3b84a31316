//! Root configuration types.

use super::logging::LoggingConfig;
use super::token_binding::TokenBindingConfig;
use serde::{Deserialize, Serialize};

/// Root configuration struct for the gate.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub token_binding: TokenBindingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}
