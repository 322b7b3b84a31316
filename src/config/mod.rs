//! Configuration for the Token Binding gate.
//!
//! Configuration is a JSON document layered over compiled-in defaults, with
//! per-field environment overrides. See [`loader::load`] for the precedence.
//!
//! # Module Structure
//!
//! - [`crate::config::types`]: Root `Config` struct
//! - [`token_binding`]: Verification, output naming and cache settings
//! - [`logging`]: Logging configuration
//! - [`crate::config::loader`]: Configuration loading functions
//! - [`crate::config::validation`]: Configuration validation functions
//! - [`crate::config::defaults`]: Default value functions

pub mod defaults;
pub mod loader;
pub mod logging;
pub mod token_binding;
pub mod types;
pub mod validation;

pub use loader::{from_json_str, load, try_load};

pub use logging::{LogFormat, LogLevel, LoggingConfig};

pub use token_binding::{TokenBindingConfig, VerificationCacheConfig, VerificationFailurePolicy};

pub use types::Config;

pub use validation::validate_config;
