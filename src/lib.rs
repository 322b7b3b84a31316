#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

//! # Token Binding Gate
//!
//! Server-side verification of TLS Token Binding (RFC 8471 / RFC 8473) for
//! individual HTTP requests.
//!
//! For each request on a connection that negotiated Token Binding, the
//! `Sec-Token-Binding` header is decoded, checked against the session's
//! exported keying material, and the Provided and Referred Token Binding IDs
//! are exposed to downstream handlers. Client-supplied copies of the output
//! headers are always removed first.

/// Process-wide verification outcome cache
pub mod cache;

/// Configuration loading and validation
pub mod config;

/// Per-request Token Binding applicability check
pub mod gate;

/// Ordered inbound headers and spoofing protection
pub mod headers;

/// Structured logging configuration
pub mod logging;

/// axum middleware
pub mod middleware;

/// Verification pipeline and result propagation
pub mod pipeline;

/// Header codec and Token Binding wire format
pub mod protocol;

/// TLS session and cryptographic verifier contracts
pub mod security;

pub use cache::{VerificationCache, VerificationCacheSettings, VerificationOutcome};
pub use middleware::token_binding_middleware;
pub use pipeline::{Disposition, PipelineOutcome, PipelineResult, TokenBindingEnv, TokenBindingPipeline};
