//! Per-request Token Binding verification pipeline.
//!
//! ```text
//! strip output headers -> capability gate -> read + decode Sec-Token-Binding
//!   -> cache lookup -> (miss) export EKM -> verify + store -> propagate
//! ```
//!
//! Every path ends in a [`PipelineOutcome`] with a [`Disposition`]; nothing
//! in here returns an error or panics on client input.

pub mod outcome;
pub mod propagation;

pub use outcome::{Disposition, MalformedHeader, PassthroughReason, PipelineOutcome};
pub use propagation::{
    termination_context, ContextError, OutputNames, TokenBindingEnv, CONTEXT_HEADER,
    PROVIDED_HEADER, REFERRED_HEADER, TERMINATION_CONTEXT_LEN,
};

use axum::http::Extensions;
use bytes::Bytes;
use std::sync::Arc;

use crate::cache::{VerificationCache, VerificationOutcome};
use crate::config::{TokenBindingConfig, VerificationFailurePolicy};
use crate::gate::{CapabilityGate, GateDecision};
use crate::headers::RequestHeaders;
use crate::protocol::{decode, KeyParameters, OUTPUT_HEADER_NAMES, SEC_TOKEN_BINDING};
use crate::security::{SessionProvider, TlsSessionHandle};
use propagation::Publisher;

/// Everything the host needs after one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Inbound headers with spoofable names removed and outputs set
    pub headers: RequestHeaders,
    /// Env-style variables set for this request
    pub env: TokenBindingEnv,
    pub outcome: PipelineOutcome,
    pub disposition: Disposition,
}

#[derive(Debug)]
pub struct TokenBindingPipeline {
    gate: CapabilityGate,
    cache: Arc<VerificationCache>,
    names: OutputNames,
    on_verification_failure: VerificationFailurePolicy,
}

impl TokenBindingPipeline {
    #[must_use]
    pub fn new(
        gate: CapabilityGate,
        cache: Arc<VerificationCache>,
        names: OutputNames,
        on_verification_failure: VerificationFailurePolicy,
    ) -> Self {
        Self {
            gate,
            cache,
            names,
            on_verification_failure,
        }
    }

    #[must_use]
    pub fn from_config(
        cfg: &TokenBindingConfig,
        provider: SessionProvider,
        cache: Arc<VerificationCache>,
    ) -> Self {
        Self::new(
            CapabilityGate::new(cfg.enabled, provider),
            cache,
            OutputNames::from(cfg),
            cfg.on_verification_failure,
        )
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<VerificationCache> {
        &self.cache
    }

    #[must_use]
    pub fn names(&self) -> &OutputNames {
        &self.names
    }

    /// Run the pipeline for one request.
    ///
    /// Output header names are stripped from `headers` on every request, and
    /// `Sec-Token-Binding` never survives into the returned headers.
    pub fn process(&self, headers: RequestHeaders, extensions: &Extensions) -> PipelineResult {
        let span = tracing::debug_span!("token_binding", outcome = tracing::field::Empty);
        let _span_guard = span.enter();

        let headers = headers.strip_all(OUTPUT_HEADER_NAMES);
        let mut publisher = Publisher::new(&self.names, headers);
        let outcome = self.evaluate(&mut publisher, extensions);

        span.record("outcome", outcome.label());
        let disposition = self.disposition(&outcome);
        if disposition.is_reject() {
            tracing::info!(outcome = outcome.label(), "rejecting request");
        }

        PipelineResult {
            headers: publisher.headers,
            env: publisher.env,
            outcome,
            disposition,
        }
    }

    fn evaluate(&self, publisher: &mut Publisher<'_>, extensions: &Extensions) -> PipelineOutcome {
        let (session, key_parameters) = match self.gate.check(extensions) {
            GateDecision::Applicable {
                session,
                key_parameters,
            } => (session, key_parameters),
            GateDecision::NotApplicable(reason) => {
                strip_token_binding(publisher);
                return PipelineOutcome::Passthrough(PassthroughReason::NotApplicable(reason));
            }
        };

        let message = read_message(&publisher.headers);
        strip_token_binding(publisher);

        let message = match message {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::debug!("no Sec-Token-Binding header on token binding connection");
                return PipelineOutcome::Passthrough(PassthroughReason::MissingHeader);
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not decode Sec-Token-Binding header");
                return PipelineOutcome::Malformed(err);
            }
        };

        if let Some(binding) = self.cache.lookup(&message) {
            tracing::debug!("found token binding message in verification cache");
            publisher.binding(&binding);
            return PipelineOutcome::CacheHit(binding);
        }

        self.verify(publisher, &session, key_parameters, &message)
    }

    fn verify(
        &self,
        publisher: &mut Publisher<'_>,
        session: &TlsSessionHandle,
        key_parameters: KeyParameters,
        message: &Bytes,
    ) -> PipelineOutcome {
        let ekm = match session.export_keying_material() {
            Ok(ekm) => ekm,
            Err(err) => {
                tracing::warn!(error = %err, "unable to export keying material, skipping token binding");
                return PipelineOutcome::Passthrough(PassthroughReason::EkmUnavailable(err));
            }
        };

        match self.cache.verify_and_store(message, key_parameters, &ekm) {
            VerificationOutcome::Verified(binding) => {
                tracing::debug!("verified Sec-Token-Binding header");
                publisher.binding(&binding);

                let version = session.negotiated_protocol_version();
                let context_bound = match termination_context(version, key_parameters, &ekm) {
                    Ok(context) => {
                        publisher.context(&context);
                        true
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "not exposing token binding context");
                        false
                    }
                };

                PipelineOutcome::Verified {
                    binding,
                    context_bound,
                }
            }
            VerificationOutcome::Rejected(reason) => {
                tracing::error!(
                    error = %reason,
                    policy = ?self.on_verification_failure,
                    "token binding verification failed"
                );
                PipelineOutcome::VerificationFailed(reason)
            }
        }
    }

    fn disposition(&self, outcome: &PipelineOutcome) -> Disposition {
        match outcome {
            PipelineOutcome::Malformed(_) => Disposition::Reject,
            PipelineOutcome::VerificationFailed(_) => match self.on_verification_failure {
                VerificationFailurePolicy::Continue => Disposition::Continue,
                VerificationFailurePolicy::Reject => Disposition::Reject,
            },
            PipelineOutcome::Passthrough(_)
            | PipelineOutcome::CacheHit(_)
            | PipelineOutcome::Verified { .. } => Disposition::Continue,
        }
    }
}

fn strip_token_binding(publisher: &mut Publisher<'_>) {
    let headers = std::mem::take(&mut publisher.headers);
    publisher.headers = headers.strip(SEC_TOKEN_BINDING);
}

/// The single `Sec-Token-Binding` value, decoded.
fn read_message(headers: &RequestHeaders) -> Result<Option<Bytes>, MalformedHeader> {
    let mut values = headers.get_all(SEC_TOKEN_BINDING);
    let Some(first) = values.next() else {
        return Ok(None);
    };

    let others = values.count();
    if others > 0 {
        return Err(MalformedHeader::Duplicated(others + 1));
    }

    let text = first.to_str().map_err(|_| MalformedHeader::NotText)?;
    Ok(Some(decode(text)?))
}
