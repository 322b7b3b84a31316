//! Per-request pipeline outcomes and their HTTP disposition.

use axum::http::StatusCode;
use std::fmt;
use thiserror::Error;

use crate::cache::RejectReason;
use crate::gate::NotApplicable;
use crate::protocol::DecodeError;
use crate::security::{EkmError, VerifiedBinding};

/// What the host does with the request after the pipeline ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Reject,
}

impl Disposition {
    /// Status to answer with, `None` when the request continues.
    #[must_use]
    pub const fn status(self) -> Option<StatusCode> {
        match self {
            Self::Continue => None,
            Self::Reject => Some(StatusCode::UNAUTHORIZED),
        }
    }

    #[must_use]
    pub const fn is_reject(self) -> bool {
        matches!(self, Self::Reject)
    }
}

/// Why a request went through without Token Binding outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassthroughReason {
    NotApplicable(NotApplicable),
    MissingHeader,
    EkmUnavailable(EkmError),
}

impl fmt::Display for PassthroughReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotApplicable(reason) => write!(f, "not applicable: {reason}"),
            Self::MissingHeader => f.write_str("no Sec-Token-Binding header"),
            Self::EkmUnavailable(err) => write!(f, "keying material unavailable: {err}"),
        }
    }
}

/// A `Sec-Token-Binding` header that cannot be processed at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedHeader {
    #[error("{0} Sec-Token-Binding headers present")]
    Duplicated(usize),
    #[error("Sec-Token-Binding header is not visible ASCII")]
    NotText,
    #[error(transparent)]
    Undecodable(#[from] DecodeError),
}

/// Terminal state of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Passthrough(PassthroughReason),
    Malformed(MalformedHeader),
    /// Identifiers taken from an earlier verification of the same message.
    CacheHit(VerifiedBinding),
    /// Freshly verified; `context_bound` is false when the termination
    /// context could not be built.
    Verified {
        binding: VerifiedBinding,
        context_bound: bool,
    },
    VerificationFailed(RejectReason),
}

impl PipelineOutcome {
    #[must_use]
    pub fn binding(&self) -> Option<&VerifiedBinding> {
        match self {
            Self::CacheHit(binding) | Self::Verified { binding, .. } => Some(binding),
            _ => None,
        }
    }

    /// Short label for logs and JSON output.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Passthrough(_) => "passthrough",
            Self::Malformed(_) => "malformed",
            Self::CacheHit(_) => "cache_hit",
            Self::Verified { .. } => "verified",
            Self::VerificationFailed(_) => "verification_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TokenBindingId;

    #[test]
    fn reject_maps_to_unauthorized() {
        assert_eq!(Disposition::Reject.status(), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(Disposition::Continue.status(), None);
        assert!(Disposition::Reject.is_reject());
    }

    #[test]
    fn binding_only_for_successful_outcomes() {
        let binding = VerifiedBinding {
            provided: TokenBindingId::new(vec![2, 0, 1, 9]).unwrap(),
            referred: None,
        };
        assert!(PipelineOutcome::CacheHit(binding.clone()).binding().is_some());
        assert!(PipelineOutcome::Verified {
            binding,
            context_bound: false
        }
        .binding()
        .is_some());
        assert!(PipelineOutcome::Passthrough(PassthroughReason::MissingHeader)
            .binding()
            .is_none());
        assert!(PipelineOutcome::Malformed(MalformedHeader::Duplicated(2))
            .binding()
            .is_none());
    }

    #[test]
    fn malformed_header_messages() {
        assert_eq!(
            MalformedHeader::Duplicated(3).to_string(),
            "3 Sec-Token-Binding headers present"
        );
        assert_eq!(
            MalformedHeader::from(DecodeError::Empty).to_string(),
            DecodeError::Empty.to_string()
        );
    }
}
