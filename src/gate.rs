//! Per-request decision whether Token Binding processing applies.

use axum::http::Extensions;
use std::fmt;

use crate::protocol::KeyParameters;
use crate::security::{SessionProvider, TlsSessionHandle};

/// Why Token Binding does not apply to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotApplicable {
    Disabled,
    ProviderUnavailable,
    NotTls,
    NoSession,
    NotNegotiated,
}

impl NotApplicable {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::NotTls => "not_tls",
            Self::NoSession => "no_session",
            Self::NotNegotiated => "not_negotiated",
        }
    }
}

impl fmt::Display for NotApplicable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`CapabilityGate::check`].
#[derive(Debug, Clone)]
pub enum GateDecision {
    Applicable {
        session: TlsSessionHandle,
        key_parameters: KeyParameters,
    },
    NotApplicable(NotApplicable),
}

impl GateDecision {
    #[must_use]
    pub const fn is_applicable(&self) -> bool {
        matches!(self, Self::Applicable { .. })
    }

    /// Negotiated key parameters when applicable.
    #[must_use]
    pub fn key_parameters(&self) -> Option<KeyParameters> {
        match self {
            Self::Applicable { key_parameters, .. } => Some(*key_parameters),
            Self::NotApplicable(_) => None,
        }
    }
}

/// Capability gate evaluated once per request.
///
/// Short-circuits on the first failing condition. Absence of capability is a
/// normal outcome and is never reported as an error.
#[derive(Debug, Clone)]
pub struct CapabilityGate {
    enabled: bool,
    provider: SessionProvider,
}

impl CapabilityGate {
    #[must_use]
    pub fn new(enabled: bool, provider: SessionProvider) -> Self {
        Self { enabled, provider }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn check(&self, extensions: &Extensions) -> GateDecision {
        if !self.enabled {
            tracing::debug!("token binding is not enabled in the configuration");
            return GateDecision::NotApplicable(NotApplicable::Disabled);
        }

        let SessionProvider::Available(provider) = &self.provider else {
            tracing::warn!("no TLS session provider configured, token binding cannot be evaluated");
            return GateDecision::NotApplicable(NotApplicable::ProviderUnavailable);
        };

        if !provider.is_tls(extensions) {
            tracing::debug!("connection is not TLS");
            return GateDecision::NotApplicable(NotApplicable::NotTls);
        }

        let Some(session) = provider.session(extensions) else {
            tracing::warn!("TLS connection exposes no session handle, check the TLS acceptor wiring");
            return GateDecision::NotApplicable(NotApplicable::NoSession);
        };

        let Some(key_parameters) = session.token_binding_negotiated() else {
            tracing::debug!("token binding was not negotiated by the peer");
            return GateDecision::NotApplicable(NotApplicable::NotNegotiated);
        };

        tracing::debug!(
            key_parameters = key_parameters.0,
            "token binding is enabled on this connection"
        );
        GateDecision::Applicable {
            session,
            key_parameters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::KeyType;
    use crate::security::{
        Ekm, ExtensionTlsProvider, FixedTlsSession, TlsConnection, EKM_LEN,
    };

    fn tls_extensions(session: Option<FixedTlsSession>) -> Extensions {
        let mut extensions = Extensions::new();
        extensions.insert(TlsConnection {
            session: session.map(TlsSessionHandle::new),
        });
        extensions
    }

    fn gate(enabled: bool) -> CapabilityGate {
        CapabilityGate::new(enabled, SessionProvider::available(ExtensionTlsProvider))
    }

    fn negotiated() -> FixedTlsSession {
        FixedTlsSession::negotiated(KeyType::EcdsaP256, Ekm::new([0; EKM_LEN]))
    }

    fn reason(decision: GateDecision) -> Option<NotApplicable> {
        match decision {
            GateDecision::NotApplicable(reason) => Some(reason),
            GateDecision::Applicable { .. } => None,
        }
    }

    #[test]
    fn disabled_short_circuits_before_provider() {
        let gate = CapabilityGate::new(false, SessionProvider::Unavailable);
        assert_eq!(
            reason(gate.check(&tls_extensions(Some(negotiated())))),
            Some(NotApplicable::Disabled)
        );
    }

    #[test]
    fn missing_provider_is_not_applicable() {
        let gate = CapabilityGate::new(true, SessionProvider::Unavailable);
        assert_eq!(
            reason(gate.check(&tls_extensions(Some(negotiated())))),
            Some(NotApplicable::ProviderUnavailable)
        );
    }

    #[test]
    fn plain_connection_is_not_applicable() {
        assert_eq!(
            reason(gate(true).check(&Extensions::new())),
            Some(NotApplicable::NotTls)
        );
    }

    #[test]
    fn tls_without_session_is_not_applicable() {
        assert_eq!(
            reason(gate(true).check(&tls_extensions(None))),
            Some(NotApplicable::NoSession)
        );
    }

    #[test]
    fn peer_without_token_binding_is_not_applicable() {
        let mut session = negotiated();
        session.key_parameters = None;
        assert_eq!(
            reason(gate(true).check(&tls_extensions(Some(session)))),
            Some(NotApplicable::NotNegotiated)
        );
    }

    #[test]
    fn negotiated_connection_yields_key_parameters() {
        let decision = gate(true).check(&tls_extensions(Some(negotiated())));
        assert!(decision.is_applicable());
        assert_eq!(
            decision.key_parameters(),
            Some(KeyParameters::from(KeyType::EcdsaP256))
        );
    }
}
