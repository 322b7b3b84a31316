use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use axum::http::Extensions;
use thiserror::Error;

use crate::protocol::KeyParameters;

/// Length of the exported keying material used as the binding factor.
pub const EKM_LEN: usize = 32;

/// TLS exporter label for Token Binding (RFC 8471 §3.3).
pub const EKM_LABEL: &str = "EXPORTER-Token-Binding";

/// Exported keying material of the active TLS session.
///
/// Never cached across requests and never printed: `Debug` is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Ekm([u8; EKM_LEN]);

impl Ekm {
    #[must_use]
    pub const fn new(bytes: [u8; EKM_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, EkmError> {
        <[u8; EKM_LEN]>::try_from(bytes)
            .map(Self)
            .map_err(|_| EkmError::InvalidLength(bytes.len()))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; EKM_LEN] {
        &self.0
    }
}

impl fmt::Debug for Ekm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Ekm(<redacted>)")
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EkmError {
    #[error("keying material export failed: {0}")]
    ExportFailed(String),
    #[error("exported keying material is {0} bytes, expected {EKM_LEN}")]
    InvalidLength(usize),
}

/// Token Binding protocol version negotiated in the TLS extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    /// Token Binding protocol 1.0 (RFC 8472).
    pub const V1_0: Self = Self { major: 1, minor: 0 };

    #[must_use]
    pub const fn to_bytes(self) -> [u8; 2] {
        [self.major, self.minor]
    }
}

/// Per-connection view of a TLS session that negotiated (or not) Token Binding.
pub trait TlsSession: Send + Sync {
    /// Key parameters the peer negotiated, `None` when Token Binding was not negotiated.
    fn token_binding_negotiated(&self) -> Option<KeyParameters>;

    fn export_keying_material(&self) -> Result<Ekm, EkmError>;

    fn negotiated_protocol_version(&self) -> ProtocolVersion;
}

/// Shared handle to a request's TLS session.
#[derive(Clone)]
pub struct TlsSessionHandle(Arc<dyn TlsSession>);

impl TlsSessionHandle {
    pub fn new(session: impl TlsSession + 'static) -> Self {
        Self(Arc::new(session))
    }
}

impl From<Arc<dyn TlsSession>> for TlsSessionHandle {
    fn from(session: Arc<dyn TlsSession>) -> Self {
        Self(session)
    }
}

impl Deref for TlsSessionHandle {
    type Target = dyn TlsSession;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for TlsSessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSessionHandle")
            .field("token_binding", &self.token_binding_negotiated())
            .finish_non_exhaustive()
    }
}

/// Resolves TLS state for a request from its extensions.
pub trait TlsSessionProvider: Send + Sync {
    fn is_tls(&self, extensions: &Extensions) -> bool;

    fn session(&self, extensions: &Extensions) -> Option<TlsSessionHandle>;
}

/// TLS provider dependency as wired at startup.
#[derive(Clone, Default)]
pub enum SessionProvider {
    Available(Arc<dyn TlsSessionProvider>),
    #[default]
    Unavailable,
}

impl SessionProvider {
    pub fn available(provider: impl TlsSessionProvider + 'static) -> Self {
        Self::Available(Arc::new(provider))
    }
}

impl fmt::Debug for SessionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available(_) => f.write_str("SessionProvider::Available"),
            Self::Unavailable => f.write_str("SessionProvider::Unavailable"),
        }
    }
}

/// Connection metadata a TLS acceptor attaches to each request it serves.
#[derive(Debug, Clone, Default)]
pub struct TlsConnection {
    pub session: Option<TlsSessionHandle>,
}

/// Provider reading the [`TlsConnection`] request extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionTlsProvider;

impl TlsSessionProvider for ExtensionTlsProvider {
    fn is_tls(&self, extensions: &Extensions) -> bool {
        extensions.get::<TlsConnection>().is_some()
    }

    fn session(&self, extensions: &Extensions) -> Option<TlsSessionHandle> {
        extensions
            .get::<TlsConnection>()
            .and_then(|connection| connection.session.clone())
    }
}

/// Session with fixed parameters, for offline verification and tests.
#[derive(Debug, Clone)]
pub struct FixedTlsSession {
    pub key_parameters: Option<KeyParameters>,
    pub ekm: Option<Ekm>,
    pub version: ProtocolVersion,
}

impl FixedTlsSession {
    #[must_use]
    pub fn negotiated(key_parameters: impl Into<KeyParameters>, ekm: Ekm) -> Self {
        Self {
            key_parameters: Some(key_parameters.into()),
            ekm: Some(ekm),
            version: ProtocolVersion::V1_0,
        }
    }
}

impl TlsSession for FixedTlsSession {
    fn token_binding_negotiated(&self) -> Option<KeyParameters> {
        self.key_parameters
    }

    fn export_keying_material(&self) -> Result<Ekm, EkmError> {
        self.ekm
            .clone()
            .ok_or_else(|| EkmError::ExportFailed("no keying material available".to_string()))
    }

    fn negotiated_protocol_version(&self) -> ProtocolVersion {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::KeyType;

    #[test]
    fn ekm_debug_is_redacted() {
        let ekm = Ekm::new([0x42; EKM_LEN]);
        let rendered = format!("{ekm:?}");
        assert_eq!(rendered, "Ekm(<redacted>)");
        assert!(!rendered.contains("42"));
    }

    #[test]
    fn ekm_from_slice_checks_length() {
        assert!(Ekm::from_slice(&[0u8; EKM_LEN]).is_ok());
        assert_eq!(
            Ekm::from_slice(&[0u8; 16]),
            Err(EkmError::InvalidLength(16))
        );
    }

    #[test]
    fn extension_provider_reads_connection() {
        let provider = ExtensionTlsProvider;
        let mut extensions = Extensions::new();
        assert!(!provider.is_tls(&extensions));
        assert!(provider.session(&extensions).is_none());

        extensions.insert(TlsConnection {
            session: Some(TlsSessionHandle::new(FixedTlsSession::negotiated(
                KeyType::EcdsaP256,
                Ekm::new([1; EKM_LEN]),
            ))),
        });
        assert!(provider.is_tls(&extensions));
        let session = provider.session(&extensions).unwrap();
        assert_eq!(
            session.token_binding_negotiated(),
            Some(KeyParameters(2))
        );
        assert_eq!(session.negotiated_protocol_version().to_bytes(), [1, 0]);
    }
}
