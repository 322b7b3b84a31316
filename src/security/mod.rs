/// Security collaborators of the verification pipeline
///
/// This module provides:
/// - The TLS session provider contract (EKM export, negotiated key parameters)
/// - The cryptographic verifier contract and its RFC 8471 implementation
pub mod tls;
pub mod verifier;

pub use tls::{
    Ekm, EkmError, ExtensionTlsProvider, FixedTlsSession, ProtocolVersion, SessionProvider,
    TlsConnection, TlsSession, TlsSessionHandle, TlsSessionProvider, EKM_LABEL, EKM_LEN,
};
pub use verifier::{Rfc8471Verifier, TokenBindingVerifier, VerifiedBinding, VerifyError};
