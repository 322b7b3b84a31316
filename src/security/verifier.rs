//! Cryptographic verification of Token Binding messages.
//!
//! The pipeline depends only on [`TokenBindingVerifier`]; [`Rfc8471Verifier`]
//! is the default implementation and checks ECDSA P-256 bindings.

use p256::ecdsa::signature::Verifier as _;
use p256::ecdsa::{Signature, VerifyingKey};
use thiserror::Error;

use super::tls::Ekm;
use crate::protocol::{
    InvalidKeyType, KeyType, MessageError, TokenBinding, TokenBindingId, TokenBindingMessage,
    TokenBindingType,
};

/// Identifiers proven by a successfully verified message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedBinding {
    pub provided: TokenBindingId,
    pub referred: Option<TokenBindingId>,
}

/// Reasons a message fails verification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("malformed token binding message: {0}")]
    Malformed(#[from] MessageError),
    #[error("message carries no provided token binding")]
    MissingProvided,
    #[error("message carries {0} provided token bindings")]
    DuplicateProvided(usize),
    #[error("message carries {0} referred token bindings")]
    DuplicateReferred(usize),
    #[error("provided binding uses key parameters {found}, connection negotiated {negotiated}")]
    KeyParametersMismatch { negotiated: KeyType, found: u8 },
    #[error(transparent)]
    InvalidKeyType(#[from] InvalidKeyType),
    #[error("key type {0} is not supported")]
    UnsupportedKeyType(KeyType),
    #[error("{0} token binding public key is invalid")]
    InvalidPublicKey(&'static str),
    #[error("{0} token binding signature does not verify")]
    BadSignature(&'static str),
}

/// Validates a decoded message against the connection's key type and EKM.
pub trait TokenBindingVerifier: Send + Sync {
    fn verify(
        &self,
        message: &[u8],
        key_type: KeyType,
        ekm: &Ekm,
    ) -> Result<VerifiedBinding, VerifyError>;
}

/// RFC 8471 verifier.
///
/// Requires exactly one provided binding using the negotiated key type and
/// at most one referred binding. Bindings of unknown type and extensions are
/// ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rfc8471Verifier;

impl TokenBindingVerifier for Rfc8471Verifier {
    fn verify(
        &self,
        message: &[u8],
        key_type: KeyType,
        ekm: &Ekm,
    ) -> Result<VerifiedBinding, VerifyError> {
        let parsed = TokenBindingMessage::parse(message)?;

        let provided = single(&parsed, TokenBindingType::Provided)?
            .ok_or(VerifyError::MissingProvided)?;
        if provided.key_parameters.0 != key_type.as_u8() {
            return Err(VerifyError::KeyParametersMismatch {
                negotiated: key_type,
                found: provided.key_parameters.0,
            });
        }
        verify_binding(provided, key_type, ekm, "provided")?;

        let referred = match single(&parsed, TokenBindingType::Referred)? {
            Some(binding) => {
                let referred_type = binding.key_parameters.key_type()?;
                verify_binding(binding, referred_type, ekm, "referred")?;
                Some(binding.id()?)
            }
            None => None,
        };

        Ok(VerifiedBinding {
            provided: provided.id()?,
            referred,
        })
    }
}

fn single(
    message: &TokenBindingMessage,
    binding_type: TokenBindingType,
) -> Result<Option<&TokenBinding>, VerifyError> {
    let mut matching = message.bindings_of(binding_type);
    let first = matching.next();
    let extra = matching.count();
    if extra > 0 {
        let total = extra + 1;
        return Err(match binding_type {
            TokenBindingType::Referred => VerifyError::DuplicateReferred(total),
            _ => VerifyError::DuplicateProvided(total),
        });
    }
    Ok(first)
}

fn verify_binding(
    binding: &TokenBinding,
    key_type: KeyType,
    ekm: &Ekm,
    role: &'static str,
) -> Result<(), VerifyError> {
    match key_type {
        KeyType::EcdsaP256 => verify_ecdsa_p256(binding, ekm, role),
        KeyType::Rsa2048Pkcs15 | KeyType::Rsa2048Pss => {
            Err(VerifyError::UnsupportedKeyType(key_type))
        }
    }
}

fn verify_ecdsa_p256(
    binding: &TokenBinding,
    ekm: &Ekm,
    role: &'static str,
) -> Result<(), VerifyError> {
    // ECPoint is itself prefixed with a one byte length.
    let (point_len, point) = binding
        .public_key
        .split_first()
        .ok_or(VerifyError::InvalidPublicKey(role))?;
    if usize::from(*point_len) != point.len() {
        return Err(VerifyError::InvalidPublicKey(role));
    }
    let key = VerifyingKey::from_sec1_bytes(point).map_err(|_| VerifyError::InvalidPublicKey(role))?;
    let signature =
        Signature::from_slice(&binding.signature).map_err(|_| VerifyError::BadSignature(role))?;

    key.verify(&binding.signed_content(ekm.as_bytes()), &signature)
        .map_err(|_| VerifyError::BadSignature(role))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::KeyParameters;
    use crate::security::tls::EKM_LEN;
    use bytes::Bytes;
    use p256::ecdsa::signature::Signer as _;
    use p256::ecdsa::SigningKey;

    fn signing_key(seed: u8) -> SigningKey {
        SigningKey::from_slice(&[seed; 32]).expect("valid scalar")
    }

    fn signed_binding(
        key: &SigningKey,
        binding_type: TokenBindingType,
        ekm: &Ekm,
    ) -> TokenBinding {
        let point = VerifyingKey::from(key).to_encoded_point(false);
        let mut public_key = vec![point.as_bytes().len() as u8];
        public_key.extend_from_slice(point.as_bytes());
        let key_parameters = KeyParameters::from(KeyType::EcdsaP256);
        let content =
            crate::protocol::signed_content(binding_type, key_parameters, ekm.as_bytes());
        let signature: Signature = key.sign(&content);
        TokenBinding {
            binding_type,
            key_parameters,
            public_key: Bytes::from(public_key),
            signature: Bytes::copy_from_slice(&signature.to_bytes()),
            extensions: Bytes::new(),
        }
    }

    fn encode(bindings: Vec<TokenBinding>) -> Vec<u8> {
        TokenBindingMessage { bindings }.to_bytes().unwrap()
    }

    #[test]
    fn verifies_provided_binding() {
        let ekm = Ekm::new([3; EKM_LEN]);
        let binding = signed_binding(&signing_key(1), TokenBindingType::Provided, &ekm);
        let expected_id = binding.id().unwrap();
        let raw = encode(vec![binding]);

        let verified = Rfc8471Verifier
            .verify(&raw, KeyType::EcdsaP256, &ekm)
            .unwrap();
        assert_eq!(verified.provided, expected_id);
        assert!(verified.referred.is_none());
    }

    #[test]
    fn verifies_referred_binding() {
        let ekm = Ekm::new([4; EKM_LEN]);
        let provided = signed_binding(&signing_key(1), TokenBindingType::Provided, &ekm);
        let referred = signed_binding(&signing_key(2), TokenBindingType::Referred, &ekm);
        let referred_id = referred.id().unwrap();
        let raw = encode(vec![provided, referred]);

        let verified = Rfc8471Verifier
            .verify(&raw, KeyType::EcdsaP256, &ekm)
            .unwrap();
        assert_eq!(verified.referred, Some(referred_id));
    }

    #[test]
    fn rejects_other_connection_ekm() {
        let signed_with = Ekm::new([5; EKM_LEN]);
        let connection = Ekm::new([6; EKM_LEN]);
        let raw = encode(vec![signed_binding(
            &signing_key(1),
            TokenBindingType::Provided,
            &signed_with,
        )]);

        assert_eq!(
            Rfc8471Verifier.verify(&raw, KeyType::EcdsaP256, &connection),
            Err(VerifyError::BadSignature("provided"))
        );
    }

    #[test]
    fn rejects_key_parameter_mismatch() {
        let ekm = Ekm::new([7; EKM_LEN]);
        let raw = encode(vec![signed_binding(
            &signing_key(1),
            TokenBindingType::Provided,
            &ekm,
        )]);

        assert_eq!(
            Rfc8471Verifier.verify(&raw, KeyType::Rsa2048Pss, &ekm),
            Err(VerifyError::KeyParametersMismatch {
                negotiated: KeyType::Rsa2048Pss,
                found: 2
            })
        );
    }

    #[test]
    fn rejects_missing_and_duplicate_provided() {
        let ekm = Ekm::new([8; EKM_LEN]);
        let referred_only = encode(vec![signed_binding(
            &signing_key(2),
            TokenBindingType::Referred,
            &ekm,
        )]);
        assert_eq!(
            Rfc8471Verifier.verify(&referred_only, KeyType::EcdsaP256, &ekm),
            Err(VerifyError::MissingProvided)
        );

        let twice = encode(vec![
            signed_binding(&signing_key(1), TokenBindingType::Provided, &ekm),
            signed_binding(&signing_key(3), TokenBindingType::Provided, &ekm),
        ]);
        assert_eq!(
            Rfc8471Verifier.verify(&twice, KeyType::EcdsaP256, &ekm),
            Err(VerifyError::DuplicateProvided(2))
        );
    }

    #[test]
    fn rejects_garbage() {
        let ekm = Ekm::new([9; EKM_LEN]);
        assert!(matches!(
            Rfc8471Verifier.verify(&[0xde, 0xad, 0xbe, 0xef], KeyType::EcdsaP256, &ekm),
            Err(VerifyError::Malformed(_))
        ));
    }
}
