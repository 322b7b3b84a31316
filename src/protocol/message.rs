//! RFC 8471 `TokenBindingMessage` wire format.
//!
//! ```text
//! struct {
//!     TokenBindingType tokenbinding_type;
//!     TokenBindingID tokenbindingid;          // key_parameters + opaque key<1..2^16-1>
//!     opaque signature<64..2^16-1>;
//!     Extension extensions<0..2^16-1>;
//! } TokenBinding;
//!
//! struct {
//!     TokenBinding tokenbindings<132..2^16-1>;
//! } TokenBindingMessage;
//! ```

use bytes::Bytes;
use thiserror::Error;

use super::codec;
use super::key_type::KeyParameters;

/// Largest encodable message: a two byte vector length plus its contents.
pub const MAX_MESSAGE_LEN: usize = 2 + u16::MAX as usize;

/// Smallest legal length of the `tokenbindings` vector.
pub const MIN_BINDINGS_LEN: usize = 132;

/// Smallest legal signature length.
pub const MIN_SIGNATURE_LEN: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("message is empty")]
    Empty,
    #[error("message truncated while reading {field}")]
    Truncated { field: &'static str },
    #[error("tokenbindings vector is {0} bytes, minimum is {MIN_BINDINGS_LEN}")]
    BindingsTooShort(usize),
    #[error("{0} trailing bytes after tokenbindings vector")]
    TrailingBytes(usize),
    #[error("token binding public key is empty")]
    EmptyPublicKey,
    #[error("token binding signature is {0} bytes, minimum is {MIN_SIGNATURE_LEN}")]
    SignatureTooShort(usize),
    #[error("{field} is {len} bytes, which does not fit a 16-bit length prefix")]
    FieldTooLong { field: &'static str, len: usize },
}

/// Binding flavour (RFC 8471 §3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenBindingType {
    Provided,
    Referred,
    Other(u8),
}

impl TokenBindingType {
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Provided => 0,
            Self::Referred => 1,
            Self::Other(value) => value,
        }
    }
}

impl From<u8> for TokenBindingType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Provided,
            1 => Self::Referred,
            other => Self::Other(other),
        }
    }
}

/// Encoded `TokenBindingID`: key parameters, length-prefixed public key.
///
/// Never empty; exposed downstream as unpadded base64url.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TokenBindingId(Bytes);

impl TokenBindingId {
    /// Wrap raw identifier bytes, refusing an empty value.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Option<Self> {
        let bytes = bytes.into();
        (!bytes.is_empty()).then_some(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn to_base64url(&self) -> String {
        codec::encode(&self.0)
    }
}

impl std::fmt::Debug for TokenBindingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TokenBindingId")
            .field(&self.to_base64url())
            .finish()
    }
}

/// One `TokenBinding` structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBinding {
    pub binding_type: TokenBindingType,
    pub key_parameters: KeyParameters,
    pub public_key: Bytes,
    pub signature: Bytes,
    pub extensions: Bytes,
}

impl TokenBinding {
    /// The `TokenBindingID` this binding proves possession of.
    pub fn id(&self) -> Result<TokenBindingId, MessageError> {
        let key_len = length_prefix("public key", self.public_key.len())?;
        let mut id = Vec::with_capacity(3 + self.public_key.len());
        id.push(self.key_parameters.0);
        id.extend_from_slice(&key_len);
        id.extend_from_slice(&self.public_key);
        TokenBindingId::new(id).ok_or(MessageError::EmptyPublicKey)
    }

    /// Bytes covered by the signature: type, key parameters, then the EKM.
    #[must_use]
    pub fn signed_content(&self, ekm: &[u8]) -> Vec<u8> {
        signed_content(self.binding_type, self.key_parameters, ekm)
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), MessageError> {
        if self.public_key.is_empty() {
            return Err(MessageError::EmptyPublicKey);
        }
        if self.signature.len() < MIN_SIGNATURE_LEN {
            return Err(MessageError::SignatureTooShort(self.signature.len()));
        }
        out.push(self.binding_type.as_u8());
        out.push(self.key_parameters.0);
        out.extend_from_slice(&length_prefix("public key", self.public_key.len())?);
        out.extend_from_slice(&self.public_key);
        out.extend_from_slice(&length_prefix("signature", self.signature.len())?);
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(&length_prefix("extensions", self.extensions.len())?);
        out.extend_from_slice(&self.extensions);
        Ok(())
    }
}

/// Signature input for a binding of `binding_type` under `key_parameters`.
#[must_use]
pub fn signed_content(
    binding_type: TokenBindingType,
    key_parameters: KeyParameters,
    ekm: &[u8],
) -> Vec<u8> {
    let mut content = Vec::with_capacity(2 + ekm.len());
    content.push(binding_type.as_u8());
    content.push(key_parameters.0);
    content.extend_from_slice(ekm);
    content
}

/// Parsed `TokenBindingMessage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBindingMessage {
    pub bindings: Vec<TokenBinding>,
}

impl TokenBindingMessage {
    pub fn parse(raw: &[u8]) -> Result<Self, MessageError> {
        if raw.is_empty() {
            return Err(MessageError::Empty);
        }

        let mut outer = Reader::new(raw);
        let bindings_len = usize::from(outer.u16("tokenbindings length")?);
        if bindings_len < MIN_BINDINGS_LEN {
            return Err(MessageError::BindingsTooShort(bindings_len));
        }
        let mut reader = Reader::new(outer.take(bindings_len, "tokenbindings")?);
        if outer.remaining() > 0 {
            return Err(MessageError::TrailingBytes(outer.remaining()));
        }

        let mut bindings = Vec::new();
        while reader.remaining() > 0 {
            let binding_type = TokenBindingType::from(reader.u8("tokenbinding_type")?);
            let key_parameters = KeyParameters(reader.u8("key_parameters")?);
            let public_key = reader.vec16("public key")?;
            if public_key.is_empty() {
                return Err(MessageError::EmptyPublicKey);
            }
            let signature = reader.vec16("signature")?;
            if signature.len() < MIN_SIGNATURE_LEN {
                return Err(MessageError::SignatureTooShort(signature.len()));
            }
            let extensions = reader.vec16("extensions")?;
            bindings.push(TokenBinding {
                binding_type,
                key_parameters,
                public_key: Bytes::copy_from_slice(public_key),
                signature: Bytes::copy_from_slice(signature),
                extensions: Bytes::copy_from_slice(extensions),
            });
        }

        Ok(Self { bindings })
    }

    /// Serialize back to wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        let mut body = Vec::new();
        for binding in &self.bindings {
            binding.encode_into(&mut body)?;
        }
        if body.len() < MIN_BINDINGS_LEN {
            return Err(MessageError::BindingsTooShort(body.len()));
        }
        let mut out = Vec::with_capacity(2 + body.len());
        out.extend_from_slice(&length_prefix("tokenbindings", body.len())?);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn bindings_of(
        &self,
        binding_type: TokenBindingType,
    ) -> impl Iterator<Item = &TokenBinding> + '_ {
        self.bindings
            .iter()
            .filter(move |binding| binding.binding_type == binding_type)
    }
}

fn length_prefix(field: &'static str, len: usize) -> Result<[u8; 2], MessageError> {
    u16::try_from(len)
        .map(u16::to_be_bytes)
        .map_err(|_| MessageError::FieldTooLong { field, len })
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], MessageError> {
        if self.buf.len() < len {
            return Err(MessageError::Truncated { field });
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, MessageError> {
        self.take(1, field).map(|bytes| bytes[0])
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, MessageError> {
        self.take(2, field)
            .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn vec16(&mut self, field: &'static str) -> Result<&'a [u8], MessageError> {
        let len = usize::from(self.u16(field)?);
        self.take(len, field)
    }
}
