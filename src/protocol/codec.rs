//! base64url codec for the `Sec-Token-Binding` header and propagated values.
//!
//! Every buffer allocated while decoding is sized through
//! [`decoded_capacity`], which refuses inputs whose size cannot be computed
//! without overflow or that exceed the largest legal Token Binding message.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use bytes::Bytes;
use thiserror::Error;

use super::message::MAX_MESSAGE_LEN;

/// Longest header value that can decode to a legal Token Binding message
/// (padded form of [`MAX_MESSAGE_LEN`] bytes).
pub const MAX_ENCODED_LEN: usize = MAX_MESSAGE_LEN.div_ceil(3) * 4;

/// base64url without padding on output; padding is tolerated on input.
const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Errors produced while decoding a base64url header value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("header value is empty")]
    Empty,
    #[error("header value is {len} characters, maximum is {MAX_ENCODED_LEN}")]
    TooLong { len: usize },
    #[error("header value is not valid base64url: {0}")]
    Malformed(String),
}

/// Upper bound of decoded bytes for `encoded_len` base64 characters.
///
/// Rounds up to a full 4-character quantum so truncated trailing groups are
/// still covered.
pub fn decoded_capacity(encoded_len: usize) -> Result<usize, DecodeError> {
    if encoded_len == 0 {
        return Err(DecodeError::Empty);
    }
    if encoded_len > MAX_ENCODED_LEN {
        return Err(DecodeError::TooLong { len: encoded_len });
    }
    encoded_len
        .checked_add(3)
        .map(|padded| padded / 4)
        .and_then(|quanta| quanta.checked_mul(3))
        .ok_or(DecodeError::TooLong { len: encoded_len })
}

/// Decode a base64url header value into raw message bytes.
///
/// Any invalid character or truncated quantum fails the whole decode, and a
/// decode that yields zero bytes is reported as [`DecodeError::Empty`].
pub fn decode(header: &str) -> Result<Bytes, DecodeError> {
    let trimmed = header.trim();
    let capacity = decoded_capacity(trimmed.len())?;

    let mut buf = vec![0u8; capacity];
    let written = BASE64URL
        .decode_slice(trimmed.as_bytes(), &mut buf)
        .map_err(|err| DecodeError::Malformed(err.to_string()))?;
    if written == 0 {
        return Err(DecodeError::Empty);
    }
    buf.truncate(written);
    Ok(Bytes::from(buf))
}

/// Encode bytes as unpadded base64url for outward-facing values.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    BASE64URL.encode(bytes)
}
