// Protocol module: header codec, key parameters and the Token Binding message format

pub mod codec;
pub mod key_type;
pub mod message;

pub use codec::{decode, decoded_capacity, encode, DecodeError, MAX_ENCODED_LEN};

pub use key_type::{InvalidKeyType, KeyParameters, KeyType, UnknownKeyTypeName, INVALID_KEY_TYPE};

pub use message::{
    signed_content, MessageError, TokenBinding, TokenBindingId, TokenBindingMessage,
    TokenBindingType, MAX_MESSAGE_LEN,
};

/// Inbound header carrying the base64url Token Binding message (RFC 8473).
pub const SEC_TOKEN_BINDING: &str = "Sec-Token-Binding";

/// Header exposing the verified Provided Token Binding ID.
pub const SEC_PROVIDED_TOKEN_BINDING_ID: &str = "Sec-Provided-Token-Binding-ID";

/// Header exposing the verified Referred Token Binding ID.
pub const SEC_REFERRED_TOKEN_BINDING_ID: &str = "Sec-Referred-Token-Binding-ID";

/// Header exposing the TLS termination context.
pub const SEC_TOKEN_BINDING_CONTEXT: &str = "Sec-Token-Binding-Context";

/// Every header name the gate produces; stripped from inbound requests.
pub const OUTPUT_HEADER_NAMES: [&str; 3] = [
    SEC_TOKEN_BINDING_CONTEXT,
    SEC_PROVIDED_TOKEN_BINDING_ID,
    SEC_REFERRED_TOKEN_BINDING_ID,
];
