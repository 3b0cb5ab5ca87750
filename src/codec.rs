//! Static state token encoding.
//!
//! A token is the URL-safe base64 of the JSON form of a [`Document`]. When a
//! password is configured the token carries a `.`-separated HMAC-SHA256 of the
//! payload keyed by the password, verified in constant time on decode.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::document::Document;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unable to encode state: {0}")]
    Encode(String),

    #[error("Unable to decode state: {0}")]
    Decode(String),

    #[error("State signature does not match")]
    BadSignature,

    #[error("State is signed but no password is configured")]
    UnexpectedSignature,
}

/// Encode/decode primitive for static and dynamic state documents.
pub trait StateCodec: Send + Sync {
    fn encode(&self, document: &Document, password: Option<&str>) -> Result<String, CodecError>;
    fn decode(&self, token: &str, password: Option<&str>) -> Result<Document, CodecError>;

    /// Check the signature of `token` without decoding its payload.
    fn verify(&self, token: &str, password: &str) -> Result<(), CodecError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Base64JsonCodec;

impl Base64JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

fn mac(password: &str) -> Result<HmacSha256, CodecError> {
    HmacSha256::new_from_slice(password.as_bytes()).map_err(|e| CodecError::Encode(e.to_string()))
}

fn signature(password: &str, payload: &str) -> Result<String, CodecError> {
    let mut mac = mac(password)?;
    mac.update(payload.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

fn verify_signature(password: &str, payload: &str, signature: &str) -> Result<(), CodecError> {
    let provided = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| CodecError::BadSignature)?;
    let mut mac = mac(password)?;
    mac.update(payload.as_bytes());
    mac.verify_slice(&provided).map_err(|_| CodecError::BadSignature)
}

impl StateCodec for Base64JsonCodec {
    fn encode(&self, document: &Document, password: Option<&str>) -> Result<String, CodecError> {
        let json = serde_json::to_string(document).map_err(|e| CodecError::Encode(e.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(json.as_bytes());
        Ok(match password {
            Some(password) => format!("{}.{}", payload, signature(password, &payload)?),
            None => payload,
        })
    }

    fn decode(&self, token: &str, password: Option<&str>) -> Result<Document, CodecError> {
        let payload = match (token.split_once('.'), password) {
            (Some((payload, sig)), Some(password)) => {
                verify_signature(password, payload, sig)?;
                payload
            }
            (Some(_), None) => return Err(CodecError::UnexpectedSignature),
            (None, Some(_)) => return Err(CodecError::BadSignature),
            (None, None) => token,
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim())
            .map_err(|e| CodecError::Decode(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn verify(&self, token: &str, password: &str) -> Result<(), CodecError> {
        let (payload, sig) = token.split_once('.').ok_or(CodecError::BadSignature)?;
        verify_signature(password, payload, sig)
    }
}
