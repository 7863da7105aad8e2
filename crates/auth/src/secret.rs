//! Signing secret resolution.
//!
//! The secret reaches services from heterogeneous configuration sources, so
//! the value is resolved in a fixed order:
//!
//! 1. `BASE64:<b64>` or `RAW:<utf8>` tags are honoured as written.
//! 2. An untagged value that decodes as base64 (standard alphabet first, then
//!    URL-safe) is used decoded.
//! 3. Anything else is used as its raw UTF-8 bytes.
//!
//! Every service must resolve the same configured value the same way, or
//! tokens minted at the edge will not verify.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};

use crate::claims::TokenError;

const BASE64_TAG: &str = "BASE64:";
const RAW_TAG: &str = "RAW:";

/// Which tier produced the key bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SecretEncoding {
    TaggedBase64,
    TaggedRaw,
    SniffedBase64,
    RawFallback,
}

/// Resolved HMAC key material.
#[derive(Clone)]
pub struct SigningSecret {
    bytes: Vec<u8>,
    encoding: SecretEncoding,
}

impl core::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SigningSecret")
            .field("len", &self.bytes.len())
            .field("encoding", &self.encoding)
            .finish()
    }
}

impl SigningSecret {
    pub fn resolve(value: &str) -> Result<Self, TokenError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(TokenError::Config("secret is empty".into()));
        }

        if let Some(encoded) = value.strip_prefix(BASE64_TAG) {
            let bytes = STANDARD
                .decode(encoded.trim())
                .map_err(|e| TokenError::Config(format!("BASE64 secret does not decode: {e}")))?;
            return Self::checked(bytes, SecretEncoding::TaggedBase64);
        }

        if let Some(raw) = value.strip_prefix(RAW_TAG) {
            return Self::checked(raw.as_bytes().to_vec(), SecretEncoding::TaggedRaw);
        }

        match STANDARD.decode(value).or_else(|_| URL_SAFE.decode(value)) {
            Ok(bytes) if !bytes.is_empty() => Self::checked(bytes, SecretEncoding::SniffedBase64),
            _ => Self::checked(value.as_bytes().to_vec(), SecretEncoding::RawFallback),
        }
    }

    fn checked(bytes: Vec<u8>, encoding: SecretEncoding) -> Result<Self, TokenError> {
        if bytes.is_empty() {
            return Err(TokenError::Config("secret resolves to zero bytes".into()));
        }
        Ok(Self { bytes, encoding })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn encoding(&self) -> SecretEncoding {
        self.encoding
    }
}
