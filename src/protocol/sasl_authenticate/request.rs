//! Encoding and creation for SASL Authenticate requests.
//!
//! ### Protocol Def
//! ```text
//! SaslAuthenticate Request (Version: 2) => auth_bytes TAG_BUFFER
//!   auth_bytes => COMPACT_BYTES
//! ```
//!
//! Versions 0 and 1 encode the auth bytes classically; version 2 is
//! flexible.

use std::any::Any;

use bytes::Bytes;

use crate::{
    encode::{put_empty_tagged_fields, CompactBytes, ToByte},
    error::Result,
    protocol::{
        sasl_authenticate::response::SaslAuthenticateResponse, KafkaRequest, KafkaResponse,
    },
};

const API_KEY_SASL_AUTHENTICATE: i16 = 36;
const MAX_VERSION: i16 = 2;

/// The base SASL Authenticate request object.
#[derive(Debug)]
pub struct SaslAuthenticateRequest {
    version: i16,
    /// The SASL authentication bytes from the client, as defined by the
    /// SASL mechanism.
    pub auth_bytes: Bytes,
}

impl SaslAuthenticateRequest {
    /// Create a new SASL Authenticate request.
    pub fn new(auth_bytes: Bytes) -> Self {
        Self {
            version: MAX_VERSION,
            auth_bytes,
        }
    }
}

impl KafkaRequest for SaslAuthenticateRequest {
    fn key(&self) -> i16 {
        API_KEY_SASL_AUTHENTICATE
    }

    fn max_version(&self) -> i16 {
        MAX_VERSION
    }

    fn version(&self) -> i16 {
        self.version
    }

    fn set_version(&mut self, version: i16) {
        self.version = version;
    }

    fn is_flexible(&self) -> bool {
        self.version >= 2
    }

    fn encode_body(&self, buffer: &mut Vec<u8>) -> Result<()> {
        tracing::trace!("Encoding SaslAuthenticateRequest {:?}", self);
        if self.version >= 2 {
            CompactBytes(&self.auth_bytes).encode(buffer)?;
            put_empty_tagged_fields(buffer);
        } else {
            self.auth_bytes.encode(buffer)?;
        }
        Ok(())
    }

    fn response_kind(&self) -> Box<dyn KafkaResponse> {
        Box::new(SaslAuthenticateResponse::empty(self.version))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
