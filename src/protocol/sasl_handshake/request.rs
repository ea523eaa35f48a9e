//! Encoding and creation for SASL Handshake requests.
//!
//! ### Protocol Def
//! ```text
//! SaslHandshake Request (Version: 1) => mechanism
//!   mechanism => STRING
//! ```
//!
//! Versions 0 and 1 share the body; the version only changes whether the
//! authentication bytes that follow are wrapped. Never flexible.

use std::any::Any;

use crate::{
    encode::ToByte,
    error::Result,
    protocol::{sasl_handshake::response::SaslHandshakeResponse, KafkaRequest, KafkaResponse},
};

const API_KEY_SASL_HANDSHAKE: i16 = 17;
const MAX_VERSION: i16 = 1;

/// The base SASL Handshake request object.
#[derive(Debug)]
pub struct SaslHandshakeRequest {
    version: i16,
    /// The SASL mechanism chosen by the client.
    pub mechanism: String,
}

impl SaslHandshakeRequest {
    /// Create a new SASL Handshake request.
    pub fn new(mechanism: String) -> Self {
        Self {
            version: MAX_VERSION,
            mechanism,
        }
    }
}

impl KafkaRequest for SaslHandshakeRequest {
    fn key(&self) -> i16 {
        API_KEY_SASL_HANDSHAKE
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
        false
    }

    fn encode_body(&self, buffer: &mut Vec<u8>) -> Result<()> {
        tracing::trace!("Encoding SaslHandshakeRequest {:?}", self);
        self.mechanism.encode(buffer)?;
        Ok(())
    }

    fn response_kind(&self) -> Box<dyn KafkaResponse> {
        Box::new(SaslHandshakeResponse::empty(self.version))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
