//! Parsing and processing for SASL Handshake responses.
//!
//! ### Protocol Defs
//! ```text
//! SaslHandshake Response (Version: 1) => error_code [mechanisms]
//!   error_code => INT16
//!   mechanisms => STRING
//! ```
//!
//! Versions 0 and 1 share the body.

use std::any::Any;

use bytes::Bytes;
use nom::IResult;
use nombytes::NomBytes;

use crate::{
    error::{Error, KafkaCode, Result},
    parser,
    protocol::KafkaResponse,
};

const API_KEY_SASL_HANDSHAKE: i16 = 17;

/// The base SASL Handshake response object.
#[derive(Debug, PartialEq)]
pub struct SaslHandshakeResponse {
    version: i16,
    /// The error code, or 0 if there was no error.
    pub error_code: KafkaCode,
    /// The mechanisms enabled in the server.
    pub mechanisms: Vec<Bytes>,
}

impl SaslHandshakeResponse {
    /// An empty response shell to decode into at the given version.
    pub fn empty(version: i16) -> Self {
        Self {
            version,
            error_code: KafkaCode::None,
            mechanisms: vec![],
        }
    }
}

impl KafkaResponse for SaslHandshakeResponse {
    fn key(&self) -> i16 {
        API_KEY_SASL_HANDSHAKE
    }

    fn version(&self) -> i16 {
        self.version
    }

    fn set_version(&mut self, version: i16) {
        self.version = version;
    }

    fn decode(&mut self, buffer: Bytes) -> Result<()> {
        tracing::trace!("Parsing SaslHandshakeResponse {:?}", buffer);
        let version = self.version;
        let (_, parsed) =
            parse_handshake_response(NomBytes::new(buffer.clone()), version).map_err(|err| {
                tracing::error!("ERROR: Failed parsing SaslHandshakeResponse {:?}", err);
                tracing::error!("ERROR: SaslHandshakeResponse Bytes {:?}", buffer);
                Error::ParsingError(buffer)
            })?;
        *self = parsed;
        Ok(())
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

pub fn parse_handshake_response(
    s: NomBytes,
    version: i16,
) -> IResult<NomBytes, SaslHandshakeResponse> {
    let (s, error_code) = parser::parse_kafka_code(s)?;
    let (s, mechanisms) = parser::parse_array(parser::parse_string)(s)?;

    Ok((
        s,
        SaslHandshakeResponse {
            version,
            error_code,
            mechanisms,
        },
    ))
}
