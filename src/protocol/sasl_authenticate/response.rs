//! Parsing and processing for SASL Authenticate responses.
//!
//! ### Protocol Defs
//! ```text
//! SaslAuthenticate Response (Version: 1) => error_code error_message auth_bytes session_lifetime_ms
//!   error_code => INT16
//!   error_message => NULLABLE_STRING
//!   auth_bytes => BYTES
//!   session_lifetime_ms => INT64
//! ```
//!
//! Version 0 lacks the session lifetime; version 2 is flexible.

use std::any::Any;

use bytes::Bytes;
use nom::{number::complete::be_i64, IResult};
use nombytes::NomBytes;

use crate::{
    error::{Error, KafkaCode, Result},
    parser,
    protocol::KafkaResponse,
};

const API_KEY_SASL_AUTHENTICATE: i16 = 36;

/// The base SASL Authenticate response object.
#[derive(Debug, PartialEq)]
pub struct SaslAuthenticateResponse {
    version: i16,
    /// The error code, or 0 if there was no error.
    pub error_code: KafkaCode,
    /// The error message, or null if there was no error.
    pub error_message: Option<Bytes>,
    /// The SASL authentication bytes from the server, as defined by the
    /// SASL mechanism.
    pub auth_bytes: Bytes,
    /// Number of milliseconds after which only re-authentication over the
    /// existing connection can create a new session. v1+.
    pub session_lifetime_ms: i64,
}

impl SaslAuthenticateResponse {
    /// An empty response shell to decode into at the given version.
    pub fn empty(version: i16) -> Self {
        Self {
            version,
            error_code: KafkaCode::None,
            error_message: None,
            auth_bytes: Bytes::new(),
            session_lifetime_ms: 0,
        }
    }
}

impl KafkaResponse for SaslAuthenticateResponse {
    fn key(&self) -> i16 {
        API_KEY_SASL_AUTHENTICATE
    }

    fn version(&self) -> i16 {
        self.version
    }

    fn set_version(&mut self, version: i16) {
        self.version = version;
    }

    fn decode(&mut self, buffer: Bytes) -> Result<()> {
        tracing::trace!("Parsing SaslAuthenticateResponse {:?}", buffer);
        let version = self.version;
        let (_, parsed) =
            parse_authenticate_response(NomBytes::new(buffer.clone()), version).map_err(|err| {
                tracing::error!("ERROR: Failed parsing SaslAuthenticateResponse {:?}", err);
                tracing::error!("ERROR: SaslAuthenticateResponse Bytes {:?}", buffer);
                Error::ParsingError(buffer)
            })?;
        *self = parsed;
        Ok(())
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

pub fn parse_authenticate_response(
    s: NomBytes,
    version: i16,
) -> IResult<NomBytes, SaslAuthenticateResponse> {
    let (s, error_code) = parser::parse_kafka_code(s)?;
    let (s, error_message) = if version >= 2 {
        parser::parse_compact_nullable_string(s)?
    } else {
        parser::parse_nullable_string(s)?
    };
    let (s, auth_bytes) = if version >= 2 {
        parser::parse_compact_bytes(s)?
    } else {
        parser::parse_bytes(s)?
    };
    let (s, session_lifetime_ms) = if version >= 1 { be_i64(s)? } else { (s, 0) };
    let (s, ()) = if version >= 2 {
        parser::skip_tagged_fields(s)?
    } else {
        (s, ())
    };

    Ok((
        s,
        SaslAuthenticateResponse {
            version,
            error_code,
            error_message,
            auth_bytes,
            session_lifetime_ms,
        },
    ))
}
