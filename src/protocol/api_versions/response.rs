//! Parsing and processing for ApiVersions responses.
//!
//! ### Protocol Defs
//! ```text
//! ApiVersions Response (Version: 0) => error_code [api_keys]
//!   error_code => INT16
//!   api_keys => api_key min_version max_version
//!     api_key => INT16
//!     min_version => INT16
//!     max_version => INT16
//!
//! ApiVersions Response (Version: 3) => error_code [api_keys] throttle_time_ms TAG_BUFFER
//!   api_keys => api_key min_version max_version TAG_BUFFER
//! ```
//!
//! The response header is v0 (no tags) at every version; see the module
//! docs for why.

use std::any::Any;

use bytes::Bytes;
use nom::{number::complete::be_i16, number::complete::be_i32, IResult};
use nombytes::NomBytes;

use crate::{
    error::{Error, KafkaCode, Result},
    parser,
    protocol::KafkaResponse,
};

const API_KEY_API_VERSIONS: i16 = 18;

/// The base ApiVersions response object.
#[derive(Debug, PartialEq)]
pub struct ApiVersionsResponse {
    version: i16,
    /// The top level error code, or 0 if there was no error.
    pub error_code: KafkaCode,
    /// The APIs the broker supports, with their version ranges.
    pub api_keys: Vec<ApiKeyVersions>,
    /// Duration in milliseconds for which the request was throttled. v1+.
    pub throttle_time_ms: i32,
}

/// One supported API advertised by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiKeyVersions {
    /// The API key.
    pub api_key: i16,
    /// The minimum supported version.
    pub min_version: i16,
    /// The maximum supported version.
    pub max_version: i16,
}

impl ApiVersionsResponse {
    /// An empty response shell to decode into at the given version.
    pub fn empty(version: i16) -> Self {
        Self {
            version,
            error_code: KafkaCode::None,
            api_keys: vec![],
            throttle_time_ms: 0,
        }
    }
}

impl KafkaResponse for ApiVersionsResponse {
    fn key(&self) -> i16 {
        API_KEY_API_VERSIONS
    }

    fn version(&self) -> i16 {
        self.version
    }

    fn set_version(&mut self, version: i16) {
        self.version = version;
    }

    fn decode(&mut self, buffer: Bytes) -> Result<()> {
        tracing::trace!("Parsing ApiVersionsResponse {:?}", buffer);
        let version = self.version;
        let (_, parsed) = parse_api_versions_response(NomBytes::new(buffer.clone()), version)
            .map_err(|err| {
                tracing::error!("ERROR: Failed parsing ApiVersionsResponse {:?}", err);
                tracing::error!("ERROR: ApiVersionsResponse Bytes {:?}", buffer);
                Error::ParsingError(buffer)
            })?;
        *self = parsed;
        Ok(())
    }

    fn throttle(&self) -> Option<(i32, bool)> {
        if self.version >= 1 {
            // throttling moved in front of the response in 2.0
            Some((self.throttle_time_ms, self.version >= 2))
        } else {
            None
        }
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

pub fn parse_api_versions_response(
    s: NomBytes,
    version: i16,
) -> IResult<NomBytes, ApiVersionsResponse> {
    let (s, error_code) = parser::parse_kafka_code(s)?;
    let (s, api_keys) = if version >= 3 {
        parser::parse_compact_array(parse_flexible_api_key_versions)(s)?
    } else {
        parser::parse_array(parse_api_key_versions)(s)?
    };
    let (s, throttle_time_ms) = if version >= 1 { be_i32(s)? } else { (s, 0) };
    let (s, ()) = if version >= 3 {
        parser::skip_tagged_fields(s)?
    } else {
        (s, ())
    };

    Ok((
        s,
        ApiVersionsResponse {
            version,
            error_code,
            api_keys,
            throttle_time_ms,
        },
    ))
}

fn parse_api_key_versions(s: NomBytes) -> IResult<NomBytes, ApiKeyVersions> {
    let (s, api_key) = be_i16(s)?;
    let (s, min_version) = be_i16(s)?;
    let (s, max_version) = be_i16(s)?;

    Ok((
        s,
        ApiKeyVersions {
            api_key,
            min_version,
            max_version,
        },
    ))
}

fn parse_flexible_api_key_versions(s: NomBytes) -> IResult<NomBytes, ApiKeyVersions> {
    let (s, versions) = parse_api_key_versions(s)?;
    let (s, ()) = parser::skip_tagged_fields(s)?;
    Ok((s, versions))
}
