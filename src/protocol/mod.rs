//! Bytecode protocol requests & responses.
//!
//! This module aims to implement the bytecode protocol outlined in the
//! [Kafka Documentation](https://kafka.apache.org/protocol.html)
//!
//! The module is set up as a list of message pairs containing two files
//! each corresponding to the request and response.
//!
//! The request files hold the logic for creating and encoding structs that
//! will be sent to the broker. The response files hold the logic for parsing
//! and processing the messages coming from the broker.
//!
//! Only the messages this subsystem itself must speak are implemented:
//! version discovery (ApiVersions), the SASL pair, Produce (whose acks the
//! broker loop rewrites), and Metadata. Anything else is supplied by the
//! caller through the [`KafkaRequest`] / [`KafkaResponse`] traits.

use std::any::Any;
use std::fmt;

use bytes::{BufMut, Bytes};

use crate::{
    encode::{put_empty_tagged_fields, ToByte},
    error::Result,
};

pub mod api_versions;
pub mod metadata;
pub mod produce;
pub mod sasl_authenticate;
pub mod sasl_handshake;

// re exporting these for ease
pub use self::{
    api_versions::{request::ApiVersionsRequest, response::ApiVersionsResponse},
    metadata::{request::MetadataRequest, response::MetadataResponse},
    produce::{request::ProduceRequest, response::ProduceResponse},
    sasl_authenticate::{
        request::SaslAuthenticateRequest, response::SaslAuthenticateResponse,
    },
    sasl_handshake::{request::SaslHandshakeRequest, response::SaslHandshakeResponse},
};

/// The highest API key we keep a learned version for.
/// Keys above this are silently ignored during version discovery.
pub const MAX_API_KEY: i16 = 68;

pub const API_KEY_PRODUCE: i16 = 0;
pub const API_KEY_FETCH: i16 = 1;
pub const API_KEY_METADATA: i16 = 3;
pub const API_KEY_SASL_HANDSHAKE: i16 = 17;
pub const API_KEY_API_VERSIONS: i16 = 18;
pub const API_KEY_SASL_AUTHENTICATE: i16 = 36;

/// Human name for an API key, for log lines.
pub fn name_for_key(key: i16) -> &'static str {
    match key {
        0 => "Produce",
        1 => "Fetch",
        2 => "ListOffsets",
        3 => "Metadata",
        8 => "OffsetCommit",
        9 => "OffsetFetch",
        10 => "FindCoordinator",
        11 => "JoinGroup",
        12 => "Heartbeat",
        13 => "LeaveGroup",
        14 => "SyncGroup",
        17 => "SASLHandshake",
        18 => "ApiVersions",
        19 => "CreateTopics",
        20 => "DeleteTopics",
        36 => "SASLAuthenticate",
        _ => "Unknown",
    }
}

/// An encodable Kafka request.
///
/// The broker loop owns version selection: it clamps
/// [`max_version`](KafkaRequest::max_version) against the user's
/// configuration and the broker's advertised maximum, then calls
/// [`set_version`](KafkaRequest::set_version) before encoding.
pub trait KafkaRequest: Any + fmt::Debug + Send + Sync {
    /// The API key of this request.
    fn key(&self) -> i16;
    /// The highest version this client can encode.
    fn max_version(&self) -> i16;
    /// The version this request will be encoded at.
    fn version(&self) -> i16;
    fn set_version(&mut self, version: i16);
    /// Whether the chosen version uses flexible (tagged-field) encoding.
    fn is_flexible(&self) -> bool;
    /// Encode the request body (no header) at the chosen version.
    fn encode_body(&self, buffer: &mut Vec<u8>) -> Result<()>;
    /// An empty response of the matching kind, ready to decode into.
    fn response_kind(&self) -> Box<dyn KafkaResponse>;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A decodable Kafka response.
pub trait KafkaResponse: Any + fmt::Debug + Send {
    fn key(&self) -> i16;
    fn version(&self) -> i16;
    fn set_version(&mut self, version: i16);
    /// Decode a response body. `buffer` starts after the response header
    /// (correlation id and, where applicable, header tags).
    fn decode(&mut self, buffer: Bytes) -> Result<()>;
    /// `(throttle_millis, throttles_after_response)` if this response kind
    /// carries a throttle field and it was set.
    fn throttle(&self) -> Option<(i32, bool)> {
        None
    }
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// Recover the concrete response type from a [`KafkaResponse`] trait
/// object, typically after [`Broker::wait_response`].
///
/// [`Broker::wait_response`]: crate::prelude::Broker::wait_response
pub fn downcast<T: Any>(resp: Box<dyn KafkaResponse>) -> Option<Box<T>> {
    resp.into_any().downcast().ok()
}

#[derive(Debug, Clone)]
pub struct HeaderRequest<'a> {
    /// The API key of this request.
    pub api_key: i16,
    /// The API version of this request.
    pub api_version: i16,
    /// The correlation ID of this request.
    pub correlation_id: i32,
    /// The client ID string, null when unset.
    pub client_id: Option<&'a str>,
}

impl<'a> HeaderRequest<'a> {
    /// Create new header request.
    ///
    /// This goes at the beginning of every single request.
    pub fn new(
        api_key: i16,
        api_version: i16,
        correlation_id: i32,
        client_id: Option<&'a str>,
    ) -> HeaderRequest<'a> {
        HeaderRequest {
            api_key,
            api_version,
            correlation_id,
            client_id,
        }
    }
}

impl<'a> ToByte for HeaderRequest<'a> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.api_key.encode(buffer)?;
        self.api_version.encode(buffer)?;
        self.correlation_id.encode(buffer)?;
        self.client_id.encode(buffer)?;
        Ok(())
    }
}

/// Renders complete request frames.
///
/// The output is `[size][api_key][api_version][correlation_id][client_id]`
/// followed by a header tag block for flexible requests, then the body.
/// The client id stays a classic nullable string even in flexible header
/// v2, per the protocol.
#[derive(Debug, Clone, Default)]
pub struct RequestFormatter {
    pub client_id: Option<String>,
}

impl RequestFormatter {
    pub fn new(client_id: Option<String>) -> Self {
        Self { client_id }
    }

    /// Append a framed request to `buffer` at the request's chosen version
    /// with the given correlation id.
    pub fn append_request(
        &self,
        buffer: &mut Vec<u8>,
        req: &dyn KafkaRequest,
        correlation_id: i32,
    ) -> Result<()> {
        tracing::trace!(
            "Encoding {} v{} request, correlation id {}",
            name_for_key(req.key()),
            req.version(),
            correlation_id
        );
        let start = buffer.len();
        buffer.extend_from_slice(&[0, 0, 0, 0]);

        let header = HeaderRequest::new(
            req.key(),
            req.version(),
            correlation_id,
            self.client_id.as_deref(),
        );
        header.encode(buffer)?;
        if req.is_flexible() {
            put_empty_tagged_fields(buffer);
        }
        req.encode_body(buffer)?;

        let size = (buffer.len() - start - 4) as i32;
        buffer[start..start + 4].copy_from_slice(&size.to_be_bytes());
        Ok(())
    }
}
