//! Parsing and processing for Produce responses.
//!
//! Note, the request needs to have a non-zero value for `acks` to receive
//! a response at all.
//!
//! ### Protocol Def
//! ```text
//! Produce Response (Version: 6) => [responses] throttle_time_ms
//!   responses => name [partition_responses]
//!     name => STRING
//!     partition_responses => index error_code base_offset log_append_time_ms log_start_offset
//!       index => INT32
//!       error_code => INT16
//!       base_offset => INT64
//!       log_append_time_ms => INT64
//!       log_start_offset => INT64
//! ```
//!
//! Log append time exists from v2, log start offset from v5, throttle
//! millis from v1. From v6 the broker throttles after sending the
//! response rather than before.

use std::any::Any;

use bytes::Bytes;
use nom::{
    number::complete::{be_i32, be_i64},
    IResult,
};
use nombytes::NomBytes;

use crate::{
    error::{Error, KafkaCode, Result},
    parser,
    protocol::KafkaResponse,
};

const API_KEY_PRODUCE: i16 = 0;

/// The base Produce response object.
#[derive(Debug, PartialEq)]
pub struct ProduceResponse {
    version: i16,
    /// Each produce response.
    pub responses: Vec<TopicResponse>,
    /// Duration in milliseconds for which the request was throttled. v1+.
    pub throttle_time_ms: i32,
}

/// Responses for one topic.
#[derive(Debug, PartialEq)]
pub struct TopicResponse {
    /// The topic name.
    pub name: Bytes,
    /// Each partition that we produced to within the topic.
    pub partition_responses: Vec<PartitionResponse>,
}

/// The response for one partition.
#[derive(Debug, PartialEq)]
pub struct PartitionResponse {
    /// The partition index.
    pub index: i32,
    /// The error code, or 0 if there was no error.
    pub error_code: KafkaCode,
    /// The base offset.
    pub base_offset: i64,
    /// The broker-assigned append time, or -1 for create time. v2+.
    pub log_append_time_ms: i64,
    /// The partition's start offset at append time. v5+.
    pub log_start_offset: i64,
}

impl ProduceResponse {
    /// An empty response shell at the given version.
    ///
    /// Besides decoding, this is what an acks-0 produce promise resolves
    /// with, since the broker never replies.
    pub fn empty(version: i16) -> Self {
        Self {
            version,
            responses: vec![],
            throttle_time_ms: 0,
        }
    }
}

impl KafkaResponse for ProduceResponse {
    fn key(&self) -> i16 {
        API_KEY_PRODUCE
    }

    fn version(&self) -> i16 {
        self.version
    }

    fn set_version(&mut self, version: i16) {
        self.version = version;
    }

    fn decode(&mut self, buffer: Bytes) -> Result<()> {
        tracing::trace!("Parsing ProduceResponse {:?}", buffer);
        let version = self.version;
        let (_, parsed) =
            parse_produce_response(NomBytes::new(buffer.clone()), version).map_err(|err| {
                tracing::error!("ERROR: Failed parsing ProduceResponse {:?}", err);
                tracing::error!("ERROR: ProduceResponse Bytes {:?}", buffer);
                Error::ParsingError(buffer)
            })?;
        *self = parsed;
        Ok(())
    }

    fn throttle(&self) -> Option<(i32, bool)> {
        if self.version >= 1 {
            Some((self.throttle_time_ms, self.version >= 6))
        } else {
            None
        }
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

pub fn parse_produce_response(
    s: NomBytes,
    version: i16,
) -> IResult<NomBytes, ProduceResponse> {
    let (s, responses) = parser::parse_array(move |s| parse_topic_response(s, version))(s)?;
    let (s, throttle_time_ms) = if version >= 1 { be_i32(s)? } else { (s, 0) };

    Ok((
        s,
        ProduceResponse {
            version,
            responses,
            throttle_time_ms,
        },
    ))
}

fn parse_topic_response(s: NomBytes, version: i16) -> IResult<NomBytes, TopicResponse> {
    let (s, name) = parser::parse_string(s)?;
    let (s, partition_responses) =
        parser::parse_array(move |s| parse_partition_response(s, version))(s)?;

    Ok((
        s,
        TopicResponse {
            name,
            partition_responses,
        },
    ))
}

fn parse_partition_response(s: NomBytes, version: i16) -> IResult<NomBytes, PartitionResponse> {
    let (s, index) = be_i32(s)?;
    let (s, error_code) = parser::parse_kafka_code(s)?;
    let (s, base_offset) = be_i64(s)?;
    let (s, log_append_time_ms) = if version >= 2 { be_i64(s)? } else { (s, -1) };
    let (s, log_start_offset) = if version >= 5 { be_i64(s)? } else { (s, -1) };

    Ok((
        s,
        PartitionResponse {
            index,
            error_code,
            base_offset,
            log_append_time_ms,
            log_start_offset,
        },
    ))
}
