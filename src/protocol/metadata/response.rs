//! Parsing and processing for Metadata responses.
//!
//! The response contains metadata for each partition, with
//! partitions grouped together by topic. This metadata
//! refers to brokers by their broker id. The brokers each
//! have a host and port.
//!
//! ### Protocol Def
//! ```text
//! Metadata Response (Version: 1) => [brokers] controller_id [topics]
//!   brokers => node_id host port rack
//!     node_id => INT32
//!     host => STRING
//!     port => INT32
//!     rack => NULLABLE_STRING
//!   controller_id => INT32
//!   topics => error_code name is_internal [partitions]
//!     error_code => INT16
//!     name => STRING
//!     is_internal => BOOLEAN
//!     partitions => error_code partition_index leader_id [replica_nodes] [isr_nodes]
//!       error_code => INT16
//!       partition_index => INT32
//!       leader_id => INT32
//!       replica_nodes => INT32
//!       isr_nodes => INT32
//! ```
//!
//! Version 0 lacks the rack, controller id and is_internal fields.

use std::any::Any;

use bytes::Bytes;
use nom::{
    number::complete::{be_i32, be_i8},
    IResult,
};
use nombytes::NomBytes;

use crate::{
    error::{Error, KafkaCode, Result},
    parser,
    protocol::KafkaResponse,
};

const API_KEY_METADATA: i16 = 3;

/// The base Metadata response object.
#[derive(Debug, PartialEq)]
pub struct MetadataResponse {
    version: i16,
    /// Each broker in the response.
    pub brokers: Vec<Broker>,
    /// The ID of the controller broker, or -1 when unknown. v1+.
    pub controller_id: i32,
    /// Each topic in the response.
    pub topics: Vec<Topic>,
}

impl MetadataResponse {
    /// An empty response shell to decode into at the given version.
    pub fn empty(version: i16) -> Self {
        Self {
            version,
            brokers: vec![],
            controller_id: -1,
            topics: vec![],
        }
    }
}

impl KafkaResponse for MetadataResponse {
    fn key(&self) -> i16 {
        API_KEY_METADATA
    }

    fn version(&self) -> i16 {
        self.version
    }

    fn set_version(&mut self, version: i16) {
        self.version = version;
    }

    fn decode(&mut self, buffer: Bytes) -> Result<()> {
        tracing::trace!("Parsing MetadataResponse {:?}", buffer);
        let version = self.version;
        let (_, parsed) =
            parse_metadata_response(NomBytes::new(buffer.clone()), version).map_err(|err| {
                tracing::error!("ERROR: Failed parsing MetadataResponse {:?}", err);
                tracing::error!("ERROR: MetadataResponse Bytes {:?}", buffer);
                Error::ParsingError(buffer)
            })?;
        *self = parsed;
        Ok(())
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

pub fn parse_metadata_response(
    s: NomBytes,
    version: i16,
) -> IResult<NomBytes, MetadataResponse> {
    let (s, brokers) = parser::parse_array(move |s| parse_broker(s, version))(s)?;
    let (s, controller_id) = if version >= 1 { be_i32(s)? } else { (s, -1) };
    let (s, topics) = parser::parse_array(move |s| parse_topic(s, version))(s)?;

    Ok((
        s,
        MetadataResponse {
            version,
            brokers,
            controller_id,
            topics,
        },
    ))
}

/// Each broker in the response.
#[derive(Debug, Clone, PartialEq)]
pub struct Broker {
    /// The broker ID.
    pub node_id: i32,
    /// The broker hostname.
    pub host: Bytes,
    /// The broker port.
    pub port: i32,
    /// The rack of the broker, or null if it has not been assigned to a
    /// rack. v1+.
    pub rack: Option<Bytes>,
}

fn parse_broker(s: NomBytes, version: i16) -> IResult<NomBytes, Broker> {
    let (s, node_id) = be_i32(s)?;
    let (s, host) = parser::parse_string(s)?;
    let (s, port) = be_i32(s)?;
    let (s, rack) = if version >= 1 {
        parser::parse_nullable_string(s)?
    } else {
        (s, None)
    };

    Ok((
        s,
        Broker {
            node_id,
            host,
            port,
            rack,
        },
    ))
}

/// Each topic in the response.
#[derive(Debug, Clone, PartialEq)]
pub struct Topic {
    /// The topic error, or 0 if there was no error.
    pub error_code: KafkaCode,
    /// The topic name.
    pub name: Bytes,
    /// True if the topic is internal. v1+.
    pub is_internal: bool,
    /// Each partition in the topic.
    pub partitions: Vec<Partition>,
}

fn parse_topic(s: NomBytes, version: i16) -> IResult<NomBytes, Topic> {
    let (s, error_code) = parser::parse_kafka_code(s)?;
    let (s, name) = parser::parse_string(s)?;
    let (s, is_internal) = if version >= 1 {
        let (s, internal) = be_i8(s)?;
        (s, internal != 0)
    } else {
        (s, false)
    };
    let (s, partitions) = parser::parse_array(parse_partition)(s)?;

    Ok((
        s,
        Topic {
            error_code,
            name,
            is_internal,
            partitions,
        },
    ))
}

/// Each partition in the topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// The partition error, or 0 if there was no error.
    pub error_code: KafkaCode,
    /// The partition index.
    pub partition_index: i32,
    /// The ID of the leader broker.
    pub leader_id: i32,
    /// The set of all nodes that host this partition.
    pub replica_nodes: Vec<i32>,
    /// The set of nodes that are in sync with the leader for this partition.
    pub isr_nodes: Vec<i32>,
}

fn parse_partition(s: NomBytes) -> IResult<NomBytes, Partition> {
    let (s, error_code) = parser::parse_kafka_code(s)?;
    let (s, partition_index) = be_i32(s)?;
    let (s, leader_id) = be_i32(s)?;
    let (s, replica_nodes) = parser::parse_array(be_i32)(s)?;
    let (s, isr_nodes) = parser::parse_array(be_i32)(s)?;

    Ok((
        s,
        Partition {
            error_code,
            partition_index,
            leader_id,
            replica_nodes,
            isr_nodes,
        },
    ))
}
