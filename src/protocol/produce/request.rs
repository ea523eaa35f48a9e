//! Encoding and creation for Produce requests.
//!
//! ### Protocol Def
//! ```text
//! Produce Request (Version: 3) => transactional_id acks timeout [topic_data]
//!   transactional_id => NULLABLE_STRING
//!   acks => INT16
//!   timeout => INT32
//!   topic_data => topic [data]
//!     topic => STRING
//!     data => partition record_set
//!       partition => INT32
//!       record_set => RECORDS
//! ```
//!
//! The transactional id exists from v3. Record sets are pre-encoded
//! batches supplied by the caller and written verbatim.

use std::any::Any;

use bytes::Bytes;

use crate::{
    encode::{encode_as_array, ToByte},
    error::Result,
    protocol::{produce::response::ProduceResponse, KafkaRequest, KafkaResponse},
};

const API_KEY_PRODUCE: i16 = 0;
const MAX_VERSION: i16 = 7;

/// The base Produce request object.
///
/// Before this request is written, the broker loop overwrites
/// [`acks`](ProduceRequest::acks) with the client's configured value, and
/// with acks 0 also overwrites [`timeout_ms`](ProduceRequest::timeout_ms)
/// with the client's produce timeout.
#[derive(Debug)]
pub struct ProduceRequest {
    version: i16,
    /// The transactional ID of the producer, or null for non-transactional
    /// producers. v3+.
    pub transactional_id: Option<String>,
    /// The number of acknowledgments the producer requires the leader to
    /// have received before considering a request complete. Allowed
    /// values: 0 for no acknowledgments, 1 for only the leader and -1 for
    /// the full ISR.
    pub acks: i16,
    /// The timeout to await a response in milliseconds.
    pub timeout_ms: i32,
    /// Each topic to produce to.
    pub topics: Vec<TopicProduceData>,
}

/// Produce data for one topic.
#[derive(Debug)]
pub struct TopicProduceData {
    /// The topic name.
    pub name: String,
    /// Each partition to produce to.
    pub partitions: Vec<PartitionProduceData>,
}

/// Produce data for one partition.
#[derive(Debug)]
pub struct PartitionProduceData {
    /// The partition index.
    pub index: i32,
    /// The pre-encoded record batch, written verbatim.
    pub records: Option<Bytes>,
}

impl ProduceRequest {
    pub fn new(acks: i16, timeout_ms: i32) -> Self {
        Self {
            version: MAX_VERSION,
            transactional_id: None,
            acks,
            timeout_ms,
            topics: vec![],
        }
    }

    /// Add a pre-encoded record batch for a topic partition.
    pub fn add(&mut self, topic: &str, partition: i32, records: Option<Bytes>) {
        match self.topics.iter_mut().find(|t| t.name == topic) {
            Some(t) => t.partitions.push(PartitionProduceData {
                index: partition,
                records,
            }),
            None => self.topics.push(TopicProduceData {
                name: topic.to_string(),
                partitions: vec![PartitionProduceData {
                    index: partition,
                    records,
                }],
            }),
        }
    }
}

impl KafkaRequest for ProduceRequest {
    fn key(&self) -> i16 {
        API_KEY_PRODUCE
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
        tracing::trace!("Encoding ProduceRequest {:?}", self);
        if self.version >= 3 {
            self.transactional_id.as_deref().encode(buffer)?;
        }
        self.acks.encode(buffer)?;
        self.timeout_ms.encode(buffer)?;
        encode_as_array(buffer, &self.topics, |buffer, topic| {
            topic.name.encode(buffer)?;
            encode_as_array(buffer, &topic.partitions, |buffer, partition| {
                partition.index.encode(buffer)?;
                partition.records.encode(buffer)?;
                Ok(())
            })
        })?;
        Ok(())
    }

    fn response_kind(&self) -> Box<dyn KafkaResponse> {
        Box::new(ProduceResponse::empty(self.version))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
