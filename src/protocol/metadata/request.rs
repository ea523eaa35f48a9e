//! Encoding and creation for Metadata requests.
//!
//! ### Protocol Def
//! ```text
//! Metadata Request (Version: 1) => [topics]
//!   topics => name
//!   name => STRING
//! ```
//!
//! Versions 0 and 1 share the body.

use std::any::Any;

use crate::{
    encode::{AsStrings, ToByte},
    error::Result,
    protocol::{metadata::response::MetadataResponse, KafkaRequest, KafkaResponse},
};

const API_KEY_METADATA: i16 = 3;
const MAX_VERSION: i16 = 1;

/// The base Metadata request object.
#[derive(Debug)]
pub struct MetadataRequest {
    version: i16,
    /// The topics to fetch metadata for.
    pub topics: Vec<String>,
}

impl MetadataRequest {
    pub fn new(topics: Vec<String>) -> Self {
        Self {
            version: MAX_VERSION,
            topics,
        }
    }
}

impl KafkaRequest for MetadataRequest {
    fn key(&self) -> i16 {
        API_KEY_METADATA
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
        AsStrings(&self.topics).encode(buffer)?;
        Ok(())
    }

    fn response_kind(&self) -> Box<dyn KafkaResponse> {
        Box::new(MetadataResponse::empty(self.version))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
