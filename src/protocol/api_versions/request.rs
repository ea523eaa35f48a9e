//! Encoding and creation for ApiVersions requests.
//!
//! ### Protocol Def
//! ```text
//! ApiVersions Request (Version: 3) => client_software_name client_software_version TAG_BUFFER
//!   client_software_name => COMPACT_STRING
//!   client_software_version => COMPACT_STRING
//! ```
//!
//! Versions 0 through 2 have an empty body. Version 3 is flexible.

use std::any::Any;

use crate::{
    encode::{put_empty_tagged_fields, CompactString, ToByte},
    error::Result,
    protocol::{api_versions::response::ApiVersionsResponse, KafkaRequest, KafkaResponse},
};

const API_KEY_API_VERSIONS: i16 = 18;
const MAX_VERSION: i16 = 3;

/// The base ApiVersions request object.
///
/// The software name and version are reported to the broker for its
/// client-metrics bookkeeping.
#[derive(Debug)]
pub struct ApiVersionsRequest {
    version: i16,
    /// Name of the software issuing the request.
    pub client_software_name: String,
    /// Version of the software issuing the request.
    pub client_software_version: String,
}

impl ApiVersionsRequest {
    /// Create a new ApiVersions request at the highest version we speak.
    pub fn new(client_software_name: &str, client_software_version: &str) -> Self {
        Self {
            version: MAX_VERSION,
            client_software_name: client_software_name.to_string(),
            client_software_version: client_software_version.to_string(),
        }
    }
}

impl KafkaRequest for ApiVersionsRequest {
    fn key(&self) -> i16 {
        API_KEY_API_VERSIONS
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
        self.version >= 3
    }

    fn encode_body(&self, buffer: &mut Vec<u8>) -> Result<()> {
        if self.version >= 3 {
            CompactString(&self.client_software_name).encode(buffer)?;
            CompactString(&self.client_software_version).encode(buffer)?;
            put_empty_tagged_fields(buffer);
        }
        Ok(())
    }

    fn response_kind(&self) -> Box<dyn KafkaResponse> {
        Box::new(ApiVersionsResponse::empty(self.version))
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
