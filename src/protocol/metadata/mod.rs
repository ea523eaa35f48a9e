//! Describes the currently available brokers, their host and port
//! information, and gives information about which broker hosts
//! which partitions.
//!
//! This API answers the following questions:
//! - What topics exist?
//! - How many partitions does each topic have?
//! - Which broker is currently the leader for each partition?
//! - What is the host and port for each of these brokers?
//!
//! This is the only request that can be addressed to any broker
//! in the cluster.
//!
//! Since there may be many topics the client can give an
//! optional list of topic names in order to only return metadata
//! for a subset of topics.

pub mod request;
pub mod response;

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use super::*;
    use crate::{
        error::KafkaCode,
        protocol::{KafkaRequest, KafkaResponse},
    };

    #[test]
    fn encode() {
        let b = [0, 0, 0, 1, 0, 9, 112, 117, 114, 99, 104, 97, 115, 101, 115];

        let mut req = request::MetadataRequest::new(vec!["purchases".to_string()]);
        req.set_version(0);

        let mut buffer: Vec<u8> = vec![];
        req.encode_body(&mut buffer).unwrap();

        assert_eq!(buffer, b);
    }

    #[test]
    fn parse_v0() {
        let buf = [
            0, 0, 0, 1, // one broker
            0, 0, 0, 1, 0, 9, 108, 111, 99, 97, 108, 104, 111, 115, 116, 0, 0, 35,
            132, // broker 1 localhost:9092
            0, 0, 0, 1, // one topic
            0, 0, // no error
            0, 9, 112, 117, 114, 99, 104, 97, 115, 101, 115, // purchases
            0, 0, 0, 1, // one partition
            0, 0, // no error
            0, 0, 0, 0, // index 0
            0, 0, 0, 1, // leader 1
            0, 0, 0, 1, 0, 0, 0, 1, // replicas [1]
            0, 0, 0, 1, 0, 0, 0, 1, // isr [1]
        ];

        let mut resp = response::MetadataResponse::empty(0);
        resp.decode(Bytes::copy_from_slice(&buf)).unwrap();

        assert_eq!(resp.brokers.len(), 1);
        assert_eq!(resp.brokers[0].node_id, 1);
        assert_eq!(resp.brokers[0].host, Bytes::from_static(b"localhost"));
        assert_eq!(resp.brokers[0].port, 9092);
        assert_eq!(resp.brokers[0].rack, None);
        assert_eq!(resp.topics.len(), 1);
        assert_eq!(resp.topics[0].error_code, KafkaCode::None);
        assert_eq!(resp.topics[0].partitions[0].leader_id, 1);
    }

    #[test]
    fn parse_v1_carries_rack_and_controller() {
        let buf = [
            0, 0, 0, 1, // one broker
            0, 0, 0, 2, // node 2
            0, 9, 108, 111, 99, 97, 108, 104, 111, 115, 116, // localhost
            0, 0, 35, 133, // port 9093
            0, 4, b'e', b'a', b's', b't', // rack
            0, 0, 0, 2, // controller id
            0, 0, 0, 0, // no topics
        ];

        let mut resp = response::MetadataResponse::empty(1);
        resp.decode(Bytes::copy_from_slice(&buf)).unwrap();

        assert_eq!(resp.brokers[0].rack, Some(Bytes::from_static(b"east")));
        assert_eq!(resp.controller_id, 2);
    }
}
