//! Send records to a broker.
//!
//! The record batches themselves are opaque here; batching and compression
//! belong to the layers above. What this subsystem cares about is the
//! `acks` field, which the broker loop rewrites to the client's configured
//! value: with acks 0 the broker never replies, so the request is answered
//! locally with an empty response and the connection runs a discard
//! reader.

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
    fn encode_v3() {
        let b = [
            255, 255, // null transactional id
            0, 1, // acks
            0, 0, 3, 232, // timeout 1000
            0, 0, 0, 1, // one topic
            0, 6, b't', b'e', b's', b't', b'e', b'r', // name
            0, 0, 0, 1, // one partition
            0, 0, 0, 3, // index
            0, 0, 0, 2, 9, 9, // records
        ];

        let mut req = request::ProduceRequest::new(1, 1000);
        req.add("tester", 3, Some(Bytes::from_static(&[9, 9])));
        req.set_version(3);

        let mut buffer: Vec<u8> = vec![];
        req.encode_body(&mut buffer).unwrap();

        assert_eq!(buffer, b);
    }

    #[test]
    fn encode_v0_has_no_transactional_id() {
        let mut req = request::ProduceRequest::new(1, 1000);
        req.set_version(0);

        let mut buffer: Vec<u8> = vec![];
        req.encode_body(&mut buffer).unwrap();

        assert_eq!(buffer, [0, 1, 0, 0, 3, 232, 0, 0, 0, 0]);
    }

    #[test]
    fn parse_v0() {
        let buf = b"\0\0\0\x01\0\x06tester\0\0\0\x01\0\0\0\0\0\0\0\0\0\0\0\0\0\x04";

        let mut resp = response::ProduceResponse::empty(0);
        resp.decode(Bytes::from_static(buf)).unwrap();

        assert_eq!(resp.responses.len(), 1);
        assert_eq!(resp.responses[0].name, Bytes::from_static(b"tester"));
        let partition = &resp.responses[0].partition_responses[0];
        assert_eq!(partition.index, 0);
        assert_eq!(partition.error_code, KafkaCode::None);
        assert_eq!(partition.base_offset, 4);
        assert_eq!(resp.throttle(), None);
    }

    #[test]
    fn parse_v6_reports_throttle_after_response() {
        let buf = [
            0, 0, 0, 1, // one topic
            0, 6, b't', b'e', b's', b't', b'e', b'r', // name
            0, 0, 0, 1, // one partition
            0, 0, 0, 0, // index
            0, 0, // no error
            0, 0, 0, 0, 0, 0, 0, 4, // base offset
            255, 255, 255, 255, 255, 255, 255, 255, // log append time -1
            0, 0, 0, 0, 0, 0, 0, 0, // log start offset
            0, 0, 3, 232, // throttle 1000ms
        ];

        let mut resp = response::ProduceResponse::empty(6);
        resp.decode(Bytes::copy_from_slice(&buf)).unwrap();

        assert_eq!(resp.throttle_time_ms, 1000);
        assert_eq!(resp.throttle(), Some((1000, true)));
    }
}
