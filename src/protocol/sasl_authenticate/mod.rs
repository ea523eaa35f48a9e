//! Carry SASL authentication bytes over the Kafka framing.
//!
//! After a v1 handshake, every client auth step travels inside a
//! SaslAuthenticate request and every server challenge comes back in the
//! response. The v1+ response also carries the session lifetime that
//! drives re-authentication (KIP-368).

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
    fn encode_v1() {
        let b = [0, 0, 0, 3, 1, 2, 3];

        let mut req = request::SaslAuthenticateRequest::new(Bytes::from_static(&[1, 2, 3]));
        req.set_version(1);
        let mut buffer: Vec<u8> = vec![];
        req.encode_body(&mut buffer).unwrap();

        assert_eq!(buffer, b);
    }

    #[test]
    fn encode_v2_compact() {
        let b = [4, 1, 2, 3, 0];

        let mut req = request::SaslAuthenticateRequest::new(Bytes::from_static(&[1, 2, 3]));
        req.set_version(2);
        let mut buffer: Vec<u8> = vec![];
        req.encode_body(&mut buffer).unwrap();

        assert_eq!(buffer, b);
    }

    #[test]
    fn parse_v1() {
        let buf = [
            0, 0, // no error
            255, 255, // null error message
            0, 0, 0, 2, 9, 9, // auth bytes
            0, 0, 0, 0, 0, 0, 23, 112, // session lifetime 6000ms
        ];

        let mut resp = response::SaslAuthenticateResponse::empty(1);
        resp.decode(Bytes::copy_from_slice(&buf)).unwrap();

        assert_eq!(resp.error_code, KafkaCode::None);
        assert_eq!(resp.error_message, None);
        assert_eq!(resp.auth_bytes, Bytes::from_static(&[9, 9]));
        assert_eq!(resp.session_lifetime_ms, 6000);
    }

    #[test]
    fn parse_v0_has_no_lifetime() {
        let buf = [
            0, 58, // sasl authentication failed
            0, 3, b'b', b'a', b'd', // error message
            0, 0, 0, 0, // empty auth bytes
        ];

        let mut resp = response::SaslAuthenticateResponse::empty(0);
        resp.decode(Bytes::copy_from_slice(&buf)).unwrap();

        assert_eq!(resp.error_code, KafkaCode::SaslAuthenticationFailed);
        assert_eq!(resp.error_message, Some(Bytes::from_static(b"bad")));
        assert_eq!(resp.session_lifetime_ms, 0);
    }
}
