//! Negotiate the SASL mechanism for a connection.
//!
//! The client names the mechanism it wants; the broker either accepts or
//! replies `UnsupportedSaslMechanism` along with the mechanisms it does
//! support, which the connection uses to retry once with an intersecting
//! mechanism. At handshake v1 the following authentication bytes travel
//! wrapped in SaslAuthenticate requests; at v0 they are exchanged raw.

pub mod request;
pub mod response;
