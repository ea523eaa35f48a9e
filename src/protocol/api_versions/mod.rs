//! Discover the API versions a broker can speak.
//!
//! This is the first request on every new connection. The response lists,
//! per API key, the minimum and maximum versions the broker accepts; the
//! connection clamps every later request against that table.
//!
//! Two quirks live here. The response header is never flexible, even at
//! v3 where the body is, so that a client probing with a too-new version
//! can still index into the error code at a fixed offset. And brokers
//! older than 2.4 reply to an unknown version with a bare v0
//! `UNSUPPORTED_VERSION` body, which the connection recognizes by its
//! literal bytes and retries at v0.

pub mod request;
pub mod response;
