//! SASL mechanism surface.
//!
//! Mechanism implementations (PLAIN, SCRAM, OAUTHBEARER, GSSAPI, ...) live
//! outside this crate; connections only drive the challenge/response loop.
//! A connection asks the configured [`Mechanism`] for a [`Session`] plus
//! the first client-sent bytes, then alternates server challenges and
//! client writes until the session reports done.
//!
//! Some mechanisms consume one final server response after reporting done;
//! the connection's loop allows that. A mechanism that does not must still
//! return an empty next-write alongside `done` to terminate cleanly.

use async_trait::async_trait;

use crate::error::Result;

/// A SASL mechanism the client can authenticate with.
///
/// Mechanisms are configured in preference order; the first one the broker
/// supports wins.
#[async_trait]
pub trait Mechanism: Send + Sync {
    /// The mechanism name sent in the handshake, e.g. `SCRAM-SHA-256`.
    fn name(&self) -> &str;

    /// Begin an authentication session against the named host, returning
    /// the session state and the first client write. The first write must
    /// be non-empty; Kafka SASL is client-first.
    async fn authenticate(&self, host: &str) -> Result<(Box<dyn Session>, Vec<u8>)>;
}

/// In-flight authentication state for one connection.
pub trait Session: Send {
    /// Step the exchange with a server challenge, returning whether the
    /// exchange is complete and the next client write (empty when there
    /// is nothing more to say).
    fn challenge(&mut self, challenge: &[u8]) -> Result<(bool, Vec<u8>)>;
}
