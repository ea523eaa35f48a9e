//! Connection & communication with a broker.
//!
//! # Network Module
//!
//! Kafka uses a binary protocol over TCP. The protocol defines all APIs as
//! request response message pairs. All messages are size delimited.
//!
//! The client initiates a socket connection and then writes a sequence of
//! request messages and reads back the corresponding response message. No
//! handshake is required on connection or disconnection.
//!
//! The server guarantees that on a single TCP connection, requests will
//! be processed in the order they are sent and responses will return in
//! that order as well. This client pipelines: the broker's writer task
//! keeps sending requests while each connection's reader task consumes
//! responses in the same order, matched by correlation id.
//!
//! The transport itself is injected: brokers dial through a [`DialFn`],
//! so plaintext TCP ([`tcp_dial_fn`]) and TLS ([`tls::tls_dial_fn`]) are
//! interchangeable and tests can supply their own.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::{Error, Result};

pub mod tls;

/// Host and port of a broker, as configured or discovered.
#[derive(Clone, Debug, PartialEq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A bidirectional byte stream to a broker.
///
/// Blanket-implemented; `TcpStream`, TLS streams, and in-process duplex
/// pipes all qualify.
pub trait Conn: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Conn for T {}

pub type BoxedConn = Box<dyn Conn>;

pub type DialFuture = Pin<Box<dyn Future<Output = Result<BoxedConn>> + Send>>;

/// Opens a transport to a broker address. Injected through the client
/// configuration so TLS and test transports slot in without the
/// connection code knowing.
pub type DialFn = Arc<dyn Fn(BrokerAddress) -> DialFuture + Send + Sync>;

/// A plaintext TCP dialer.
pub fn tcp_dial_fn() -> DialFn {
    Arc::new(|addr: BrokerAddress| -> DialFuture {
        Box::pin(async move {
            tracing::debug!("Connecting to {}", addr);
            let stream = TcpStream::connect((addr.host.as_str(), addr.port))
                .await
                .map_err(|e| Error::Dial(e.kind()))?;
            Ok(Box::new(stream) as BoxedConn)
        })
    })
}
