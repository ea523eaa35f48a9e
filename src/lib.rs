//! # Castle
//! Rust-native Kafka broker connection layer.
//!
//! This crate is the part of a Kafka client that talks to a single
//! broker: it owns the TCP (or TLS) connections, negotiates protocol
//! versions, authenticates over SASL (including in-place
//! re-authentication), frames and correlates requests and responses,
//! honors server throttling, and reaps idle connections. Producer and
//! consumer state machines, metadata discovery, batching and the full
//! message codec set live above it and talk to it through a small trait
//! surface.
//!
//! ## Goals
//! - Pipelined writes with asynchronous reads: per broker, one writer
//!   task serializes requests across up to three connections (produce /
//!   fetch / everything else) while each connection's reader consumes
//!   responses in correlation order
//! - Every submitted request resolves its callback exactly once, even
//!   through connection death, broker stop and client shutdown
//! - Leverage best in class libraries such as Tokio, Nom to do the heavy
//!   lifting
//!
//! ## Getting started
//! Build a [`ClientContext`](prelude::ClientContext) from a
//! [`ClientConfig`](prelude::ClientConfig), mint a broker, and issue
//! requests:
//! ```rust,no_run
//! # async fn run() -> castle::prelude::Result<()> {
//! use castle::prelude::*;
//!
//! let ctx = ClientContext::new(ClientConfig::default());
//! let broker = ctx.new_broker(unknown_seed_id(0), "localhost", 9092, None);
//!
//! let req = protocol::MetadataRequest::new(vec!["my-topic".to_string()]);
//! let resp = broker.wait_response(None, Box::new(req)).await?;
//! let metadata = castle::prelude::protocol::downcast::<protocol::MetadataResponse>(resp);
//! println!("{:?}", metadata);
//! # Ok(())
//! # }
//! ```
//!
//! Requests submitted with [`Broker::issue`](prelude::Broker::issue)
//! resolve a callback instead of blocking, which is what the layers
//! above build their retry and routing logic on.
//!
//! ## Resources
//! - [Kafka Protocol Spec](https://kafka.apache.org/protocol.html)
//! - [KIP-368: schedulable SASL re-authentication](https://cwiki.apache.org/confluence/display/KAFKA/KIP-368)

mod broker;
mod client;
mod connection;
mod encode;
mod error;
mod hooks;
mod network;
mod parser;
mod protocol;
mod sasl;
mod utils;

pub mod prelude {
    //! Main export of various structures and methods
    //!
    //! The pieces fit together like this:
    //! - a [`ClientContext`] holds the configuration, the shutdown
    //!   signal, and the broker set the reaper sweeps
    //! - [`ClientContext::new_broker`] mints a [`Broker`] per identity;
    //!   each broker lazily dials its connections and runs one writer
    //!   task
    //! - requests go in through [`Broker::issue`] (callback) or
    //!   [`Broker::wait_response`] (blocking); both guarantee the
    //!   promise resolves exactly once
    //! - transports are injected via [`DialFn`]: plaintext
    //!   [`tcp_dial_fn`], TLS [`tls_dial_fn`], or anything implementing
    //!   [`Conn`]
    //! - SASL mechanisms plug in through the [`Mechanism`] and
    //!   [`Session`] traits
    //! - metrics tap in through [`Hook`]

    pub use crate::broker::{
        unknown_seed_id, Broker, BrokerMetadata, ResponsePromise, UNKNOWN_CONTROLLER_ID,
    };
    pub use crate::client::{ClientConfig, ClientContext, ConnTimeoutFn, VersionPolicy};
    pub use crate::error::{Error, KafkaCode, Result};
    pub use crate::hooks::Hook;
    pub use crate::network::tls::{tls_dial_fn, TlsOptions};
    pub use crate::network::{tcp_dial_fn, BoxedConn, BrokerAddress, Conn, DialFn, DialFuture};
    pub use crate::sasl::{Mechanism, Session};

    pub use bytes;

    pub mod encode {
        pub use crate::encode::*;
    }

    pub mod protocol {
        pub use crate::protocol::*;
    }
}
