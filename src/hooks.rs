//! Observer hooks for connection lifecycle and I/O.
//!
//! Hooks are fired best-effort at fixed points: dialing, disconnect,
//! every request write, every response read, and server throttling.
//! They exist for metrics; nothing in the request flow depends on them.

use std::time::Duration;

use crate::{broker::BrokerMetadata, error::Error};

/// Callbacks observing broker connection activity.
///
/// All methods default to no-ops; implement the ones of interest and
/// register the hook in the client configuration.
pub trait Hook: Send + Sync {
    /// Fired when a connection to a broker is dialed, successfully or not,
    /// with the time the dial took.
    fn on_connect(&self, _broker: &BrokerMetadata, _dial_took: Duration, _err: Option<&Error>) {}

    /// Fired when a connection is closed.
    fn on_disconnect(&self, _broker: &BrokerMetadata) {}

    /// Fired when a request has been written. `write_wait` is the time
    /// between enqueueing and the write starting; `time_to_write` is the
    /// time the write itself took.
    fn on_write(
        &self,
        _broker: &BrokerMetadata,
        _api_key: i16,
        _bytes_written: usize,
        _write_wait: Duration,
        _time_to_write: Duration,
        _err: Option<&Error>,
    ) {
    }

    /// Fired when a response has been read. `read_wait` is the time
    /// between expecting the response and the read starting;
    /// `time_to_read` is the time the read itself took.
    fn on_read(
        &self,
        _broker: &BrokerMetadata,
        _api_key: i16,
        _bytes_read: usize,
        _read_wait: Duration,
        _time_to_read: Duration,
        _err: Option<&Error>,
    ) {
    }

    /// Fired when a response carries a non-zero throttle interval.
    /// `throttled_after_response` is true for brokers that throttle after
    /// sending the response (post-2.0 behavior), in which case the client
    /// holds its next write on that connection until the interval passes.
    fn on_throttle(
        &self,
        _broker: &BrokerMetadata,
        _interval: Duration,
        _throttled_after_response: bool,
    ) {
    }
}
