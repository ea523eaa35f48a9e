//! In-process scripted broker plus SASL and hook fakes shared by the
//! integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use castle::prelude::*;

/// One request frame as the scripted broker received it.
#[derive(Clone, Debug)]
pub struct ReceivedRequest {
    pub api_key: i16,
    pub api_version: i16,
    pub correlation_id: i32,
    /// The request body, after client id and (for flexible requests)
    /// header tags.
    pub body: Bytes,
}

/// What the scripted broker does with a request.
pub enum Reply {
    /// Frame the bytes as a response body, echoing the correlation id.
    Body(Vec<u8>),
    /// Write the bytes verbatim, no framing, no correlation id.
    Raw(Vec<u8>),
    /// Say nothing.
    Nothing,
}

pub type Script = Arc<dyn Fn(&ReceivedRequest) -> Reply + Send + Sync>;

/// A TCP listener that speaks just enough Kafka framing to run one
/// scripted exchange per received request. Accepts any number of
/// connections; requests across all of them land in `requests` in arrival
/// order.
pub struct ScriptedBroker {
    pub addr: BrokerAddress,
    requests: Arc<Mutex<Vec<ReceivedRequest>>>,
}

impl ScriptedBroker {
    pub async fn start(script: impl Fn(&ReceivedRequest) -> Reply + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests: Arc<Mutex<Vec<ReceivedRequest>>> = Arc::default();
        let script: Script = Arc::new(script);

        let handler_requests = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(serve_connection(
                    socket,
                    Arc::clone(&script),
                    Arc::clone(&handler_requests),
                ));
            }
        });

        Self {
            addr: BrokerAddress {
                host: "127.0.0.1".to_string(),
                port,
            },
            requests,
        }
    }

    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_keys(&self) -> Vec<i16> {
        self.requests().iter().map(|r| r.api_key).collect()
    }
}

async fn serve_connection(
    mut socket: tokio::net::TcpStream,
    script: Script,
    requests: Arc<Mutex<Vec<ReceivedRequest>>>,
) {
    loop {
        let mut size_buf = [0u8; 4];
        if socket.read_exact(&mut size_buf).await.is_err() {
            return;
        }
        let size = u32::from_be_bytes(size_buf) as usize;
        let mut frame = vec![0u8; size];
        if socket.read_exact(&mut frame).await.is_err() {
            return;
        }

        let req = parse_request(Bytes::from(frame));
        let reply = script(&req);
        requests.lock().unwrap().push(req.clone());

        let out = match reply {
            Reply::Body(body) => {
                let mut out = Vec::with_capacity(8 + body.len());
                out.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
                out.extend_from_slice(&req.correlation_id.to_be_bytes());
                out.extend_from_slice(&body);
                out
            }
            Reply::Raw(bytes) => bytes,
            Reply::Nothing => continue,
        };
        if socket.write_all(&out).await.is_err() {
            return;
        }
    }
}

fn parse_request(mut frame: Bytes) -> ReceivedRequest {
    let api_key = frame.get_i16();
    let api_version = frame.get_i16();
    let correlation_id = frame.get_i32();
    let client_id_len = frame.get_i16();
    if client_id_len > 0 {
        frame.advance(client_id_len as usize);
    }
    let flexible =
        (api_key == 18 && api_version >= 3) || (api_key == 36 && api_version >= 2);
    if flexible {
        // the client always sends an empty header tag buffer
        frame.advance(1);
    }
    ReceivedRequest {
        api_key,
        api_version,
        correlation_id,
        body: frame,
    }
}

/// The 6 byte bare `UNSUPPORTED_VERSION` body a pre-2.4 broker sends to
/// an ApiVersions version it does not know.
pub const UNSUPPORTED_VERSION_V0: [u8; 6] = [0x00, 0x23, 0x00, 0x00, 0x00, 0x00];

/// A classic (v0) ApiVersions response body advertising `(key, max)`
/// pairs with min version 0.
pub fn api_versions_v0_body(keys: &[(i16, i16)]) -> Vec<u8> {
    let mut body = vec![0, 0];
    body.extend_from_slice(&(keys.len() as i32).to_be_bytes());
    for (key, max) in keys {
        body.extend_from_slice(&key.to_be_bytes());
        body.extend_from_slice(&0i16.to_be_bytes());
        body.extend_from_slice(&max.to_be_bytes());
    }
    body
}

/// A flexible (v3) ApiVersions response body advertising `(key, max)`
/// pairs with min version 0.
pub fn api_versions_v3_body(keys: &[(i16, i16)]) -> Vec<u8> {
    let mut body = vec![0, 0];
    body.push(keys.len() as u8 + 1);
    for (key, max) in keys {
        body.extend_from_slice(&key.to_be_bytes());
        body.extend_from_slice(&0i16.to_be_bytes());
        body.extend_from_slice(&max.to_be_bytes());
        body.push(0); // element tags
    }
    body.extend_from_slice(&0i32.to_be_bytes()); // throttle
    body.push(0); // response tags
    body
}

/// A v1 Metadata response body with one broker and no topics.
pub fn metadata_v1_body(node_id: i32, host: &str, port: i32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&1i32.to_be_bytes());
    body.extend_from_slice(&node_id.to_be_bytes());
    body.extend_from_slice(&(host.len() as i16).to_be_bytes());
    body.extend_from_slice(host.as_bytes());
    body.extend_from_slice(&port.to_be_bytes());
    body.extend_from_slice(&(-1i16).to_be_bytes()); // null rack
    body.extend_from_slice(&node_id.to_be_bytes()); // controller
    body.extend_from_slice(&0i32.to_be_bytes()); // no topics
    body
}

/// A v0 Metadata response body with one broker and no topics.
pub fn metadata_v0_body(node_id: i32, host: &str, port: i32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&1i32.to_be_bytes());
    body.extend_from_slice(&node_id.to_be_bytes());
    body.extend_from_slice(&(host.len() as i16).to_be_bytes());
    body.extend_from_slice(host.as_bytes());
    body.extend_from_slice(&port.to_be_bytes());
    body.extend_from_slice(&0i32.to_be_bytes()); // no topics
    body
}

/// A v7 Produce response body acking one topic partition, with the given
/// throttle.
pub fn produce_v7_body(topic: &str, throttle_millis: i32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&1i32.to_be_bytes());
    body.extend_from_slice(&(topic.len() as i16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    body.extend_from_slice(&1i32.to_be_bytes()); // one partition
    body.extend_from_slice(&0i32.to_be_bytes()); // index
    body.extend_from_slice(&0i16.to_be_bytes()); // no error
    body.extend_from_slice(&4i64.to_be_bytes()); // base offset
    body.extend_from_slice(&(-1i64).to_be_bytes()); // log append time
    body.extend_from_slice(&0i64.to_be_bytes()); // log start offset
    body.extend_from_slice(&throttle_millis.to_be_bytes());
    body
}

/// A handshake response body: error code plus supported mechanisms.
pub fn handshake_body(error_code: i16, mechanisms: &[&str]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&error_code.to_be_bytes());
    body.extend_from_slice(&(mechanisms.len() as i32).to_be_bytes());
    for mechanism in mechanisms {
        body.extend_from_slice(&(mechanism.len() as i16).to_be_bytes());
        body.extend_from_slice(mechanism.as_bytes());
    }
    body
}

/// A v1 SaslAuthenticate response body: success with empty server bytes
/// and the given session lifetime.
pub fn authenticate_v1_body(session_lifetime_ms: i64) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0i16.to_be_bytes()); // no error
    body.extend_from_slice(&(-1i16).to_be_bytes()); // null message
    body.extend_from_slice(&0i32.to_be_bytes()); // empty auth bytes
    body.extend_from_slice(&session_lifetime_ms.to_be_bytes());
    body
}

/// A single-step mechanism: one client write, done on the first
/// challenge.
pub struct OneStepMechanism {
    pub mechanism: String,
}

#[async_trait]
impl Mechanism for OneStepMechanism {
    fn name(&self) -> &str {
        &self.mechanism
    }

    async fn authenticate(&self, _host: &str) -> Result<(Box<dyn Session>, Vec<u8>)> {
        Ok((Box::new(OneStepSession), b"initial-response".to_vec()))
    }
}

struct OneStepSession;

impl Session for OneStepSession {
    fn challenge(&mut self, _challenge: &[u8]) -> Result<(bool, Vec<u8>)> {
        Ok((true, Vec::new()))
    }
}

/// Counts hook firings; throttles keep their arguments.
#[derive(Default)]
pub struct CountingHook {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
    pub throttles: Mutex<Vec<(Duration, bool)>>,
}

impl Hook for CountingHook {
    fn on_connect(&self, _broker: &BrokerMetadata, _dial_took: Duration, _err: Option<&Error>) {
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnect(&self, _broker: &BrokerMetadata) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_write(
        &self,
        _broker: &BrokerMetadata,
        _api_key: i16,
        _bytes_written: usize,
        _write_wait: Duration,
        _time_to_write: Duration,
        _err: Option<&Error>,
    ) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_read(
        &self,
        _broker: &BrokerMetadata,
        _api_key: i16,
        _bytes_read: usize,
        _read_wait: Duration,
        _time_to_read: Duration,
        _err: Option<&Error>,
    ) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }

    fn on_throttle(
        &self,
        _broker: &BrokerMetadata,
        interval: Duration,
        throttled_after_response: bool,
    ) {
        self.throttles
            .lock()
            .unwrap()
            .push((interval, throttled_after_response));
    }
}
