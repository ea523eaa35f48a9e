//! Client-wide context shared by every broker and connection.
//!
//! The context owns the configuration (consumed read-only), the
//! process-wide shutdown signal, the encode buffer pool, and the set of
//! live brokers the connection reaper sweeps. Higher layers create one
//! context, mint brokers from it, and spawn
//! [`reap_connections_loop`](ClientContext::reap_connections_loop) once.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{
    broker::Broker,
    hooks::Hook,
    network::{tcp_dial_fn, DialFn},
    protocol::{KafkaRequest, RequestFormatter},
    sasl::Mechanism,
};

const DEFAULT_CLIENT_ID: &str = "castle";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Returns the read and write timeouts to apply to a request.
pub type ConnTimeoutFn = Arc<dyn Fn(&dyn KafkaRequest) -> (Duration, Duration) + Send + Sync>;

/// Per-API-key version bounds configured by the user.
///
/// As a max policy it doubles as an allow-list: a request whose key is
/// absent is rejected outright, and key 18 being absent skips ApiVersions
/// discovery entirely.
#[derive(Clone, Debug, Default)]
pub struct VersionPolicy {
    versions: HashMap<i16, i16>,
}

impl VersionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bound for one API key.
    pub fn with(mut self, key: i16, version: i16) -> Self {
        self.versions.insert(key, version);
        self
    }

    pub fn has_key(&self, key: i16) -> bool {
        self.versions.contains_key(&key)
    }

    pub fn lookup(&self, key: i16) -> Option<i16> {
        self.versions.get(&key).copied()
    }
}

/// Configuration consumed read-only by brokers and connections.
#[derive(Clone)]
pub struct ClientConfig {
    /// Name reported in ApiVersions requests.
    pub software_name: String,
    /// Version reported in ApiVersions requests.
    pub software_version: String,
    /// Opens transports to brokers; swap for [`tls_dial_fn`] or a test
    /// transport.
    ///
    /// [`tls_dial_fn`]: crate::network::tls::tls_dial_fn
    pub dial_fn: DialFn,
    /// Renders request frames; owns the client id.
    pub formatter: RequestFormatter,
    /// Read and write timeouts per request.
    pub conn_timeout_fn: ConnTimeoutFn,
    /// Optional per-key maximum versions; doubles as a request allow-list.
    pub max_versions: Option<VersionPolicy>,
    /// Optional per-key minimum versions; brokers below them are rejected
    /// as too old.
    pub min_versions: Option<VersionPolicy>,
    /// SASL mechanisms in preference order; empty disables SASL.
    pub sasls: Vec<Arc<dyn Mechanism>>,
    /// The acks value rewritten into every produce request.
    pub required_acks: i16,
    /// Timeout rewritten into acks-0 produce requests, and the body read
    /// deadline of the discard reader.
    pub produce_timeout: Duration,
    /// Connections idle longer than this are reaped.
    pub conn_idle_timeout: Duration,
    /// Response frames larger than this kill the connection.
    pub max_broker_read_bytes: i32,
    /// Observer hooks, fired best-effort.
    pub hooks: Vec<Arc<dyn Hook>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            software_name: env!("CARGO_PKG_NAME").to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            dial_fn: tcp_dial_fn(),
            formatter: RequestFormatter::new(Some(DEFAULT_CLIENT_ID.to_string())),
            conn_timeout_fn: Arc::new(|_req| (DEFAULT_TIMEOUT, DEFAULT_TIMEOUT)),
            max_versions: None,
            min_versions: None,
            sasls: vec![],
            required_acks: -1,
            produce_timeout: Duration::from_secs(10),
            conn_idle_timeout: Duration::from_secs(20),
            max_broker_read_bytes: 100 << 20,
            hooks: vec![],
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("software_name", &self.software_name)
            .field("software_version", &self.software_version)
            .field("client_id", &self.formatter.client_id)
            .field(
                "sasls",
                &self.sasls.iter().map(|m| m.name().to_string()).collect::<Vec<_>>(),
            )
            .field("required_acks", &self.required_acks)
            .field("produce_timeout", &self.produce_timeout)
            .field("conn_idle_timeout", &self.conn_idle_timeout)
            .field("max_broker_read_bytes", &self.max_broker_read_bytes)
            .finish_non_exhaustive()
    }
}

/// The innards every broker and connection holds a handle to: the
/// read-only configuration, the shutdown signal, and the buffer pool.
pub(crate) struct ClientCore {
    pub(crate) cfg: ClientConfig,
    shutdown: CancellationToken,
    buf_pool: BufPool,
}

impl ClientCore {
    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn buf_pool(&self) -> &BufPool {
        &self.buf_pool
    }
}

/// Shared state behind every broker of one logical client.
pub struct ClientContext {
    core: Arc<ClientCore>,
    brokers: Mutex<Vec<Arc<Broker>>>,
}

impl ClientContext {
    pub fn new(cfg: ClientConfig) -> Arc<Self> {
        Arc::new(Self {
            core: Arc::new(ClientCore {
                cfg,
                shutdown: CancellationToken::new(),
                buf_pool: BufPool::new(),
            }),
            brokers: Mutex::new(vec![]),
        })
    }

    /// The configuration this client was built with.
    pub fn cfg(&self) -> &ClientConfig {
        &self.core.cfg
    }

    /// Create a broker for the given identity and start its writer task.
    /// The broker is registered with the connection reaper.
    pub fn new_broker(
        &self,
        node_id: i32,
        host: &str,
        port: i32,
        rack: Option<String>,
    ) -> Arc<Broker> {
        let broker = Broker::new(Arc::clone(&self.core), node_id, host, port, rack);
        self.brokers.lock().unwrap().push(Arc::clone(&broker));
        broker
    }

    /// Begin client shutdown. In-flight writes and reads abort with
    /// [`ClientClosing`](crate::error::Error::ClientClosing).
    pub fn shutdown(&self) {
        self.core.shutdown.cancel();
    }

    /// Kill connections that have sat idle for a full
    /// `conn_idle_timeout`, once per tick of the same interval, until
    /// shutdown. Spawn this once per client.
    pub async fn reap_connections_loop(&self) {
        let idle_timeout = self.core.cfg.conn_idle_timeout;
        let mut ticker = tokio::time::interval(idle_timeout);
        ticker.tick().await; // the first tick is immediate
        loop {
            tokio::select! {
                _ = self.core.shutdown.cancelled() => return,
                _ = ticker.tick() => self.reap_connections(idle_timeout),
            }
        }
    }

    fn reap_connections(&self, idle_timeout: Duration) {
        for broker in self.brokers.lock().unwrap().iter() {
            broker.reap_connections(idle_timeout);
        }
    }
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("cfg", &self.core.cfg)
            .field("shutdown", &self.core.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Reuses encode buffers across request writes.
pub(crate) struct BufPool {
    bufs: Mutex<Vec<Vec<u8>>>,
}

impl BufPool {
    fn new() -> Self {
        Self {
            bufs: Mutex::new(vec![]),
        }
    }

    pub(crate) fn get(&self) -> Vec<u8> {
        match self.bufs.lock().unwrap().pop() {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => Vec::with_capacity(1 << 10),
        }
    }

    pub(crate) fn put(&self, buf: Vec<u8>) {
        self.bufs.lock().unwrap().push(buf);
    }
}
