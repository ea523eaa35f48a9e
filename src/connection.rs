//! A single live connection to a broker.
//!
//! Each connection owns one socket, split so that the broker's writer
//! task and the connection's reader task proceed concurrently: writes are
//! serialized by the broker loop, reads by the reader, and a slow write
//! never stalls inbound responses. Correlation ids are assigned at write
//! time and strictly increase; the reader consumes expectations in the
//! same order they were written, so a mismatched id is protocol desync
//! and fatal.
//!
//! A fresh connection discovers the broker's API versions, authenticates
//! over SASL when configured, then starts its reader: either
//! `handle_resps`, or `discard` for an acks-0 produce connection whose
//! peer should never reply.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use nombytes::NomBytes;
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::{
    broker::{BrokerMetadata, ResponsePromise},
    client::ClientCore,
    error::{Error, KafkaCode, Result},
    network::BoxedConn,
    parser,
    protocol::{
        name_for_key, ApiVersionsRequest, ApiVersionsResponse, KafkaRequest, KafkaResponse,
        SaslAuthenticateRequest, SaslAuthenticateResponse, SaslHandshakeRequest,
        SaslHandshakeResponse, API_KEY_SASL_AUTHENTICATE, API_KEY_SASL_HANDSHAKE, MAX_API_KEY,
    },
    sasl::Mechanism,
    utils::unix_nanos,
};

/// Bare v0 `UNSUPPORTED_VERSION` bodies sent by brokers older than 2.4
/// (and the ten byte variant EventHubs erroneously sends as v1). Only
/// these exact replies trigger the ApiVersions downgrade-and-retry.
const UNSUPPORTED_V0: &[u8] = b"\x00\x23\x00\x00\x00\x00";
const UNSUPPORTED_V1_EVENTHUBS: &[u8] = b"\x00\x23\x00\x00\x00\x00\x00\x00\x00\x00";

/// Sessions shorter than this are rejected as invalid (KIP-368 re-auth).
const MIN_SESSION_LIFETIME_MILLIS: i64 = 5000;

/// A response expectation, enqueued by the broker's writer task right
/// after a successful write and consumed in FIFO order by the reader.
pub(crate) struct PromisedResp {
    pub(crate) ctx: Option<CancellationToken>,
    pub(crate) corr_id: i32,
    pub(crate) read_timeout: Duration,
    // ApiVersions responses use a v0 response header (no tags) even when
    // the body is flexible, in support of the version 0 fallback that
    // indexes into an exact offset. False for ApiVersions even if the
    // request is flexible.
    pub(crate) flexible_header: bool,
    pub(crate) resp: Box<dyn KafkaResponse>,
    pub(crate) promise: ResponsePromise,
    pub(crate) enqueue: Instant,
}

/// One socket to one broker.
pub(crate) struct BrokerCxn {
    cl: Arc<ClientCore>,
    meta: BrokerMetadata,
    addr: String,

    reader: Mutex<ReadHalf<BoxedConn>>,
    writer: Mutex<WriteHalf<BoxedConn>>,

    // Learned max version per API key; -1 means unknown or unsupported.
    // All -1 means the peer predates ApiVersions.
    versions: StdMutex<[i16; (MAX_API_KEY + 1) as usize]>,

    mechanism: StdMutex<Option<Arc<dyn Mechanism>>>,
    expiry: StdMutex<Option<Instant>>,

    throttle_until: AtomicI64, // unix nanos, only ever advances

    corr_id: AtomicI32,

    // Reaping bookkeeping: unix nano stamps plus in-progress flags, all
    // read by the reaper without any lock.
    last_write: AtomicI64,
    last_read: AtomicI64,
    writing: AtomicBool,
    reading: AtomicBool,

    // die_mu guards sending to resps in case the connection has died:
    // the writer task holds the read side across its send, die takes the
    // write side after flipping `dead`, then closes the channel.
    die_mu: RwLock<()>,
    resps_tx: StdMutex<Option<mpsc::Sender<PromisedResp>>>,
    dead: AtomicBool,
    // cancelled in close_conn; unblocks throttle sleeps and reads
    dead_ch: CancellationToken,
}

impl BrokerCxn {
    pub(crate) fn new(
        cl: Arc<ClientCore>,
        meta: BrokerMetadata,
        addr: String,
        conn: BoxedConn,
    ) -> Arc<Self> {
        let (reader, writer) = split(conn);
        let now = unix_nanos();
        Arc::new(Self {
            cl,
            meta,
            addr,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            versions: StdMutex::new([-1; (MAX_API_KEY + 1) as usize]),
            mechanism: StdMutex::new(None),
            expiry: StdMutex::new(None),
            throttle_until: AtomicI64::new(0),
            corr_id: AtomicI32::new(0),
            last_write: AtomicI64::new(now),
            last_read: AtomicI64::new(now),
            writing: AtomicBool::new(false),
            reading: AtomicBool::new(false),
            die_mu: RwLock::new(()),
            resps_tx: StdMutex::new(None),
            dead: AtomicBool::new(false),
            dead_ch: CancellationToken::new(),
        })
    }

    /// Discover versions, authenticate, and start the reader task.
    pub(crate) async fn init(self: Arc<Self>, is_produce_cxn: bool) -> Result<()> {
        let skip_discovery = self
            .cl
            .cfg
            .max_versions
            .as_ref()
            .is_some_and(|user| !user.has_key(18));
        if !skip_discovery {
            if let Err(err) = self.request_api_versions().await {
                tracing::error!(
                    "Unable to request api versions from broker {}: {}",
                    self.meta.node_id,
                    err
                );
                return Err(err);
            }
        }

        if let Err(err) = self.sasl().await {
            tracing::error!(
                "Unable to initialize sasl with broker {}: {}",
                self.meta.node_id,
                err
            );
            return Err(err);
        }

        let (tx, rx) = mpsc::channel(10);
        *self.resps_tx.lock().unwrap() = Some(tx);
        if is_produce_cxn && self.cl.cfg.required_acks == 0 {
            tokio::spawn(Arc::clone(&self).discard());
        } else {
            tokio::spawn(Arc::clone(&self).handle_resps(rx));
        }
        Ok(())
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    pub(crate) fn last_write(&self) -> i64 {
        self.last_write.load(Ordering::SeqCst)
    }

    pub(crate) fn last_read(&self) -> i64 {
        self.last_read.load(Ordering::SeqCst)
    }

    pub(crate) fn is_writing(&self) -> bool {
        self.writing.load(Ordering::SeqCst)
    }

    pub(crate) fn is_reading(&self) -> bool {
        self.reading.load(Ordering::SeqCst)
    }

    /// The learned max version for an API key, -1 when unknown.
    pub(crate) fn learned_version(&self, key: i16) -> i16 {
        if !(0..=MAX_API_KEY).contains(&key) {
            return -1;
        }
        self.versions.lock().unwrap()[key as usize]
    }

    /// Whether ApiVersions discovery populated the table.
    pub(crate) fn versions_loaded(&self) -> bool {
        self.versions.lock().unwrap()[0] >= 0
    }

    /// Whether the SASL session has a lifetime and it has passed.
    pub(crate) fn needs_reauth(&self) -> bool {
        self.expiry
            .lock()
            .unwrap()
            .is_some_and(|expiry| Instant::now() > expiry)
    }

    /// The first request on a new connection: probe ApiVersions starting
    /// at our (possibly user-capped) max, downgrading to v0 once if the
    /// broker sends one of the two known bare `UNSUPPORTED_VERSION`
    /// replies, and populate the learned version table.
    async fn request_api_versions(&self) -> Result<()> {
        let mut max_version: i16 = 3;
        if let Some(user) = &self.cl.cfg.max_versions {
            if let Some(user_max) = user.lookup(18) {
                if user_max >= 0 && user_max < max_version {
                    max_version = user_max;
                }
            }
        }

        loop {
            let mut req = ApiVersionsRequest::new(
                &self.cl.cfg.software_name,
                &self.cl.cfg.software_version,
            );
            req.set_version(max_version);
            tracing::debug!(
                "Issuing api versions request v{} to broker {}",
                max_version,
                self.meta.node_id
            );
            let corr_id = self.write_request(&None, Instant::now(), &req).await?;

            let (read_timeout, _) = (self.cl.cfg.conn_timeout_fn)(&req);
            // api versions does *not* use a flexible response header; see
            // the note on PromisedResp
            let raw = self
                .read_response(
                    &None,
                    read_timeout,
                    Instant::now(),
                    req.key(),
                    req.version(),
                    corr_id,
                    false,
                )
                .await?;
            if raw.len() < 2 {
                return Err(Error::ShortApiVersions(raw.len()));
            }

            let mut resp = ApiVersionsResponse::empty(max_version);

            // If we used a version larger than the broker supports, it
            // replies UNSUPPORTED_VERSION. Pre 2.4 brokers reply with a
            // bare v0 body and no keys, requiring a retry at v0; newer
            // brokers reply with all their keys in a v0 body.
            if raw[1] == 35 {
                if max_version == 0 {
                    return Err(Error::ApiVersionsRejected);
                }
                if raw.as_ref() == UNSUPPORTED_V0 || raw.as_ref() == UNSUPPORTED_V1_EVENTHUBS {
                    tracing::debug!(
                        "Broker {} does not know our ApiVersions version, downgrading to version 0 and retrying",
                        self.meta.node_id
                    );
                    max_version = 0;
                    continue;
                }
                resp.set_version(0);
            }

            resp.decode(raw)?;
            if resp.api_keys.is_empty() {
                return Err(Error::EmptyApiVersions);
            }

            let mut versions = self.versions.lock().unwrap();
            for key in &resp.api_keys {
                if !(0..=MAX_API_KEY).contains(&key.api_key) {
                    continue;
                }
                versions[key.api_key as usize] = key.max_version;
            }
            return Ok(());
        }
    }

    /// Run the SASL handshake and authentication flow. A no-op without
    /// configured mechanisms; also re-run in place on this socket when
    /// the session lifetime expires.
    pub(crate) async fn sasl(&self) -> Result<()> {
        if self.cl.cfg.sasls.is_empty() {
            return Ok(());
        }
        let mut mechanism = Arc::clone(&self.cl.cfg.sasls[0]);
        let mut retried = false;
        let mut authenticate = false;

        'start: loop {
            let handshake_version = self.learned_version(API_KEY_SASL_HANDSHAKE);
            if mechanism.name() != "GSSAPI" && handshake_version >= 0 {
                let mut req = SaslHandshakeRequest::new(mechanism.name().to_string());
                req.set_version(handshake_version);
                tracing::debug!(
                    "Issuing SaslHandshakeRequest to broker {}",
                    self.meta.node_id
                );
                let corr_id = self.write_request(&None, Instant::now(), &req).await?;

                let (read_timeout, _) = (self.cl.cfg.conn_timeout_fn)(&req);
                let raw = self
                    .read_response(
                        &None,
                        read_timeout,
                        Instant::now(),
                        req.key(),
                        req.version(),
                        corr_id,
                        req.is_flexible(),
                    )
                    .await?;
                let mut resp = SaslHandshakeResponse::empty(req.version());
                resp.decode(raw)?;

                if resp.error_code != KafkaCode::None {
                    // Exactly one retry: the broker told us what it does
                    // support, switch if anything intersects our
                    // remaining configured mechanisms.
                    if !retried && resp.error_code == KafkaCode::UnsupportedSaslMechanism {
                        for ours in &self.cl.cfg.sasls[1..] {
                            for supported in &resp.mechanisms {
                                if supported.as_ref() == ours.name().as_bytes() {
                                    mechanism = Arc::clone(ours);
                                    retried = true;
                                    continue 'start;
                                }
                            }
                        }
                    }
                    return Err(Error::KafkaError(resp.error_code));
                }
                authenticate = req.version() == 1;
            }
            tracing::debug!(
                "Beginning sasl authentication with broker {} using {}, wrapped {}",
                self.meta.node_id,
                mechanism.name(),
                authenticate
            );
            *self.mechanism.lock().unwrap() = Some(mechanism);
            return self.do_sasl(authenticate).await;
        }
    }

    /// The challenge loop. Keeps writing while the session is not done OR
    /// a client write remains, so one final server response after the
    /// mechanism reports done is still consumed.
    async fn do_sasl(&self, authenticate: bool) -> Result<()> {
        let mechanism = self
            .mechanism
            .lock()
            .unwrap()
            .clone()
            .ok_or(Error::InvalidSaslMechanism)?;
        let (mut session, mut client_write) = mechanism.authenticate(&self.addr).await?;
        if client_write.is_empty() {
            return Err(Error::SaslServerWrite(mechanism.name().to_string()));
        }

        let mut lifetime_millis: i64 = 0;

        // Even unwrapped reads and writes use the SaslAuthenticate
        // timeouts.
        let timeout_probe = SaslAuthenticateRequest::new(Bytes::new());
        let (read_timeout, write_timeout) = (self.cl.cfg.conn_timeout_fn)(&timeout_probe);

        let mut step = -1i32;
        let mut done = false;
        while !done || !client_write.is_empty() {
            step += 1;
            let mut challenge = Bytes::new();

            if !authenticate {
                let mut buf = self.cl.buf_pool().get();
                buf.extend_from_slice(&(client_write.len() as u32).to_be_bytes());
                buf.extend_from_slice(&client_write);

                tracing::debug!(
                    "Issuing raw sasl authenticate to broker {}, step {}",
                    self.meta.node_id,
                    step
                );
                let (res, _, _) = self
                    .write_conn(&None, &buf, write_timeout, Instant::now())
                    .await;
                self.cl.buf_pool().put(buf);
                res?;

                if !done {
                    let (body, _, _, _) =
                        self.read_conn(&None, read_timeout, Instant::now()).await;
                    challenge = body?;
                }
            } else {
                let mut req = SaslAuthenticateRequest::new(Bytes::from(client_write.clone()));
                let version = self
                    .learned_version(API_KEY_SASL_AUTHENTICATE)
                    .clamp(0, req.max_version());
                req.set_version(version);
                tracing::debug!(
                    "Issuing SaslAuthenticate v{} to broker {}, step {}",
                    version,
                    self.meta.node_id,
                    step
                );
                let corr_id = self.write_request(&None, Instant::now(), &req).await?;

                if !done {
                    let raw = self
                        .read_response(
                            &None,
                            read_timeout,
                            Instant::now(),
                            req.key(),
                            req.version(),
                            corr_id,
                            req.is_flexible(),
                        )
                        .await?;
                    let mut resp = SaslAuthenticateResponse::empty(req.version());
                    resp.decode(raw)?;

                    if resp.error_code != KafkaCode::None {
                        return Err(match resp.error_message {
                            Some(message) => Error::ServerError {
                                code: resp.error_code,
                                message: String::from_utf8_lossy(&message).into_owned(),
                            },
                            None => Error::KafkaError(resp.error_code),
                        });
                    }
                    challenge = resp.auth_bytes;
                    lifetime_millis = resp.session_lifetime_ms;
                }
            }

            client_write.clear();

            if !done {
                let (finished, next_write) = session.challenge(challenge.as_ref())?;
                done = finished;
                client_write = next_write;
            }
        }

        if lifetime_millis > 0 {
            if lifetime_millis < MIN_SESSION_LIFETIME_MILLIS {
                return Err(Error::InvalidSaslLifetime(lifetime_millis));
            }
            // Take one second off to cover processing lag; the broker
            // closes the connection at the real deadline.
            let expiry = Instant::now() + Duration::from_millis(lifetime_millis as u64)
                - Duration::from_secs(1);
            *self.expiry.lock().unwrap() = Some(expiry);
            tracing::debug!(
                "Connection to broker {} has a limited sasl lifetime of {}ms",
                self.meta.node_id,
                lifetime_millis
            );
        }
        Ok(())
    }

    /// Encode and write one request, returning the correlation id it was
    /// assigned. Honors the connection's throttle unless `ctx` is `None`
    /// (system-internal requests are never throttled).
    pub(crate) async fn write_request(
        &self,
        ctx: &Option<CancellationToken>,
        enqueued_for_writing_at: Instant,
        req: &dyn KafkaRequest,
    ) -> Result<i32> {
        if ctx.is_some() {
            let until = self.throttle_until.load(Ordering::SeqCst);
            let now = unix_nanos();
            if until > now {
                let sleep = Duration::from_nanos((until - now) as u64);
                tokio::select! {
                    _ = tokio::time::sleep(sleep) => {}
                    _ = cancelled(ctx) => return Err(Error::RequestCancelled),
                    _ = self.cl.shutdown_token().cancelled() => return Err(Error::ClientClosing),
                    _ = self.dead_ch.cancelled() => return Err(Error::ChosenBrokerDead),
                }
            }
        }

        let corr_id = self.corr_id.load(Ordering::SeqCst);
        let mut buf = self.cl.buf_pool().get();
        if let Err(err) = self.cl.cfg.formatter.append_request(&mut buf, req, corr_id) {
            self.cl.buf_pool().put(buf);
            return Err(err);
        }

        let (_, write_timeout) = (self.cl.cfg.conn_timeout_fn)(req);
        let (result, write_wait, time_to_write) = self
            .write_conn(ctx, &buf, write_timeout, enqueued_for_writing_at)
            .await;
        self.cl.buf_pool().put(buf);

        for hook in self.cl.cfg.hooks.iter() {
            hook.on_write(
                &self.meta,
                req.key(),
                *result.as_ref().unwrap_or(&0),
                write_wait,
                time_to_write,
                result.as_ref().err(),
            );
        }
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                "Wrote {} v{} to broker {}: bytes {:?}, write_wait {:?}, time_to_write {:?}",
                name_for_key(req.key()),
                req.version(),
                self.meta.node_id,
                result.as_ref().ok(),
                write_wait,
                time_to_write
            );
        }

        result?;
        self.corr_id.fetch_add(1, Ordering::SeqCst);
        Ok(corr_id)
    }

    /// Write raw bytes with deadline, shutdown, caller-cancellation and
    /// connection-death handling. Returns the write result plus how long
    /// the write waited to start and how long it took.
    async fn write_conn(
        &self,
        ctx: &Option<CancellationToken>,
        buf: &[u8],
        timeout: Duration,
        enqueued_for_writing_at: Instant,
    ) -> (Result<usize>, Duration, Duration) {
        self.writing.store(true, Ordering::SeqCst);
        let mut writer = self.writer.lock().await;

        let write_start = Instant::now();
        let write_wait = write_start.saturating_duration_since(enqueued_for_writing_at);

        let io = async {
            writer
                .write_all(buf)
                .await
                .map_err(|e| Error::DeadConnection(e.kind()))?;
            writer
                .flush()
                .await
                .map_err(|e| Error::DeadConnection(e.kind()))?;
            Ok(buf.len())
        };
        let result = tokio::select! {
            result = with_deadline(io, timeout) => result,
            _ = self.cl.shutdown_token().cancelled() => Err(Error::ClientClosing),
            _ = cancelled(ctx) => Err(Error::RequestCancelled),
            _ = self.dead_ch.cancelled() => Err(Error::ChosenBrokerDead),
        };

        self.last_write.store(unix_nanos(), Ordering::SeqCst);
        self.writing.store(false, Ordering::SeqCst);
        (result, write_wait, write_start.elapsed())
    }

    /// Read one size-prefixed frame, returning its body. Mirrors
    /// `write_conn`'s deadline and cancellation handling and stamps the
    /// read-side reaping bookkeeping.
    async fn read_conn(
        &self,
        ctx: &Option<CancellationToken>,
        timeout: Duration,
        enqueued_for_reading_at: Instant,
    ) -> (Result<Bytes>, usize, Duration, Duration) {
        self.reading.store(true, Ordering::SeqCst);
        let mut reader = self.reader.lock().await;

        let read_start = Instant::now();
        let read_wait = read_start.saturating_duration_since(enqueued_for_reading_at);

        let max_size = self.cl.cfg.max_broker_read_bytes;
        let io = async {
            let mut size_buf = [0u8; 4];
            reader
                .read_exact(&mut size_buf)
                .await
                .map_err(|e| Error::DeadConnection(e.kind()))?;
            let size = parse_read_size(size_buf, max_size)?;
            let mut body = vec![0u8; size as usize];
            reader
                .read_exact(&mut body)
                .await
                .map_err(|e| Error::DeadConnection(e.kind()))?;
            Ok(Bytes::from(body))
        };
        let result = tokio::select! {
            result = with_deadline(io, timeout) => result,
            _ = self.cl.shutdown_token().cancelled() => Err(Error::ClientClosing),
            _ = cancelled(ctx) => Err(Error::RequestCancelled),
            _ = self.dead_ch.cancelled() => Err(Error::ChosenBrokerDead),
        };

        self.last_read.store(unix_nanos(), Ordering::SeqCst);
        self.reading.store(false, Ordering::SeqCst);

        let nread = match &result {
            Ok(body) => 4 + body.len(),
            Err(_) => 0,
        };
        (result, nread, read_wait, read_start.elapsed())
    }

    /// Read one framed response, check its correlation id against the
    /// expected one, and return the body after the response header.
    #[allow(clippy::too_many_arguments)]
    async fn read_response(
        &self,
        ctx: &Option<CancellationToken>,
        timeout: Duration,
        enqueued_for_reading_at: Instant,
        key: i16,
        version: i16,
        corr_id: i32,
        flexible_header: bool,
    ) -> Result<Bytes> {
        let (result, nread, read_wait, time_to_read) =
            self.read_conn(ctx, timeout, enqueued_for_reading_at).await;

        for hook in self.cl.cfg.hooks.iter() {
            hook.on_read(
                &self.meta,
                key,
                nread,
                read_wait,
                time_to_read,
                result.as_ref().err(),
            );
        }
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                "Read {} v{} from broker {}: bytes {}, read_wait {:?}, time_to_read {:?}",
                name_for_key(key),
                version,
                self.meta.node_id,
                nread,
                read_wait,
                time_to_read
            );
        }

        let buf = result?;
        if buf.len() < 4 {
            return Err(Error::NotEnoughData);
        }
        let got_id = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if got_id != corr_id {
            return Err(Error::CorrelationIdMismatch {
                expected: corr_id,
                got: got_id,
            });
        }
        let body = buf.slice(4..);
        // Flexible response headers carry tags after the correlation id;
        // they are currently unused and skipped.
        if flexible_header {
            let (rest, ()) = parser::skip_tagged_fields(NomBytes::new(body))
                .map_err(|_| Error::NotEnoughData)?;
            return Ok(rest.to_bytes());
        }
        Ok(body)
    }

    /// Hand a response expectation to the reader, or fail it immediately
    /// if the connection has died.
    pub(crate) async fn wait_resp(&self, pr: PromisedResp) {
        let guard = self.die_mu.read().await;
        if self.dead.load(Ordering::SeqCst) {
            drop(guard);
            (pr.promise)(Err(Error::ChosenBrokerDead));
            return;
        }
        let tx = self.resps_tx.lock().unwrap().clone();
        match tx {
            Some(tx) => {
                if let Err(mpsc::error::SendError(pr)) = tx.send(pr).await {
                    (pr.promise)(Err(Error::ChosenBrokerDead));
                }
            }
            None => (pr.promise)(Err(Error::ChosenBrokerDead)),
        }
        drop(guard);
    }

    /// Serially read every expected response for this connection, in the
    /// order the writes happened.
    async fn handle_resps(self: Arc<Self>, mut rx: mpsc::Receiver<PromisedResp>) {
        let mut successes: u64 = 0;
        while let Some(pr) = rx.recv().await {
            if self.dead.load(Ordering::SeqCst) {
                (pr.promise)(Err(Error::ChosenBrokerDead));
                continue;
            }

            let raw = self
                .read_response(
                    &pr.ctx,
                    pr.read_timeout,
                    pr.enqueue,
                    pr.resp.key(),
                    pr.resp.version(),
                    pr.corr_id,
                    pr.flexible_header,
                )
                .await;

            let raw = match raw {
                Ok(raw) => raw,
                Err(err) => {
                    if successes > 0 || !self.cl.cfg.sasls.is_empty() {
                        tracing::debug!(
                            "Read from broker {} at {} errored, killing connection after {} successful responses: {}",
                            self.meta.node_id,
                            self.addr,
                            successes,
                            err
                        );
                    } else {
                        tracing::warn!(
                            "Read from broker {} at {} errored, killing connection after 0 successful responses (is sasl missing?): {}",
                            self.meta.node_id,
                            self.addr,
                            err
                        );
                    }
                    (pr.promise)(Err(err));
                    Arc::clone(&self).die();
                    continue;
                }
            };
            successes += 1;

            let mut resp = pr.resp;
            match resp.decode(raw) {
                Ok(()) => {
                    // Any response can tell us the broker is rate
                    // limiting this client.
                    if let Some((millis, throttled_after_response)) = resp.throttle() {
                        if millis > 0 {
                            if throttled_after_response {
                                let until =
                                    unix_nanos() + i64::from(millis) * 1_000_000;
                                self.throttle_until.fetch_max(until, Ordering::SeqCst);
                            }
                            for hook in self.cl.cfg.hooks.iter() {
                                hook.on_throttle(
                                    &self.meta,
                                    Duration::from_millis(millis as u64),
                                    throttled_after_response,
                                );
                            }
                        }
                    }
                    (pr.promise)(Ok(resp));
                }
                Err(err) => (pr.promise)(Err(err)),
            }
        }
        self.die();
    }

    /// Reader for an acks-0 produce connection.
    ///
    /// A conforming broker never replies to acks-0 produce, but EventHubs
    /// does; left unread, those bytes eventually fill kernel buffers and
    /// stall the peer. So this reader consumes and discards everything:
    /// no deadline on the length prefix (there is no knowing when, if
    /// ever, a reply comes), the produce timeout as the body deadline,
    /// and a small reusable buffer since produce responses are small.
    async fn discard(self: Arc<Self>) {
        let mut discard_buf = [0u8; 256];
        loop {
            let mut reader = self.reader.lock().await;
            let mut size_buf = [0u8; 4];
            let prefix: Result<()> = tokio::select! {
                res = reader.read_exact(&mut size_buf) => {
                    res.map(|_| ()).map_err(|e| Error::DeadConnection(e.kind()))
                }
                _ = self.cl.shutdown_token().cancelled() => break,
                _ = self.dead_ch.cancelled() => break,
            };

            // Only now do we know a read is happening; the reaper is free
            // to kill us while we sit on the prefix.
            self.reading.store(true, Ordering::SeqCst);
            let read_start = Instant::now();
            let mut nread = 0usize;
            let mut result = prefix;

            if result.is_ok() {
                nread = 4;
                match parse_read_size(size_buf, self.cl.cfg.max_broker_read_bytes) {
                    Err(err) => result = Err(err),
                    Ok(size) => {
                        let body = discard_body(&mut reader, &mut discard_buf, size as usize);
                        let outcome = tokio::select! {
                            res = with_deadline(body, self.cl.cfg.produce_timeout) => Some(res),
                            _ = self.cl.shutdown_token().cancelled() => None,
                            _ = self.dead_ch.cancelled() => None,
                        };
                        match outcome {
                            None => {
                                self.last_read.store(unix_nanos(), Ordering::SeqCst);
                                self.reading.store(false, Ordering::SeqCst);
                                break;
                            }
                            Some(Ok(n)) => nread += n,
                            Some(Err(err)) => result = Err(err),
                        }
                    }
                }
            }

            self.last_read.store(unix_nanos(), Ordering::SeqCst);
            self.reading.store(false, Ordering::SeqCst);
            let time_to_read = read_start.elapsed();
            drop(reader);

            // No enqueue time exists for unexpected responses, so the
            // read-wait reported is zero.
            for hook in self.cl.cfg.hooks.iter() {
                hook.on_read(
                    &self.meta,
                    0,
                    nread,
                    Duration::ZERO,
                    time_to_read,
                    result.as_ref().err(),
                );
            }
            if result.is_err() {
                break;
            }
        }
        self.die();
    }

    /// Fire disconnect hooks and wake everything blocked on this
    /// connection. The one place connections are closed: from `die`, or
    /// from the broker when `init` fails before a reader exists.
    pub(crate) fn close_conn(&self) {
        for hook in self.cl.cfg.hooks.iter() {
            hook.on_disconnect(&self.meta);
        }
        self.dead_ch.cancel();
    }

    /// Kill the connection (which may already be dead) and fail every
    /// expectation still awaiting a response. Idempotent.
    pub(crate) fn die(self: Arc<Self>) {
        if self.dead.swap(true, Ordering::SeqCst) {
            return;
        }

        self.close_conn();

        let cxn = self;
        tokio::spawn(async move {
            // After the write side of die_mu, nothing is mid-send; the
            // channel closes and the reader drains what remains with
            // dead-broker errors.
            drop(cxn.die_mu.write().await);
            cxn.resps_tx.lock().unwrap().take();

            let mut writer = cxn.writer.lock().await;
            let _ = writer.shutdown().await;
        });
    }
}

/// A future that resolves when the caller's token cancels, or never for
/// system-internal requests with no token.
pub(crate) async fn cancelled(ctx: &Option<CancellationToken>) {
    match ctx {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn with_deadline<T>(
    io: impl std::future::Future<Output = Result<T>>,
    timeout: Duration,
) -> Result<T> {
    if timeout.is_zero() {
        return io.await;
    }
    match tokio::time::timeout(timeout, io).await {
        Ok(result) => result,
        Err(_) => Err(Error::DeadConnection(std::io::ErrorKind::TimedOut)),
    }
}

async fn discard_body(
    reader: &mut ReadHalf<BoxedConn>,
    buf: &mut [u8],
    mut remaining: usize,
) -> Result<usize> {
    let mut total = 0;
    while remaining > 0 {
        let cap = remaining.min(buf.len());
        let n = reader
            .read(&mut buf[..cap])
            .await
            .map_err(|e| Error::DeadConnection(e.kind()))?;
        if n == 0 {
            return Err(Error::DeadConnection(std::io::ErrorKind::UnexpectedEof));
        }
        total += n;
        remaining -= n;
    }
    Ok(total)
}

/// Validate a frame's 4 byte size prefix against the configured limit,
/// sniffing oversized frames for a TLS alert record: a plaintext client
/// pointed at a TLS listener reads alert byte 21 followed by an 03xx
/// protocol version where a length should be.
fn parse_read_size(size_buf: [u8; 4], max_size: i32) -> Result<i32> {
    let size = i32::from_be_bytes(size_buf);
    if size < 0 {
        return Err(Error::NegativeResponseSize(size));
    }
    if size > max_size {
        let tls_version = u16::from_be_bytes([size_buf[1], size_buf[2]]);
        if size_buf[0] == 21 && tls_version & 0x0300 != 0 {
            let version = match tls_version {
                0x0300 => "SSL v3".to_string(),
                0x0301 => "TLS v1.0".to_string(),
                0x0302 => "TLS v1.1".to_string(),
                0x0303 => "TLS v1.2".to_string(),
                0x0304 => "TLS v1.3".to_string(),
                other => format!("unknown TLS version (hex {other:x})"),
            };
            return Err(Error::TlsAlert {
                size,
                limit: max_size,
                version,
            });
        }
        return Err(Error::ResponseTooLarge {
            size,
            limit: max_size,
        });
    }
    Ok(size)
}

#[cfg(test)]
mod test {
    use super::*;

    const LIMIT: i32 = 100 << 20;

    #[test]
    fn read_size_accepts_up_to_the_limit() {
        assert_eq!(parse_read_size(4i32.to_be_bytes(), LIMIT), Ok(4));
        assert_eq!(parse_read_size(LIMIT.to_be_bytes(), LIMIT), Ok(LIMIT));
    }

    #[test]
    fn read_size_rejects_one_past_the_limit() {
        assert_eq!(
            parse_read_size((LIMIT + 1).to_be_bytes(), LIMIT),
            Err(Error::ResponseTooLarge {
                size: LIMIT + 1,
                limit: LIMIT
            })
        );
    }

    #[test]
    fn read_size_rejects_negative_sizes() {
        assert_eq!(
            parse_read_size((-1i32).to_be_bytes(), LIMIT),
            Err(Error::NegativeResponseSize(-1))
        );
    }

    #[test]
    fn read_size_guesses_tls_versions() {
        // alert byte, TLS 1.0, oversize remainder
        let err = parse_read_size([0x15, 0x03, 0x01, 0xff], LIMIT).unwrap_err();
        assert!(err.to_string().contains("TLS v1.0"));

        let err = parse_read_size([0x15, 0x03, 0x03, 0xff], LIMIT).unwrap_err();
        assert!(err.to_string().contains("TLS v1.2"));

        let err = parse_read_size([0x15, 0x03, 0x04, 0xff], LIMIT).unwrap_err();
        assert!(err.to_string().contains("TLS v1.3"));
    }

    #[test]
    fn oversize_without_alert_byte_is_a_plain_size_error() {
        let err = parse_read_size([0x16, 0x03, 0x03, 0xff], LIMIT).unwrap_err();
        assert_eq!(
            err,
            Error::ResponseTooLarge {
                size: 0x160303ff,
                limit: LIMIT
            }
        );
    }
}
