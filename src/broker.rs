//! Per-broker request intake and connection multiplexing.
//!
//! A [`Broker`] owns up to three connections to one broker identity:
//! produce requests go to one, fetch requests to another, everything else
//! to a third, so a slow produce write never sits in front of a fetch.
//! One writer task drains the broker's bounded request queue serially,
//! lazily (re)dialing the right connection, clamping the request version
//! to what the broker speaks, and handing the written request's response
//! expectation to that connection's reader.
//!
//! Every request submitted here resolves its promise exactly once; a
//! stopped broker drains its queue with
//! [`ChosenBrokerDead`](Error::ChosenBrokerDead).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;

use crate::{
    client::ClientCore,
    connection::{BrokerCxn, PromisedResp},
    error::{Error, Result},
    network::{BoxedConn, BrokerAddress},
    protocol::{KafkaRequest, KafkaResponse, ProduceRequest, ProduceResponse, MAX_API_KEY},
    utils::unix_nanos,
};

/// Kafka uses -1 for an unknown controller.
pub const UNKNOWN_CONTROLLER_ID: i32 = -1;

/// Synthetic node id for a seed broker that has not been matched to
/// discovered metadata.
///
/// Real broker ids are all positive and the unknown controller is -1, so
/// seeds count up from `i32::MIN` where nothing can collide.
pub fn unknown_seed_id(seed_index: usize) -> i32 {
    i32::MIN + seed_index as i32
}

/// Identity of one broker.
///
/// Two identities are equal iff node id, host, port and rack all match,
/// with two absent racks comparing equal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerMetadata {
    /// The broker node ID. Seed brokers have very negative synthetic ids;
    /// see [`unknown_seed_id`].
    pub node_id: i32,
    /// The broker hostname.
    pub host: String,
    /// The broker port.
    pub port: i32,
    /// The rack of the broker, if it has one.
    pub rack: Option<String>,
}

/// Resolves a submitted request exactly once, with either the decoded
/// response or the error that stopped it.
pub type ResponsePromise = Box<dyn FnOnce(Result<Box<dyn KafkaResponse>>) + Send>;

/// A submitted request travelling from [`Broker::issue`] to the writer
/// task.
pub(crate) struct PromisedReq {
    pub(crate) ctx: Option<CancellationToken>,
    pub(crate) req: Box<dyn KafkaRequest>,
    pub(crate) promise: ResponsePromise,
    pub(crate) enqueue: Instant,
}

const SLOT_NORMAL: usize = 0;
const SLOT_PRODUCE: usize = 1;
const SLOT_FETCH: usize = 2;

fn slot_for_key(key: i16) -> usize {
    match key {
        0 => SLOT_PRODUCE,
        1 => SLOT_FETCH,
        _ => SLOT_NORMAL,
    }
}

/// Whether this request runs on a connection whose reader is the discard
/// loop, which never surfaces responses.
fn is_no_resp_cxn(key: i16, required_acks: i16) -> bool {
    key == 0 && required_acks == 0
}

/// Manages how a client interacts with one broker.
pub struct Broker {
    cl: Arc<ClientCore>,

    /// The broker's identity, used for logging and hooks.
    pub meta: BrokerMetadata,
    addr: BrokerAddress,

    // Each slot holds a single connection, created lazily by the writer
    // task and also swept by the reaper; the mutex serializes those two.
    cxns: Mutex<[Option<Arc<BrokerCxn>>; 3]>,

    // die_mu guards sending to reqs in case the broker has been
    // permanently stopped: submitters hold the read side across their
    // send, stop_forever takes the write side after flipping `dead`.
    die_mu: RwLock<()>,
    reqs_tx: Mutex<Option<mpsc::Sender<PromisedReq>>>,
    dead: AtomicBool,
}

impl Broker {
    /// Create the broker and start its writer task.
    pub(crate) fn new(
        cl: Arc<ClientCore>,
        node_id: i32,
        host: &str,
        port: i32,
        rack: Option<String>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(10);
        let broker = Arc::new(Self {
            cl,
            meta: BrokerMetadata {
                node_id,
                host: host.to_string(),
                port,
                rack,
            },
            addr: BrokerAddress {
                host: host.to_string(),
                port: port as u16,
            },
            cxns: Mutex::new([None, None, None]),
            die_mu: RwLock::new(()),
            reqs_tx: Mutex::new(Some(tx)),
            dead: AtomicBool::new(false),
        });
        tokio::spawn(Arc::clone(&broker).handle_reqs(rx));
        broker
    }

    /// Submit a request. The promise is invoked exactly once, off the
    /// writer task, when the request fails or is responded to.
    ///
    /// Admission can briefly wait on the bounded queue. Cancelling the
    /// supplied token before enqueue is the caller's concern; after
    /// enqueue it still aborts the request.
    pub async fn issue(
        &self,
        ctx: Option<CancellationToken>,
        req: Box<dyn KafkaRequest>,
        promise: ResponsePromise,
    ) {
        let enqueue = Instant::now();

        let guard = self.die_mu.read().await;
        if self.dead.load(Ordering::SeqCst) {
            drop(guard);
            promise(Err(Error::ChosenBrokerDead));
            return;
        }
        let tx = self.reqs_tx.lock().unwrap().clone();
        match tx {
            Some(tx) => {
                if let Err(mpsc::error::SendError(pr)) = tx
                    .send(PromisedReq {
                        ctx,
                        req,
                        promise,
                        enqueue,
                    })
                    .await
                {
                    (pr.promise)(Err(Error::ChosenBrokerDead));
                }
            }
            None => promise(Err(Error::ChosenBrokerDead)),
        }
        drop(guard);
    }

    /// Submit a request and block for its response.
    pub async fn wait_response(
        &self,
        ctx: Option<CancellationToken>,
        req: Box<dyn KafkaRequest>,
    ) -> Result<Box<dyn KafkaResponse>> {
        let (tx, rx) = oneshot::channel();
        self.issue(
            ctx,
            req,
            Box::new(move |res| {
                let _ = tx.send(res);
            }),
        )
        .await;
        rx.await.unwrap_or(Err(Error::ChosenBrokerDead))
    }

    /// Permanently disable this broker. Idempotent. Every queued request
    /// resolves with [`ChosenBrokerDead`](Error::ChosenBrokerDead).
    pub async fn stop_forever(&self) {
        if self.dead.swap(true, Ordering::SeqCst) {
            return;
        }

        // The writer task fails everything it dequeues from here on; this
        // fence only has to guarantee no submitter is still holding the
        // read side before the channel closes.
        drop(self.die_mu.write().await);

        self.reqs_tx.lock().unwrap().take();
    }

    /// The intake loop: exactly one per broker, draining the request
    /// queue serially until [`stop_forever`](Broker::stop_forever) closes
    /// it, then killing the connections.
    async fn handle_reqs(self: Arc<Self>, mut rx: mpsc::Receiver<PromisedReq>) {
        while let Some(pr) = rx.recv().await {
            if self.dead.load(Ordering::SeqCst) {
                (pr.promise)(Err(Error::ChosenBrokerDead));
                continue;
            }
            self.handle_req(pr).await;
        }

        let cxns: Vec<_> = self.cxns.lock().unwrap().iter().flatten().cloned().collect();
        for cxn in cxns {
            cxn.die();
        }
    }

    async fn handle_req(&self, mut pr: PromisedReq) {
        let key = pr.req.key();
        let cxn = match self.load_connection(&pr.ctx, key).await {
            Ok(cxn) => cxn,
            Err(err) => {
                (pr.promise)(Err(err));
                return;
            }
        };

        if key < 0
            || key > MAX_API_KEY
            || self
                .cl
                .cfg
                .max_versions
                .as_ref()
                .is_some_and(|user| !user.has_key(key))
        {
            (pr.promise)(Err(Error::UnknownRequestKey(key)));
            return;
        }

        // A loaded versions table with a negative entry for this key means
        // the broker cannot handle the request at all.
        let broker_max = cxn.learned_version(key);
        if cxn.versions_loaded() && broker_max < 0 {
            (pr.promise)(Err(Error::BrokerTooOld));
            return;
        }

        let version = match select_version(
            pr.req.max_version(),
            self.cl.cfg.max_versions.as_ref().and_then(|u| u.lookup(key)),
            broker_max,
            self.cl.cfg.min_versions.as_ref().and_then(|u| u.lookup(key)),
        ) {
            Ok(version) => version,
            Err(err) => {
                (pr.promise)(Err(err));
                return;
            }
        };
        pr.req.set_version(version);

        // KIP-368: an expired session re-authenticates in place on the
        // same socket before the next write.
        if cxn.needs_reauth() {
            // The discard reader owns an acks-0 produce socket's read
            // half, so sasl responses cannot be read there; retire the
            // connection and let the next produce dial a fresh one.
            if is_no_resp_cxn(key, self.cl.cfg.required_acks) {
                (pr.promise)(Err(Error::ChosenBrokerDead));
                cxn.die();
                return;
            }
            tracing::debug!(
                "Sasl session lifetime expired for broker {}, reauthenticating",
                self.meta.node_id
            );
            if let Err(err) = cxn.sasl().await {
                (pr.promise)(Err(err));
                cxn.die();
                return;
            }
        }

        // Last cancellation check before the write: a request that died on
        // a dead connection and was resubmitted by a caller loop must not
        // spin once its context is gone.
        if pr.ctx.as_ref().is_some_and(|ctx| ctx.is_cancelled()) {
            (pr.promise)(Err(Error::RequestCancelled));
            return;
        }

        // Produce requests, and only produce requests, can be written
        // without expecting a reply. The acks are rewritten to the
        // configured value so that the produce connection's reader
        // matches: acks 0 pairs with the discard reader, which never
        // receives response expectations.
        let mut is_no_resp = false;
        if let Some(produce) = pr.req.as_any_mut().downcast_mut::<ProduceRequest>() {
            produce.acks = self.cl.cfg.required_acks;
            if produce.acks == 0 {
                is_no_resp = true;
                produce.timeout_ms = self.cl.cfg.produce_timeout.as_millis() as i32;
            }
        }

        let corr_id = match cxn.write_request(&pr.ctx, pr.enqueue, pr.req.as_ref()).await {
            Ok(corr_id) => corr_id,
            Err(err) => {
                (pr.promise)(Err(err));
                cxn.die();
                return;
            }
        };

        if is_no_resp {
            // The promise still receives a non-nil, correctly versioned
            // response per the submit contract.
            (pr.promise)(Ok(Box::new(ProduceResponse::empty(version))));
            return;
        }

        let (read_timeout, _) = (self.cl.cfg.conn_timeout_fn)(pr.req.as_ref());
        cxn.wait_resp(PromisedResp {
            ctx: pr.ctx,
            corr_id,
            read_timeout,
            // ApiVersions responses use a non-flexible header regardless
            // of the body version.
            flexible_header: pr.req.is_flexible() && key != 18,
            resp: pr.req.response_kind(),
            promise: pr.promise,
            enqueue: Instant::now(),
        })
        .await;
    }

    /// Return the connection slot for this request key, dialing and
    /// initializing a fresh connection if the slot is empty or dead.
    async fn load_connection(
        &self,
        ctx: &Option<CancellationToken>,
        key: i16,
    ) -> Result<Arc<BrokerCxn>> {
        let slot = slot_for_key(key);
        if let Some(cxn) = self.cxns.lock().unwrap()[slot].clone() {
            if !cxn.is_dead() {
                return Ok(cxn);
            }
        }

        let conn = self.connect(ctx).await?;
        let cxn = BrokerCxn::new(
            Arc::clone(&self.cl),
            self.meta.clone(),
            self.addr.to_string(),
            conn,
        );
        if let Err(err) = Arc::clone(&cxn).init(slot == SLOT_PRODUCE).await {
            tracing::debug!(
                "Connection initialization failed for broker {} at {}: {}",
                self.meta.node_id,
                self.addr,
                err
            );
            cxn.close_conn();
            return Err(err);
        }
        tracing::debug!(
            "Connection initialized successfully for broker {} at {}",
            self.meta.node_id,
            self.addr
        );

        self.cxns.lock().unwrap()[slot] = Some(Arc::clone(&cxn));
        Ok(cxn)
    }

    /// Dial the broker's address, firing connect hooks with the elapsed
    /// time.
    async fn connect(&self, ctx: &Option<CancellationToken>) -> Result<BoxedConn> {
        tracing::debug!(
            "Opening connection to broker {} at {}",
            self.meta.node_id,
            self.addr
        );
        let start = Instant::now();
        let dialing = (self.cl.cfg.dial_fn)(self.addr.clone());
        let result = tokio::select! {
            result = dialing => result,
            _ = self.cl.shutdown_token().cancelled() => Err(Error::ClientClosing),
            _ = crate::connection::cancelled(ctx) => Err(Error::RequestCancelled),
        };
        let since = start.elapsed();

        for hook in self.cl.cfg.hooks.iter() {
            hook.on_connect(&self.meta, since, result.as_ref().err());
        }

        match result {
            Ok(conn) => {
                tracing::debug!(
                    "Connection opened to broker {} at {}",
                    self.meta.node_id,
                    self.addr
                );
                Ok(conn)
            }
            Err(err) => {
                tracing::warn!(
                    "Unable to open connection to broker {} at {}: {}",
                    self.meta.node_id,
                    self.addr,
                    err
                );
                Err(err)
            }
        }
    }

    /// Kill any connection that has gone a full idle timeout without
    /// reading or writing, unless an operation is in flight.
    pub(crate) fn reap_connections(&self, idle_timeout: Duration) {
        let cxns = self.cxns.lock().unwrap();
        let now = unix_nanos();
        let idle = idle_timeout.as_nanos() as i64;
        for cxn in cxns.iter().flatten() {
            if cxn.is_dead() {
                continue;
            }
            if now - cxn.last_write() > idle && !cxn.is_writing() {
                Arc::clone(cxn).die();
                continue;
            }
            if now - cxn.last_read() > idle && !cxn.is_reading() {
                Arc::clone(cxn).die();
            }
        }
    }
}

/// Pick the version to encode a request at: the request's own max,
/// clamped by the user's configured max and the broker's learned max
/// (negative meaning unknown), then checked against the user's configured
/// min.
fn select_version(
    req_max: i16,
    user_max: Option<i16>,
    broker_max: i16,
    user_min: Option<i16>,
) -> Result<i16> {
    let mut our_max = req_max;
    if let Some(user_max) = user_max {
        if user_max < our_max {
            our_max = user_max;
        }
    }

    // A negative broker max means the peer predates ApiVersions and we
    // stick with our own max.
    let mut version = our_max;
    if broker_max >= 0 && broker_max < our_max {
        version = broker_max;
    }

    if let Some(user_min) = user_min {
        if version < user_min {
            return Err(Error::BrokerTooOld);
        }
    }
    Ok(version)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn seed_ids_stay_clear_of_real_ids() {
        assert_eq!(unknown_seed_id(0), i32::MIN);
        assert_eq!(unknown_seed_id(3), i32::MIN + 3);
        assert!(unknown_seed_id(1000) < UNKNOWN_CONTROLLER_ID);
    }

    #[test]
    fn metadata_equality_treats_missing_racks_as_equal() {
        let a = BrokerMetadata {
            node_id: 1,
            host: "localhost".to_string(),
            port: 9092,
            rack: None,
        };
        let mut b = a.clone();
        assert_eq!(a, b);

        b.rack = Some("east".to_string());
        assert_ne!(a, b);

        let mut c = a.clone();
        c.port = 9093;
        assert_ne!(a, c);
    }

    #[test]
    fn keys_route_to_their_slots() {
        assert_eq!(slot_for_key(0), SLOT_PRODUCE);
        assert_eq!(slot_for_key(1), SLOT_FETCH);
        assert_eq!(slot_for_key(3), SLOT_NORMAL);
        assert_eq!(slot_for_key(18), SLOT_NORMAL);
    }

    #[test]
    fn version_selection_clamps_in_order() {
        // nothing configured, broker unknown: our max wins
        assert_eq!(select_version(9, None, -1, None), Ok(9));
        // broker below us
        assert_eq!(select_version(9, None, 7, None), Ok(7));
        // broker above us
        assert_eq!(select_version(3, None, 7, None), Ok(3));
    }

    #[test]
    fn version_selection_applies_user_bounds() {
        // user max below request max
        assert_eq!(select_version(9, Some(5), -1, None), Ok(5));
        // broker clamps below user min
        assert_eq!(select_version(9, None, 2, Some(4)), Err(Error::BrokerTooOld));
        // min satisfied after clamping
        assert_eq!(select_version(9, Some(6), 5, Some(4)), Ok(5));
    }
}
