//! Failover connection: the background task that owns the transport, runs
//! the CONNECT handshake, dispatches inbound frames and reconnects through
//! the endpoint candidate list when the transport fails.
//!
//! Layering follows the session facade on top of this module: the facade
//! keeps the registries (subscriptions, transactions, receipts) in
//! [`Shared`], and the dispatch task reads them to route inbound frames and
//! to restore broker-side state after a reconnect.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use rand::seq::SliceRandom;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::codec::StompItem;
use crate::config::{ClientConfig, Endpoint};
use crate::error::{ServerError, StompError};
use crate::frame::{Command, Frame};
use crate::heartbeat::{HeartbeatMonitor, negotiate_heartbeats, parse_heartbeat_header};
use crate::subscription::AckMode;
use crate::transport::{self, FramedTransport};
use crate::version::ProtocolVersion;

/// Lifecycle of the logical connection.
///
/// Owned by the connection task; everything else observes it through a
/// `watch` channel. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    FailingOver,
    Closed,
}

/// Outcome of the CONNECT/CONNECTED exchange.
#[derive(Debug, Clone, Copy)]
pub struct Negotiated {
    /// Protocol version the broker settled on.
    pub version: ProtocolVersion,
    /// Interval this client must send heartbeats at, when enabled.
    pub send_interval: Option<Duration>,
    /// Interval the broker promised to send at, when enabled.
    pub recv_interval: Option<Duration>,
}

/// One registered subscription, as the dispatch task sees it.
#[derive(Clone)]
pub(crate) struct SubEntry {
    pub(crate) id: String,
    pub(crate) destination: String,
    pub(crate) ack: AckMode,
    /// Extra SUBSCRIBE headers, re-sent on resubscribe after failover.
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) sender: mpsc::Sender<Frame>,
}

/// An open transaction and the messages acked under it, in ack order.
#[derive(Default)]
pub(crate) struct TxEntry {
    pub(crate) replay: Vec<Frame>,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) frames_sent: AtomicU64,
    pub(crate) frames_received: AtomicU64,
    pub(crate) heartbeats_sent: AtomicU64,
    pub(crate) heartbeats_received: AtomicU64,
}

/// State shared between the session facade and the dispatch task. The maps
/// are the coarse lock protecting the two concurrent actors: caller tasks
/// and the dispatch task.
pub(crate) struct Shared {
    pub(crate) subscriptions: Mutex<HashMap<String, SubEntry>>,
    pub(crate) transactions: Mutex<HashMap<String, TxEntry>>,
    pub(crate) receipts: Mutex<HashMap<String, oneshot::Sender<Frame>>>,
    pub(crate) negotiated: Mutex<Option<Negotiated>>,
    pub(crate) counters: Counters,
}

impl Shared {
    fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
            receipts: Mutex::new(HashMap::new()),
            negotiated: Mutex::new(None),
            counters: Counters::default(),
        }
    }
}

/// Deliver a MESSAGE frame to its subscription.
///
/// Lookup is by the `subscription` header when the broker provides one,
/// falling back to a destination scan. A frame for an unknown subscription
/// is dropped with a debug log: after an unsubscribe the broker may still
/// have messages in flight, and that race is not an error. Also used to
/// re-deliver replay buffers on transaction abort.
pub(crate) async fn route_message(shared: &Shared, frame: Frame) {
    let sub_id = frame.get_header("subscription").map(str::to_string);
    let destination = frame.get_header("destination").map(str::to_string);

    let subs = shared.subscriptions.lock().await;
    let entry = sub_id
        .as_deref()
        .and_then(|id| subs.get(id))
        .or_else(|| {
            destination
                .as_deref()
                .and_then(|d| subs.values().find(|e| e.destination == d))
        });
    match entry {
        Some(entry) => {
            if entry.sender.try_send(frame).is_err() {
                warn!(subscription = %entry.id, "subscriber not keeping up; message dropped");
            }
        }
        None => {
            debug!(
                subscription = ?sub_id,
                destination = ?destination,
                "MESSAGE for unknown subscription dropped"
            );
        }
    }
}

/// Handle to the failover connection and its background task.
///
/// Cloning is cheap; all clones drive the same task. The session facade is
/// the only consumer.
#[derive(Clone)]
pub(crate) struct Connection {
    outbound_tx: mpsc::Sender<StompItem>,
    shutdown_tx: broadcast::Sender<()>,
    state_rx: watch::Receiver<ConnectionState>,
    pub(crate) shared: Arc<Shared>,
}

impl Connection {
    /// Spawn the connection task and block until the first CONNECT handshake
    /// succeeds or fails fatally (attempt cap exhausted, or failover
    /// disabled and the sole attempt failed).
    pub(crate) async fn open(
        config: Arc<ClientConfig>,
        error_tx: mpsc::Sender<StompError>,
    ) -> Result<Connection, StompError> {
        let (outbound_tx, outbound_rx) = mpsc::channel::<StompItem>(64);
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (ready_tx, ready_rx) = oneshot::channel();
        let shared = Arc::new(Shared::new());

        tokio::spawn(run(
            config,
            shared.clone(),
            error_tx,
            outbound_rx,
            shutdown_rx,
            state_tx,
            ready_tx,
        ));

        let conn = Connection {
            outbound_tx,
            shutdown_tx,
            state_rx,
            shared,
        };
        match ready_rx.await {
            Ok(Ok(())) => Ok(conn),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(StompError::Closed),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Queue a frame for the dispatch task to write. The queue is what
    /// serializes writers; it also buffers outbound traffic across a
    /// failover window.
    pub(crate) async fn send_frame(&self, frame: Frame) -> Result<(), StompError> {
        if self.state() == ConnectionState::Closed {
            return Err(StompError::Closed);
        }
        self.outbound_tx
            .send(StompItem::Frame(frame))
            .await
            .map_err(|_| StompError::Closed)
    }

    /// Allocate a receipt id and register its one-shot listener.
    pub(crate) async fn register_receipt(&self) -> (String, oneshot::Receiver<Frame>) {
        let id = format!("rcpt-{}", uuid::Uuid::new_v4());
        let (tx, rx) = oneshot::channel();
        self.shared.receipts.lock().await.insert(id.clone(), tx);
        (id, rx)
    }

    pub(crate) async fn remove_receipt(&self, id: &str) {
        self.shared.receipts.lock().await.remove(id);
    }

    /// Ask the background task to stop. Idempotent.
    pub(crate) fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Resolve once the connection reaches `Closed`.
    pub(crate) async fn wait_closed(&self) {
        let mut rx = self.state_rx.clone();
        loop {
            if *rx.borrow_and_update() == ConnectionState::Closed {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

enum LoopExit {
    Shutdown,
    Transport(String),
}

/// The connection task: connect/retry cycle wrapped around the dispatch
/// loop. Exactly one of these runs per session.
async fn run(
    config: Arc<ClientConfig>,
    shared: Arc<Shared>,
    error_tx: mpsc::Sender<StompError>,
    mut outbound_rx: mpsc::Receiver<StompItem>,
    mut shutdown_rx: broadcast::Receiver<()>,
    state_tx: watch::Sender<ConnectionState>,
    ready_tx: oneshot::Sender<Result<(), StompError>>,
) {
    let mut endpoints = config.endpoints.clone();
    if config.randomize_hosts {
        // Shuffled once here; the order then stays fixed for the life of
        // the session.
        endpoints.shuffle(&mut rand::thread_rng());
    }

    let mut ready = Some(ready_tx);
    let mut candidate = 0usize;
    let mut attempts = 0u32;

    let fatal = 'outer: loop {
        state_tx.send_replace(ConnectionState::Connecting);
        let endpoint = endpoints[candidate % endpoints.len()].clone();
        candidate += 1;

        let attempt = tokio::select! {
            _ = shutdown_rx.recv() => break 'outer None,
            result = establish(&endpoint, &config) => result,
        };

        match attempt {
            Ok((framed, negotiated)) => {
                attempts = 0;
                *shared.negotiated.lock().await = Some(negotiated);
                state_tx.send_replace(ConnectionState::Connected);
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
                info!(
                    endpoint = %endpoint.addr(),
                    version = %negotiated.version,
                    "session connected"
                );

                let exit = drive(
                    framed,
                    negotiated,
                    &config,
                    &shared,
                    &error_tx,
                    &mut outbound_rx,
                    &mut shutdown_rx,
                )
                .await;
                match exit {
                    LoopExit::Shutdown => break 'outer None,
                    LoopExit::Transport(reason) => {
                        fail_pending_receipts(&shared).await;
                        if !config.failover {
                            break 'outer Some(StompError::ConnectionLost(reason));
                        }
                        warn!(reason = %reason, "transport failed; failing over");
                        state_tx.send_replace(ConnectionState::FailingOver);
                    }
                }
            }
            Err(e) => {
                attempts += 1;
                warn!(
                    endpoint = %endpoint.addr(),
                    attempt = attempts,
                    error = %e,
                    "connect attempt failed"
                );
                if !config.failover {
                    break 'outer Some(e);
                }
                if config.reconnect.exhausted(attempts) {
                    break 'outer Some(StompError::RetriesExhausted { attempts });
                }
                let delay = config.reconnect.sleep_for(attempts - 1);
                tokio::select! {
                    _ = shutdown_rx.recv() => break 'outer None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    };

    state_tx.send_replace(ConnectionState::Closed);
    fail_pending_receipts(&shared).await;
    if let Some(err) = fatal {
        error!(error = %err, "session closed");
        match ready.take() {
            // Initial connect still blocked: fail it directly.
            Some(tx) => {
                let _ = tx.send(Err(err));
            }
            // Mid-session: deliver on the error channel.
            None => {
                let _ = error_tx.try_send(err);
            }
        }
    }
    debug!("connection task finished");
}

/// Open a transport to `endpoint` and run the CONNECT/CONNECTED handshake.
async fn establish(
    endpoint: &Endpoint,
    config: &ClientConfig,
) -> Result<(FramedTransport, Negotiated), StompError> {
    let mut framed = transport::connect(endpoint, config).await?;

    let client_hb = format!("{},{}", config.heartbeat.0, config.heartbeat.1);
    let vhost = config
        .virtual_host
        .clone()
        .unwrap_or_else(|| endpoint.host.clone());
    let mut connect = Frame::new(Command::Connect)
        .header("accept-version", config.accept_versions.clone())
        .header("host", vhost)
        .header("heart-beat", client_hb.clone());
    if let Some(login) = &endpoint.login {
        connect = connect.header("login", login);
    }
    if let Some(passcode) = &endpoint.passcode {
        connect = connect.header("passcode", passcode);
    }

    framed
        .send(StompItem::Frame(connect))
        .await
        .map_err(|e| StompError::ConnectFailed {
            endpoint: endpoint.addr(),
            reason: format!("CONNECT write failed: {e}"),
        })?;

    let reply = tokio::time::timeout(config.connect_timeout, async {
        loop {
            match framed.next().await {
                Some(Ok(StompItem::Heartbeat)) => continue,
                Some(Ok(StompItem::Frame(frame))) => break Ok(frame),
                Some(Err(e)) => break Err(e.to_string()),
                None => break Err("connection closed during handshake".to_string()),
            }
        }
    })
    .await;
    let frame = match reply {
        Ok(Ok(frame)) => frame,
        Ok(Err(reason)) => {
            return Err(StompError::ConnectFailed {
                endpoint: endpoint.addr(),
                reason,
            });
        }
        Err(_) => {
            return Err(StompError::ConnectFailed {
                endpoint: endpoint.addr(),
                reason: "no CONNECTED frame within connect timeout".to_string(),
            });
        }
    };

    match frame.command {
        Command::Connected => {}
        Command::Error => return Err(StompError::Server(ServerError::from_frame(frame))),
        other => {
            return Err(StompError::ConnectFailed {
                endpoint: endpoint.addr(),
                reason: format!("unexpected {other} frame in reply to CONNECT"),
            });
        }
    }

    // A CONNECTED frame without a version header is a 1.0 broker.
    let version = frame
        .get_header("version")
        .and_then(ProtocolVersion::from_header)
        .unwrap_or(ProtocolVersion::V1_0);
    framed.codec_mut().set_version(version);

    let (cx, cy) = parse_heartbeat_header(&client_hb);
    let (sx, sy) = parse_heartbeat_header(frame.get_header("heart-beat").unwrap_or("0,0"));
    let (send_interval, recv_interval) = negotiate_heartbeats(cx, cy, sx, sy);

    Ok((
        framed,
        Negotiated {
            version,
            send_interval,
            recv_interval,
        },
    ))
}

/// The dispatch loop over one live transport.
///
/// Before anything else it restores broker-side state: every registered
/// subscription is re-subscribed and every open transaction re-begun,
/// directly on the sink. Only then is the outbound queue drained, so
/// publishes buffered during an outage flush after resubscription.
async fn drive(
    framed: FramedTransport,
    negotiated: Negotiated,
    config: &ClientConfig,
    shared: &Shared,
    error_tx: &mpsc::Sender<StompError>,
    outbound_rx: &mut mpsc::Receiver<StompItem>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> LoopExit {
    let (mut sink, mut stream) = framed.split();

    let subs: Vec<SubEntry> = {
        let map = shared.subscriptions.lock().await;
        map.values().cloned().collect()
    };
    for entry in subs {
        let frame = Frame::new(Command::Subscribe)
            .header("id", entry.id.clone())
            .header("destination", entry.destination.clone())
            .header("ack", entry.ack.as_str())
            .headers(entry.headers.clone());
        debug!(id = %entry.id, destination = %entry.destination, "resubscribing");
        if let Err(e) = sink.send(StompItem::Frame(frame)).await {
            return LoopExit::Transport(format!("resubscribe write failed: {e}"));
        }
    }

    let open_txs: Vec<String> = {
        let map = shared.transactions.lock().await;
        map.keys().cloned().collect()
    };
    for name in open_txs {
        debug!(transaction = %name, "reopening transaction");
        let frame = Frame::new(Command::Begin).header("transaction", name);
        if let Err(e) = sink.send(StompItem::Frame(frame)).await {
            return LoopExit::Transport(format!("transaction reopen write failed: {e}"));
        }
    }

    let monitor = HeartbeatMonitor::new(
        negotiated.send_interval,
        negotiated.recv_interval,
        config.heartbeat_grace,
        config.heartbeat_miss_limit,
    );
    let mut last_received = Instant::now();
    let mut last_written = Instant::now();

    let mut hb_tick = tokio::time::interval(
        monitor
            .send_interval()
            .unwrap_or(Duration::from_secs(86400)),
    );
    hb_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut watchdog = tokio::time::interval(config.read_timeout);
    watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Biased: pending outbound frames (a DISCONNECT in particular) are
        // written before a shutdown signal is honored, and shutdown is
        // observed before a broker-side close so an orderly disconnect does
        // not read as a transport failure.
        tokio::select! {
            biased;
            maybe = outbound_rx.recv() => match maybe {
                Some(item) => {
                    let is_frame = matches!(item, StompItem::Frame(_));
                    if let Err(e) = sink.send(item).await {
                        return LoopExit::Transport(format!("write failed: {e}"));
                    }
                    last_written = Instant::now();
                    if is_frame {
                        shared.counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return LoopExit::Shutdown;
                }
            },
            _ = shutdown_rx.recv() => {
                let _ = sink.close().await;
                return LoopExit::Shutdown;
            }
            item = stream.next() => match item {
                Some(Ok(StompItem::Heartbeat)) => {
                    last_received = Instant::now();
                    shared.counters.heartbeats_received.fetch_add(1, Ordering::Relaxed);
                }
                Some(Ok(StompItem::Frame(frame))) => {
                    last_received = Instant::now();
                    shared.counters.frames_received.fetch_add(1, Ordering::Relaxed);
                    dispatch(frame, shared, error_tx).await;
                }
                Some(Err(e)) => return LoopExit::Transport(format!("read failed: {e}")),
                None => return LoopExit::Transport("connection closed by broker".to_string()),
            },
            _ = hb_tick.tick() => {
                // Only beat when nothing else was written within the
                // interval; regular traffic already proves liveness.
                if monitor.send_due(last_written.elapsed()) {
                    match sink.send(StompItem::Heartbeat).await {
                        Ok(()) => {
                            last_written = Instant::now();
                            shared.counters.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) if config.heartbeat_send_strict => {
                            return LoopExit::Transport(format!("heartbeat write failed: {e}"));
                        }
                        Err(e) => warn!(error = %e, "heartbeat write failed"),
                    }
                }
            }
            _ = watchdog.tick() => {
                if monitor.receive_expired(last_received.elapsed()) {
                    let _ = sink.close().await;
                    return LoopExit::Transport(format!(
                        "no traffic from broker for {:?}",
                        last_received.elapsed()
                    ));
                }
            }
        }
    }
}

/// Route one inbound frame by command.
async fn dispatch(frame: Frame, shared: &Shared, error_tx: &mpsc::Sender<StompError>) {
    match frame.command {
        Command::Message => route_message(shared, frame).await,
        Command::Receipt => {
            let Some(id) = frame.get_header("receipt-id").map(str::to_string) else {
                debug!("RECEIPT without receipt-id dropped");
                return;
            };
            let listener = shared.receipts.lock().await.remove(&id);
            match listener {
                Some(tx) => {
                    let _ = tx.send(frame);
                }
                None => debug!(receipt = %id, "RECEIPT without listener dropped"),
            }
        }
        Command::Error => {
            let err = ServerError::from_frame(frame);
            warn!(message = %err.message, kind = ?err.kind, "broker ERROR frame");
            if error_tx.try_send(StompError::Server(err)).is_err() {
                warn!("error channel unavailable; broker error discarded");
            }
        }
        other => debug!(command = %other, "unexpected frame dropped"),
    }
}

/// Drop every pending receipt listener. Waiters observe `ReceiptLost`;
/// listeners are never carried across a reconnect.
async fn fail_pending_receipts(shared: &Shared) {
    let mut receipts = shared.receipts.lock().await;
    if !receipts.is_empty() {
        debug!(count = receipts.len(), "failing pending receipts");
        receipts.clear();
    }
}
