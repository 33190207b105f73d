//! Public session facade.
//!
//! A [`Session`] is the caller-facing handle to one logical broker
//! connection. It keeps the subscription registry, per-transaction replay
//! buffers and receipt listeners, delegates wire operations to the failover
//! connection, and hands asynchronous failures to the owner through an
//! explicit error channel rather than any cross-task signalling.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::connection::{
    Connection, ConnectionState, Negotiated, SubEntry, TxEntry, route_message,
};
use crate::error::StompError;
use crate::frame::{Command, Frame};
use crate::subscription::{AckMode, Subscription};

/// Derive a stable subscription id from destination and headers.
///
/// The id is a UUIDv5 over the destination plus the sorted header pairs, so
/// equal inputs always map to the same id regardless of header order, and a
/// later `unsubscribe` with the same inputs finds the same registration. An
/// explicit `id` header bypasses derivation and is excluded from the name.
pub fn derive_subscription_id(destination: &str, headers: &[(String, String)]) -> String {
    let mut lines: Vec<String> = headers
        .iter()
        .filter(|(k, _)| k != "id")
        .map(|(k, v)| format!("{k}:{v}"))
        .collect();
    lines.sort();
    let mut name = String::from(destination);
    for line in &lines {
        name.push('\n');
        name.push_str(line);
    }
    format!("sub-{}", Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()))
}

/// Frame and heartbeat counters for a session, read from the dispatch task's
/// bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub heartbeats_sent: u64,
    pub heartbeats_received: u64,
}

/// A pending RECEIPT, awaitable with a bounded timeout.
///
/// Resolved at most once. If the connection drops before the broker
/// answers, waiting yields [`StompError::ReceiptLost`]; the listener is
/// never replayed after a reconnect.
pub struct ReceiptHandle {
    id: String,
    rx: oneshot::Receiver<Frame>,
    conn: Connection,
}

impl ReceiptHandle {
    /// The generated receipt id carried in the frame's `receipt` header.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait up to `bound` for the RECEIPT frame.
    pub async fn wait(self, bound: Duration) -> Result<Frame, StompError> {
        let ReceiptHandle { id, rx, conn } = self;
        match tokio::time::timeout(bound, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(StompError::ReceiptLost(id)),
            Err(_) => {
                conn.remove_receipt(&id).await;
                Err(StompError::ReceiptTimeout(id))
            }
        }
    }
}

/// Client session over a failover broker connection.
///
/// Cloning is cheap and every clone drives the same session; operations may
/// be called concurrently from any number of tasks. Inbound dispatch runs on
/// a single background task owned by the connection.
#[derive(Clone)]
pub struct Session {
    conn: Connection,
    config: Arc<ClientConfig>,
    errors: Arc<Mutex<Option<mpsc::Receiver<StompError>>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    /// Validate `config` and connect.
    ///
    /// Blocks until the first CONNECT handshake succeeds on some endpoint,
    /// or fails fatally: configuration errors immediately, connect errors
    /// once the attempt cap is exhausted (or after the first failure when
    /// failover is disabled).
    pub async fn connect(config: ClientConfig) -> Result<Session, StompError> {
        config.validate()?;
        let (error_tx, error_rx) = mpsc::channel::<StompError>(16);
        let config = Arc::new(config);
        let conn = Connection::open(config.clone(), error_tx).await?;
        Ok(Session {
            conn,
            config,
            errors: Arc::new(Mutex::new(Some(error_rx))),
        })
    }

    /// Take the error channel receiver.
    ///
    /// Asynchronous failures — broker ERROR frames, fatal reconnect
    /// exhaustion — are delivered here instead of being raised into any
    /// particular task. Can be taken once; returns `None` afterwards.
    pub async fn take_error_receiver(&self) -> Option<mpsc::Receiver<StompError>> {
        self.errors.lock().await.take()
    }

    // ---- read-only status ----

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// True while a transport is live and the handshake is complete.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// True once the session reached its terminal state.
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Outcome of the most recent CONNECT handshake: negotiated protocol
    /// version and heartbeat intervals.
    pub async fn negotiated(&self) -> Option<Negotiated> {
        *self.conn.shared.negotiated.lock().await
    }

    /// Frame/heartbeat counters.
    pub fn stats(&self) -> SessionStats {
        let c = &self.conn.shared.counters;
        SessionStats {
            frames_sent: c.frames_sent.load(Ordering::Relaxed),
            frames_received: c.frames_received.load(Ordering::Relaxed),
            heartbeats_sent: c.heartbeats_sent.load(Ordering::Relaxed),
            heartbeats_received: c.heartbeats_received.load(Ordering::Relaxed),
        }
    }

    // ---- subscriptions ----

    /// Subscribe to a destination with no extra headers.
    pub async fn subscribe(
        &self,
        destination: &str,
        ack: AckMode,
    ) -> Result<Subscription, StompError> {
        self.subscribe_with_headers(destination, ack, Vec::new())
            .await
    }

    /// Subscribe to a destination.
    ///
    /// The subscription id is taken from an `id` entry in `headers` when
    /// present, otherwise derived deterministically from destination and
    /// headers (see [`derive_subscription_id`]). Registering an id twice
    /// fails with [`StompError::DuplicateSubscription`] and leaves the
    /// registry exactly as it was. The remaining headers are forwarded on
    /// SUBSCRIBE and persisted for automatic resubscribe after failover.
    pub async fn subscribe_with_headers(
        &self,
        destination: &str,
        ack: AckMode,
        headers: Vec<(String, String)>,
    ) -> Result<Subscription, StompError> {
        if destination.is_empty() {
            return Err(StompError::MissingDestination);
        }
        let id = headers
            .iter()
            .rev()
            .find(|(k, _)| k == "id")
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| derive_subscription_id(destination, &headers));
        let extra: Vec<(String, String)> = headers.into_iter().filter(|(k, _)| k != "id").collect();

        let (tx, rx) = mpsc::channel::<Frame>(16);
        {
            let mut subs = self.conn.shared.subscriptions.lock().await;
            if subs.contains_key(&id) {
                return Err(StompError::DuplicateSubscription(id));
            }
            subs.insert(
                id.clone(),
                SubEntry {
                    id: id.clone(),
                    destination: destination.to_string(),
                    ack,
                    headers: extra.clone(),
                    sender: tx,
                },
            );
        }

        let frame = Frame::new(Command::Subscribe)
            .header("id", id.clone())
            .header("destination", destination)
            .header("ack", ack.as_str())
            .headers(extra);
        if let Err(e) = self.conn.send_frame(frame).await {
            self.conn.shared.subscriptions.lock().await.remove(&id);
            return Err(e);
        }

        Ok(Subscription::new(
            id,
            destination.to_string(),
            rx,
            self.clone(),
        ))
    }

    /// Unsubscribe by subscription id.
    pub async fn unsubscribe(&self, id: &str) -> Result<(), StompError> {
        if self
            .conn
            .shared
            .subscriptions
            .lock()
            .await
            .remove(id)
            .is_none()
        {
            return Err(StompError::UnknownSubscription(id.to_string()));
        }
        self.conn
            .send_frame(Frame::new(Command::Unsubscribe).header("id", id))
            .await
    }

    /// Unsubscribe by recomputing the id from the same destination and
    /// headers that were passed to `subscribe_with_headers`.
    pub async fn unsubscribe_destination(
        &self,
        destination: &str,
        headers: &[(String, String)],
    ) -> Result<(), StompError> {
        let id = headers
            .iter()
            .rev()
            .find(|(k, _)| k == "id")
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| derive_subscription_id(destination, headers));
        self.unsubscribe(&id).await
    }

    // ---- publishing ----

    /// Send a message to a destination (fire-and-forget).
    ///
    /// To publish inside a transaction, include a `transaction` header with
    /// the open transaction's name.
    pub async fn publish(
        &self,
        destination: &str,
        body: impl Into<Vec<u8>>,
        headers: Vec<(String, String)>,
    ) -> Result<(), StompError> {
        let frame = self.build_send(destination, body.into(), headers)?;
        self.conn.send_frame(frame).await
    }

    /// Send a message and register a one-shot receipt listener. The
    /// returned handle resolves when the broker confirms the SEND.
    pub async fn publish_with_receipt(
        &self,
        destination: &str,
        body: impl Into<Vec<u8>>,
        headers: Vec<(String, String)>,
    ) -> Result<ReceiptHandle, StompError> {
        let frame = self.build_send(destination, body.into(), headers)?;
        self.send_with_receipt(frame).await
    }

    fn build_send(
        &self,
        destination: &str,
        body: Vec<u8>,
        headers: Vec<(String, String)>,
    ) -> Result<Frame, StompError> {
        if destination.is_empty() {
            return Err(StompError::MissingDestination);
        }
        Ok(Frame::new(Command::Send)
            .header("destination", destination)
            .headers(headers)
            .set_body(body))
    }

    async fn send_with_receipt(&self, frame: Frame) -> Result<ReceiptHandle, StompError> {
        let (id, rx) = self.conn.register_receipt().await;
        if let Err(e) = self.conn.send_frame(frame.receipt(id.clone())).await {
            self.conn.remove_receipt(&id).await;
            return Err(e);
        }
        Ok(ReceiptHandle {
            id,
            rx,
            conn: self.conn.clone(),
        })
    }

    // ---- transactions ----

    /// Open a transaction. The name must not already be active.
    pub async fn begin(&self, transaction: &str) -> Result<(), StompError> {
        {
            let mut txs = self.conn.shared.transactions.lock().await;
            if txs.contains_key(transaction) {
                return Err(StompError::TransactionActive(transaction.to_string()));
            }
            txs.insert(transaction.to_string(), TxEntry::default());
        }
        let result = self
            .conn
            .send_frame(Frame::new(Command::Begin).header("transaction", transaction))
            .await;
        if result.is_err() {
            self.conn.shared.transactions.lock().await.remove(transaction);
        }
        result
    }

    /// Commit a transaction and discard its replay buffer.
    pub async fn commit(&self, transaction: &str) -> Result<(), StompError> {
        if self
            .conn
            .shared
            .transactions
            .lock()
            .await
            .remove(transaction)
            .is_none()
        {
            return Err(StompError::UnknownTransaction(transaction.to_string()));
        }
        self.conn
            .send_frame(Frame::new(Command::Commit).header("transaction", transaction))
            .await
    }

    /// Abort a transaction.
    ///
    /// After the ABORT frame is sent, every message acked under the
    /// transaction is re-delivered to its original subscription in ack
    /// order, then the buffer is discarded.
    pub async fn abort(&self, transaction: &str) -> Result<(), StompError> {
        let entry = self
            .conn
            .shared
            .transactions
            .lock()
            .await
            .remove(transaction)
            .ok_or_else(|| StompError::UnknownTransaction(transaction.to_string()))?;
        self.conn
            .send_frame(Frame::new(Command::Abort).header("transaction", transaction))
            .await?;
        if !entry.replay.is_empty() {
            debug!(
                transaction = %transaction,
                count = entry.replay.len(),
                "replaying acked messages after abort"
            );
            for frame in entry.replay {
                route_message(&self.conn.shared, frame).await;
            }
        }
        Ok(())
    }

    // ---- acknowledgements ----

    /// Acknowledge a received MESSAGE frame.
    ///
    /// The identifying header is derived from the message's own headers
    /// according to the negotiated protocol version (`ack` → `id` for 1.2,
    /// `message-id` for 1.1/1.0).
    pub async fn ack(&self, message: &Frame) -> Result<(), StompError> {
        let frame = self.build_acknowledge(Command::Ack, message, None).await?;
        self.conn.send_frame(frame).await
    }

    /// Acknowledge a message under an open transaction. The message joins
    /// the transaction's replay buffer before the ACK frame is sent, so an
    /// `abort` re-delivers it.
    pub async fn ack_in(&self, message: &Frame, transaction: &str) -> Result<(), StompError> {
        let frame = self
            .build_acknowledge(Command::Ack, message, Some(transaction))
            .await?;
        self.conn.send_frame(frame).await
    }

    /// Acknowledge a message and request a broker receipt for the ACK.
    pub async fn ack_with_receipt(&self, message: &Frame) -> Result<ReceiptHandle, StompError> {
        let frame = self.build_acknowledge(Command::Ack, message, None).await?;
        self.send_with_receipt(frame).await
    }

    /// Negative-acknowledge a received MESSAGE frame.
    pub async fn nack(&self, message: &Frame) -> Result<(), StompError> {
        let frame = self.build_acknowledge(Command::Nack, message, None).await?;
        self.conn.send_frame(frame).await
    }

    /// Negative-acknowledge a message under an open transaction.
    pub async fn nack_in(&self, message: &Frame, transaction: &str) -> Result<(), StompError> {
        let frame = self
            .build_acknowledge(Command::Nack, message, Some(transaction))
            .await?;
        self.conn.send_frame(frame).await
    }

    async fn build_acknowledge(
        &self,
        command: Command,
        message: &Frame,
        transaction: Option<&str>,
    ) -> Result<Frame, StompError> {
        let negotiated = self.negotiated().await.ok_or(StompError::Closed)?;
        let strategy = negotiated.version.ack_headers();
        let value = message
            .get_header(strategy.source_header)
            .ok_or(StompError::MissingAckHeader {
                version: negotiated.version,
                header: strategy.source_header,
            })?
            .to_string();

        let mut frame = Frame::new(command).header(strategy.frame_header, value);
        if strategy.includes_subscription {
            let sub = message
                .get_header("subscription")
                .ok_or(StompError::MissingAckHeader {
                    version: negotiated.version,
                    header: "subscription",
                })?;
            frame = frame.header("subscription", sub);
        }
        if let Some(name) = transaction {
            // Buffer before sending so a later abort can re-deliver. Only
            // positive acks replay; a nacked message goes back to the broker.
            if command == Command::Ack {
                let mut txs = self.conn.shared.transactions.lock().await;
                let entry = txs
                    .get_mut(name)
                    .ok_or_else(|| StompError::UnknownTransaction(name.to_string()))?;
                entry.replay.push(message.clone());
            } else if !self.conn.shared.transactions.lock().await.contains_key(name) {
                return Err(StompError::UnknownTransaction(name.to_string()));
            }
            frame = frame.header("transaction", name);
        }
        Ok(frame)
    }

    // ---- shutdown ----

    /// Close the session.
    ///
    /// Sends DISCONNECT (waiting for its receipt up to the configured bound
    /// when `disconnect_receipt_timeout` is set), stops the dispatch task
    /// and closes the transport. Idempotent; concurrent and repeated calls
    /// are safe.
    pub async fn disconnect(&self) -> Result<(), StompError> {
        if self.is_closed() {
            return Ok(());
        }
        match self.config.disconnect_receipt_timeout {
            Some(bound) => {
                let (id, rx) = self.conn.register_receipt().await;
                let frame = Frame::new(Command::Disconnect).receipt(id.clone());
                if self.conn.send_frame(frame).await.is_ok() {
                    match tokio::time::timeout(bound, rx).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(_)) => debug!("connection dropped before DISCONNECT receipt"),
                        Err(_) => {
                            self.conn.remove_receipt(&id).await;
                            debug!("DISCONNECT receipt timed out");
                        }
                    }
                }
            }
            None => {
                let _ = self
                    .conn
                    .send_frame(Frame::new(Command::Disconnect))
                    .await;
            }
        }
        self.conn.shutdown();
        self.conn.wait_closed().await;
        Ok(())
    }
}
