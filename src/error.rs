use std::fmt;
use thiserror::Error;

use crate::frame::Frame;
use crate::version::ProtocolVersion;

/// Broad classification of a broker ERROR frame.
///
/// Brokers signal very different conditions through the same frame type, so
/// the body and `message` header are inspected for well-known substrings to
/// separate flow-control pushback from protocol violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// Resource-allocation / flow-control pushback (e.g. destination quota
    /// exceeded, producer flow control engaged).
    ResourceExhausted,
    /// The broker rejected a frame as a protocol violation.
    ProtocolViolation,
    /// Anything else.
    Other,
}

/// A STOMP ERROR frame received from the broker, decoded into a typed error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// Value of the `message` header, or "unknown error".
    pub message: String,
    /// UTF-8 body text, when present and valid.
    pub body: Option<String>,
    /// `receipt-id` header when the error is a reply to a receipted frame.
    pub receipt_id: Option<String>,
    /// Classification derived from the message and body text.
    pub kind: ServerErrorKind,
    /// The original frame, for callers that need other headers.
    pub frame: Frame,
}

impl ServerError {
    /// Build a `ServerError` from a received ERROR frame.
    pub fn from_frame(frame: Frame) -> Self {
        let message = frame
            .get_header("message")
            .unwrap_or("unknown error")
            .to_string();
        let body = if frame.body.is_empty() {
            None
        } else {
            String::from_utf8(frame.body.clone()).ok()
        };
        let receipt_id = frame.get_header("receipt-id").map(str::to_string);
        let kind = classify(&message, body.as_deref());
        Self {
            message,
            body,
            receipt_id,
            kind,
            frame,
        }
    }
}

fn classify(message: &str, body: Option<&str>) -> ServerErrorKind {
    let mut text = message.to_lowercase();
    if let Some(body) = body {
        text.push('\n');
        text.push_str(&body.to_lowercase());
    }
    if text.contains("resource allocation")
        || text.contains("flow control")
        || text.contains("exceeded")
        || text.contains("usage limit")
    {
        ServerErrorKind::ResourceExhausted
    } else if text.contains("protocol")
        || text.contains("malformed")
        || text.contains("invalid frame")
    {
        ServerErrorKind::ProtocolViolation
    } else {
        ServerErrorKind::Other
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "STOMP server error: {}", self.message)?;
        if let Some(body) = &self.body {
            write!(f, " ({body})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ServerError {}

/// Errors produced by the client.
///
/// Usage errors (duplicate subscription, missing headers, unknown
/// transaction) are returned synchronously from the call that caused them
/// and never trigger reconnection. Transport and broker errors observed on
/// the dispatch task are delivered through the session's error channel.
#[derive(Error, Debug)]
pub enum StompError {
    /// Invalid configuration, raised at construction. Fatal, no retry.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O-level transport error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A connect attempt failed (timeout, refused, TLS mismatch, or ERROR
    /// reply to CONNECT). Retried per the failover policy.
    #[error("connect to {endpoint} failed: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    /// The reconnect attempt cap was exhausted. Fatal.
    #[error("gave up reconnecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// The transport failed and failover is disabled.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Typed broker ERROR frame.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// A subscription with this id is already registered.
    #[error("duplicate subscription id '{0}'")]
    DuplicateSubscription(String),

    /// No subscription with this id is registered.
    #[error("unknown subscription id '{0}'")]
    UnknownSubscription(String),

    /// A destination was required but empty.
    #[error("missing destination")]
    MissingDestination,

    /// The message lacks the header the negotiated version acks by.
    #[error("message has no '{header}' header required to ack under STOMP {version}")]
    MissingAckHeader {
        version: ProtocolVersion,
        header: &'static str,
    },

    /// `begin` was called for a transaction name that is already open.
    #[error("transaction '{0}' is already active")]
    TransactionActive(String),

    /// `commit`/`abort`/transactional ack for a transaction that is not open.
    #[error("transaction '{0}' is not active")]
    UnknownTransaction(String),

    /// No RECEIPT arrived within the bounded wait.
    #[error("receipt timeout: no RECEIPT received for '{0}' within timeout")]
    ReceiptTimeout(String),

    /// The connection dropped before the RECEIPT arrived; the listener is
    /// discarded, never replayed.
    #[error("receipt '{0}' lost: connection dropped before RECEIPT arrived")]
    ReceiptLost(String),

    /// Operation on a closed session.
    #[error("session is closed")]
    Closed,
}
