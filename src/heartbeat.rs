//! Heartbeat negotiation and liveness bookkeeping.
//!
//! STOMP negotiates two independent directions during the CONNECT/CONNECTED
//! exchange: how often the client promises to send heartbeats, and the
//! minimum cadence at which it expects to receive them. Each effective
//! interval is the max of the two sides' requests, with 0 meaning "no
//! preference" on either side.

use std::time::Duration;

/// Parse a STOMP `heart-beat` header value (format: "cx,cy", milliseconds).
///
/// Missing or invalid fields default to `0` (disabled), matching how brokers
/// treat absent heart-beat headers.
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let cx = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let cy = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (cx, cy)
}

/// Negotiate heartbeat intervals between client and server.
///
/// Parameters
/// - `client_out`: how often the client offered to send heartbeats (ms).
/// - `client_in`: how often the client wants to receive heartbeats (ms).
/// - `server_out`: the server's advertised outgoing interval (ms).
/// - `server_in`: the interval the server wants to receive at (ms).
///
/// Returns `(outgoing, incoming)`: `outgoing` is the interval this client
/// must send at, `incoming` the interval it may expect to receive at. Each
/// is `None` when that direction is disabled. Per the STOMP rule the
/// effective value is `max` of the corresponding client and server values,
/// where 0 means "none requested" and defers to the other side.
pub fn negotiate_heartbeats(
    client_out: u64,
    client_in: u64,
    server_out: u64,
    server_in: u64,
) -> (Option<Duration>, Option<Duration>) {
    let negotiated_out_ms = std::cmp::max(client_out, server_in);
    let negotiated_in_ms = std::cmp::max(client_in, server_out);

    let outgoing = if negotiated_out_ms == 0 {
        None
    } else {
        Some(Duration::from_millis(negotiated_out_ms))
    };
    let incoming = if negotiated_in_ms == 0 {
        None
    } else {
        Some(Duration::from_millis(negotiated_in_ms))
    };
    (outgoing, incoming)
}

/// Negotiated heartbeat cadence plus the local failure-detection policy.
///
/// The monitor itself is pure bookkeeping; the dispatch task owns the clock
/// and asks it whether a heartbeat is due or the peer should be declared
/// dead.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatMonitor {
    send_interval: Option<Duration>,
    recv_interval: Option<Duration>,
    grace_multiplier: f64,
    miss_limit: u32,
}

impl HeartbeatMonitor {
    /// Build a monitor from negotiated intervals and the configured
    /// watchdog policy.
    ///
    /// `grace_multiplier` scales the receive interval before a window counts
    /// as missed; `miss_limit` is how many consecutive missed windows are
    /// tolerated before the transport is declared failed (1 = fail on the
    /// first grace expiry).
    pub fn new(
        send_interval: Option<Duration>,
        recv_interval: Option<Duration>,
        grace_multiplier: f64,
        miss_limit: u32,
    ) -> Self {
        Self {
            send_interval,
            recv_interval,
            grace_multiplier,
            miss_limit: miss_limit.max(1),
        }
    }

    /// Interval at which this client promised to send heartbeats.
    pub fn send_interval(&self) -> Option<Duration> {
        self.send_interval
    }

    /// Interval at which the server promised to send heartbeats.
    pub fn recv_interval(&self) -> Option<Duration> {
        self.recv_interval
    }

    /// Whether a heartbeat frame is due, given the time since the last
    /// outbound write of any kind. Regular traffic counts as liveness, so no
    /// heartbeat is sent while other frames are flowing.
    pub fn send_due(&self, since_last_write: Duration) -> bool {
        match self.send_interval {
            Some(interval) => since_last_write >= interval,
            None => false,
        }
    }

    /// How many receive windows have fully elapsed without traffic.
    ///
    /// One window is `recv_interval × grace_multiplier`. Returns 0 when
    /// receive heartbeats are disabled.
    pub fn missed_windows(&self, since_last_received: Duration) -> u32 {
        let Some(interval) = self.recv_interval else {
            return 0;
        };
        let window = interval.mul_f64(self.grace_multiplier);
        if window.is_zero() {
            return 0;
        }
        (since_last_received.as_secs_f64() / window.as_secs_f64()) as u32
    }

    /// Whether the peer has been silent long enough to declare the transport
    /// failed: `miss_limit` consecutive grace windows without a byte.
    pub fn receive_expired(&self, since_last_received: Duration) -> bool {
        self.recv_interval.is_some() && self.missed_windows(since_last_received) >= self.miss_limit
    }
}
