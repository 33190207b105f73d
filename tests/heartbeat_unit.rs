//! Unit tests for heartbeat parsing, negotiation and the liveness monitor.
//!
//! These tests verify:
//! - heart-beat header parsing with malformed input
//! - the max-rule negotiation with 0 as "no preference"
//! - send-due and receive-expiry bookkeeping with grace and miss limits

use cobalt_stomp::{HeartbeatMonitor, negotiate_heartbeats, parse_heartbeat_header};
use std::time::Duration;

// ============================================================================
// parse_heartbeat_header tests
// ============================================================================

#[test]
fn parse_standard_heartbeat() {
    assert_eq!(parse_heartbeat_header("10000,10000"), (10000, 10000));
}

#[test]
fn parse_zero_heartbeat() {
    assert_eq!(parse_heartbeat_header("0,0"), (0, 0));
}

#[test]
fn parse_asymmetric_heartbeat() {
    assert_eq!(parse_heartbeat_header("5000,15000"), (5000, 15000));
}

#[test]
fn parse_whitespace_padded() {
    assert_eq!(parse_heartbeat_header(" 10000 , 10000 "), (10000, 10000));
}

#[test]
fn parse_missing_second_value_defaults_to_zero() {
    assert_eq!(parse_heartbeat_header("10000"), (10000, 0));
}

#[test]
fn parse_empty_string() {
    assert_eq!(parse_heartbeat_header(""), (0, 0));
}

#[test]
fn parse_invalid_fields_default_to_zero() {
    assert_eq!(parse_heartbeat_header("abc,10000"), (0, 10000));
    assert_eq!(parse_heartbeat_header("10000,xyz"), (10000, 0));
    assert_eq!(parse_heartbeat_header("-1,10000"), (0, 10000));
}

#[test]
fn parse_extra_fields_ignored() {
    assert_eq!(parse_heartbeat_header("10000,10000,5000"), (10000, 10000));
}

// ============================================================================
// negotiate_heartbeats tests — the max rule
// ============================================================================

#[test]
fn negotiation_takes_max_of_both_sides() {
    // Client offers (1000, 1000); server replies (500, 2000). Effective send
    // = max(1000, 2000) = 2000 ms, effective receive-check = max(1000, 500)
    // = 1000 ms.
    let (outgoing, incoming) = negotiate_heartbeats(1000, 1000, 500, 2000);
    assert_eq!(outgoing, Some(Duration::from_millis(2000)));
    assert_eq!(incoming, Some(Duration::from_millis(1000)));
}

#[test]
fn zero_on_both_sides_disables_direction() {
    let (outgoing, incoming) = negotiate_heartbeats(0, 0, 0, 0);
    assert_eq!(outgoing, None);
    assert_eq!(incoming, None);
}

#[test]
fn zero_defers_to_the_other_side() {
    // Client requests nothing; server wants to receive every 3 s and will
    // send every 5 s.
    let (outgoing, incoming) = negotiate_heartbeats(0, 0, 5000, 3000);
    assert_eq!(outgoing, Some(Duration::from_millis(3000)));
    assert_eq!(incoming, Some(Duration::from_millis(5000)));
}

#[test]
fn symmetric_agreement_keeps_value() {
    let (outgoing, incoming) = negotiate_heartbeats(10000, 10000, 10000, 10000);
    assert_eq!(outgoing, Some(Duration::from_millis(10000)));
    assert_eq!(incoming, Some(Duration::from_millis(10000)));
}

// ============================================================================
// HeartbeatMonitor tests
// ============================================================================

fn monitor(send_ms: u64, recv_ms: u64, grace: f64, miss_limit: u32) -> HeartbeatMonitor {
    let send = (send_ms > 0).then(|| Duration::from_millis(send_ms));
    let recv = (recv_ms > 0).then(|| Duration::from_millis(recv_ms));
    HeartbeatMonitor::new(send, recv, grace, miss_limit)
}

#[test]
fn send_due_only_after_interval_of_silence() {
    let m = monitor(1000, 0, 2.0, 1);
    assert!(!m.send_due(Duration::from_millis(500)));
    assert!(m.send_due(Duration::from_millis(1000)));
    assert!(m.send_due(Duration::from_millis(1500)));
}

#[test]
fn send_never_due_when_disabled() {
    let m = monitor(0, 0, 2.0, 1);
    assert!(!m.send_due(Duration::from_secs(3600)));
}

#[test]
fn receive_expires_after_one_grace_window_by_default() {
    // 1000 ms interval, grace 2.0, miss limit 1: dead after 2 s of silence.
    let m = monitor(0, 1000, 2.0, 1);
    assert!(!m.receive_expired(Duration::from_millis(1999)));
    assert!(m.receive_expired(Duration::from_millis(2000)));
}

#[test]
fn miss_limit_tolerates_consecutive_missed_windows() {
    // miss limit 3: only the third fully elapsed window trips the watchdog.
    let m = monitor(0, 1000, 2.0, 3);
    assert!(!m.receive_expired(Duration::from_millis(2500))); // 1 window
    assert!(!m.receive_expired(Duration::from_millis(4500))); // 2 windows
    assert!(m.receive_expired(Duration::from_millis(6000))); // 3 windows
}

#[test]
fn missed_windows_counts_whole_windows() {
    let m = monitor(0, 1000, 2.0, 1);
    assert_eq!(m.missed_windows(Duration::from_millis(0)), 0);
    assert_eq!(m.missed_windows(Duration::from_millis(1999)), 0);
    assert_eq!(m.missed_windows(Duration::from_millis(2000)), 1);
    assert_eq!(m.missed_windows(Duration::from_millis(5000)), 2);
}

#[test]
fn receive_never_expires_when_disabled() {
    let m = monitor(1000, 0, 2.0, 1);
    assert!(!m.receive_expired(Duration::from_secs(3600)));
}

#[test]
fn miss_limit_of_zero_is_clamped_to_one() {
    let m = monitor(0, 1000, 1.0, 0);
    assert!(m.receive_expired(Duration::from_millis(1000)));
}
