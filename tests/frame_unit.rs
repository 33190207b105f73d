//! Unit tests for the Frame type and Command enum.
//!
//! These tests verify:
//! - Command wire names and parsing
//! - Frame builder methods
//! - Header lookup semantics (duplicates, last-wins)

use cobalt_stomp::{Command, Frame};

// ============================================================================
// Command tests
// ============================================================================

#[test]
fn command_round_trips_through_wire_name() {
    let all = [
        Command::Connect,
        Command::Stomp,
        Command::Connected,
        Command::Send,
        Command::Subscribe,
        Command::Unsubscribe,
        Command::Begin,
        Command::Commit,
        Command::Abort,
        Command::Ack,
        Command::Nack,
        Command::Disconnect,
        Command::Message,
        Command::Receipt,
        Command::Error,
    ];
    for command in all {
        assert_eq!(
            Command::from_bytes(command.as_str().as_bytes()),
            Some(command)
        );
    }
}

#[test]
fn command_rejects_unknown_names() {
    assert_eq!(Command::from_bytes(b"FROBNICATE"), None);
    assert_eq!(Command::from_bytes(b"send"), None); // case-sensitive
    assert_eq!(Command::from_bytes(b""), None);
}

#[test]
fn command_display_matches_wire_name() {
    assert_eq!(format!("{}", Command::Subscribe), "SUBSCRIBE");
    assert_eq!(format!("{}", Command::Error), "ERROR");
}

// ============================================================================
// Frame builder tests
// ============================================================================

#[test]
fn builder_chains_headers_and_body() {
    let frame = Frame::new(Command::Send)
        .header("destination", "/queue/test")
        .header("content-type", "text/plain")
        .set_body(b"hello".to_vec());

    assert_eq!(frame.command, Command::Send);
    assert_eq!(frame.get_header("destination"), Some("/queue/test"));
    assert_eq!(frame.get_header("content-type"), Some("text/plain"));
    assert_eq!(frame.body, b"hello");
}

#[test]
fn receipt_builder_adds_receipt_header() {
    let frame = Frame::new(Command::Send)
        .header("destination", "/queue/test")
        .receipt("rcpt-1");

    assert_eq!(frame.get_header("receipt"), Some("rcpt-1"));
    assert_eq!(frame.get_header("destination"), Some("/queue/test"));
}

#[test]
fn headers_builder_appends_in_order() {
    let frame = Frame::new(Command::Subscribe).headers(vec![
        ("a".to_string(), "1".to_string()),
        ("b".to_string(), "2".to_string()),
    ]);
    assert_eq!(frame.headers.len(), 2);
    assert_eq!(frame.headers[0], ("a".to_string(), "1".to_string()));
    assert_eq!(frame.headers[1], ("b".to_string(), "2".to_string()));
}

// ============================================================================
// Header lookup semantics
// ============================================================================

#[test]
fn get_header_returns_none_when_absent() {
    let frame = Frame::new(Command::Send);
    assert_eq!(frame.get_header("destination"), None);
    assert!(!frame.has_header("destination"));
}

#[test]
fn duplicate_header_last_wins_on_lookup() {
    let frame = Frame::new(Command::Message)
        .header("priority", "low")
        .header("priority", "high");

    // Both entries are kept in order, but lookup sees the latest value.
    assert_eq!(frame.headers.len(), 2);
    assert_eq!(frame.get_header("priority"), Some("high"));
}

#[test]
fn header_lookup_is_case_sensitive() {
    let frame = Frame::new(Command::Message).header("Message-Id", "m1");
    assert_eq!(frame.get_header("message-id"), None);
    assert_eq!(frame.get_header("Message-Id"), Some("m1"));
}

#[test]
fn display_includes_command_and_body_length() {
    let frame = Frame::new(Command::Connect)
        .header("accept-version", "1.2")
        .set_body(b"hello".to_vec());
    let rendered = format!("{frame}");
    assert!(rendered.contains("CONNECT"));
    assert!(rendered.contains("accept-version: 1.2"));
    assert!(rendered.contains("Body (5 bytes)"));
}
