//! Protocol-version parsing and the per-version ack-header table.
//!
//! These tests verify:
//! - `version` header parsing
//! - escaping capability flags per version
//! - which headers ACK/NACK frames use in each version

use cobalt_stomp::ProtocolVersion;

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn parses_known_versions() {
    assert_eq!(
        ProtocolVersion::from_header("1.0"),
        Some(ProtocolVersion::V1_0)
    );
    assert_eq!(
        ProtocolVersion::from_header("1.1"),
        Some(ProtocolVersion::V1_1)
    );
    assert_eq!(
        ProtocolVersion::from_header("1.2"),
        Some(ProtocolVersion::V1_2)
    );
    assert_eq!(ProtocolVersion::from_header(" 1.2 "), Some(ProtocolVersion::V1_2));
}

#[test]
fn rejects_unknown_versions() {
    assert_eq!(ProtocolVersion::from_header("2.0"), None);
    assert_eq!(ProtocolVersion::from_header(""), None);
    assert_eq!(ProtocolVersion::from_header("1"), None);
}

#[test]
fn display_matches_header_value() {
    assert_eq!(ProtocolVersion::V1_1.to_string(), "1.1");
}

// ============================================================================
// Escaping flags
// ============================================================================

#[test]
fn escaping_flags_per_version() {
    assert!(!ProtocolVersion::V1_0.escapes_headers());
    assert!(ProtocolVersion::V1_1.escapes_headers());
    assert!(ProtocolVersion::V1_2.escapes_headers());

    assert!(!ProtocolVersion::V1_0.escapes_carriage_return());
    assert!(!ProtocolVersion::V1_1.escapes_carriage_return());
    assert!(ProtocolVersion::V1_2.escapes_carriage_return());
}

// ============================================================================
// Ack-header strategy table
// ============================================================================

#[test]
fn v10_acks_by_message_id() {
    let strategy = ProtocolVersion::V1_0.ack_headers();
    assert_eq!(strategy.frame_header, "message-id");
    assert_eq!(strategy.source_header, "message-id");
    assert!(!strategy.includes_subscription);
}

#[test]
fn v11_acks_by_message_id_with_subscription() {
    let strategy = ProtocolVersion::V1_1.ack_headers();
    assert_eq!(strategy.frame_header, "message-id");
    assert_eq!(strategy.source_header, "message-id");
    assert!(strategy.includes_subscription);
}

#[test]
fn v12_acks_by_ack_header() {
    let strategy = ProtocolVersion::V1_2.ack_headers();
    assert_eq!(strategy.frame_header, "id");
    assert_eq!(strategy.source_header, "ack");
    assert!(!strategy.includes_subscription);
}
