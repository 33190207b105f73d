//! Codec round-trip and framing tests.
//!
//! These tests verify:
//! - encode → decode is identity for well-formed frames
//! - binary bodies with embedded NUL bytes survive via content-length
//! - heartbeat items and CRLF framing
//! - protocol errors surface as decode errors, not panics

use bytes::BytesMut;
use cobalt_stomp::{Command, Frame, ProtocolVersion, StompCodec, StompItem};
use tokio_util::codec::{Decoder, Encoder};

fn round_trip(codec: &mut StompCodec, frame: Frame) -> Frame {
    let mut buf = BytesMut::new();
    codec
        .encode(StompItem::Frame(frame), &mut buf)
        .expect("encode failed");
    match codec.decode(&mut buf).expect("decode failed") {
        Some(StompItem::Frame(decoded)) => {
            assert!(buf.is_empty(), "decoder left {} bytes behind", buf.len());
            decoded
        }
        other => panic!("expected frame, got {other:?}"),
    }
}

// ============================================================================
// Round-trip identity
// ============================================================================

#[test]
fn round_trip_simple_frame() {
    let mut codec = StompCodec::new();
    let frame = Frame::new(Command::Send)
        .header("destination", "/queue/test")
        .set_body(b"hello world".to_vec());
    assert_eq!(round_trip(&mut codec, frame.clone()), frame);
}

#[test]
fn round_trip_empty_body_and_headers() {
    let mut codec = StompCodec::new();
    let frame = Frame::new(Command::Disconnect);
    assert_eq!(round_trip(&mut codec, frame.clone()), frame);
}

#[test]
fn round_trip_binary_body_gains_content_length() {
    let mut codec = StompCodec::new();
    let frame = Frame::new(Command::Send)
        .header("destination", "/queue/bin")
        .set_body(vec![0x00, 0xFF, 0x00, 0x01, 0x00]);

    let decoded = round_trip(&mut codec, frame.clone());
    // The encoder added content-length so the NUL-laden body framed
    // correctly; everything else must match.
    assert_eq!(decoded.command, frame.command);
    assert_eq!(decoded.body, frame.body);
    assert_eq!(decoded.get_header("destination"), Some("/queue/bin"));
    assert_eq!(decoded.get_header("content-length"), Some("5"));
}

#[test]
fn round_trip_explicit_content_length_with_nul_body() {
    let mut codec = StompCodec::new();
    let frame = Frame::new(Command::Send)
        .header("destination", "/queue/bin")
        .header("content-length", "3")
        .set_body(vec![0x00, 0x00, 0x00]);
    assert_eq!(round_trip(&mut codec, frame.clone()), frame);
}

#[test]
fn round_trip_utf8_body_has_no_content_length() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::new();
    let frame = Frame::new(Command::Send)
        .header("destination", "/queue/txt")
        .set_body(b"plain text".to_vec());
    codec
        .encode(StompItem::Frame(frame), &mut buf)
        .expect("encode failed");
    let wire = String::from_utf8_lossy(&buf).to_string();
    assert!(!wire.contains("content-length"));
}

// ============================================================================
// Heartbeats
// ============================================================================

#[test]
fn heartbeat_encodes_as_single_newline() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::new();
    codec
        .encode(StompItem::Heartbeat, &mut buf)
        .expect("encode failed");
    assert_eq!(&buf[..], b"\n");
}

#[test]
fn decoder_emits_heartbeat_for_bare_newlines() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"\n\nSEND\ndestination:/q\n\nx\0"[..]);

    assert_eq!(
        codec.decode(&mut buf).expect("decode"),
        Some(StompItem::Heartbeat)
    );
    assert_eq!(
        codec.decode(&mut buf).expect("decode"),
        Some(StompItem::Heartbeat)
    );
    match codec.decode(&mut buf).expect("decode") {
        Some(StompItem::Frame(frame)) => assert_eq!(frame.command, Command::Send),
        other => panic!("expected frame, got {other:?}"),
    }
}

#[test]
fn decoder_accepts_crlf_heartbeat() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"\r\n"[..]);
    assert_eq!(
        codec.decode(&mut buf).expect("decode"),
        Some(StompItem::Heartbeat)
    );
    assert!(buf.is_empty());
}

// ============================================================================
// CRLF framing
// ============================================================================

#[test]
fn crlf_codec_emits_crlf_line_endings() {
    let mut codec = StompCodec::with_options(ProtocolVersion::V1_2, true);
    let mut buf = BytesMut::new();
    let frame = Frame::new(Command::Send)
        .header("destination", "/queue/a")
        .set_body(b"x".to_vec());
    codec
        .encode(StompItem::Frame(frame), &mut buf)
        .expect("encode failed");
    assert_eq!(&buf[..], b"SEND\r\ndestination:/queue/a\r\n\r\nx\0");
}

#[test]
fn decoder_accepts_crlf_frames_regardless_of_encoder_setting() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"MESSAGE\r\ndestination:/queue/a\r\n\r\nbody\0"[..]);
    match codec.decode(&mut buf).expect("decode") {
        Some(StompItem::Frame(frame)) => {
            assert_eq!(frame.command, Command::Message);
            assert_eq!(frame.get_header("destination"), Some("/queue/a"));
            assert_eq!(frame.body, b"body");
        }
        other => panic!("expected frame, got {other:?}"),
    }
}

// ============================================================================
// Decode errors
// ============================================================================

#[test]
fn unknown_command_is_a_decode_error() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"BOGUS\n\n\0"[..]);
    assert!(codec.decode(&mut buf).is_err());
}

#[test]
fn missing_nul_after_content_length_is_a_decode_error() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"SEND\ncontent-length:2\n\nabX\0"[..]);
    assert!(codec.decode(&mut buf).is_err());
}

#[test]
fn invalid_content_length_is_a_decode_error() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"SEND\ncontent-length:nope\n\nx\0"[..]);
    assert!(codec.decode(&mut buf).is_err());
}

#[test]
fn header_line_without_colon_is_a_decode_error() {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::from(&b"SEND\nnocolonhere\n\nx\0"[..]);
    assert!(codec.decode(&mut buf).is_err());
}
