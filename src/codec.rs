use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{Command, Frame};
use crate::parser::parse_frame_slice;
use crate::version::ProtocolVersion;

/// Items produced or consumed by the codec.
///
/// A `StompItem` is either a decoded [`Frame`] or a `Heartbeat` marker
/// representing a single end-of-line received on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A decoded STOMP frame (command + headers + body)
    Frame(Frame),
    /// A single heartbeat pulse (LF or CRLF)
    Heartbeat,
}

/// Escape a header name or value for wire transmission.
///
/// STOMP 1.1 escapes backslash (`\\`), line feed (`\n`) and colon (`\c`);
/// 1.2 additionally escapes carriage return (`\r`). 1.0 has no escaping.
fn escape_header(input: &str, version: ProtocolVersion) -> String {
    if !version.escapes_headers() {
        return input.to_string();
    }
    let mut result = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            ':' => result.push_str("\\c"),
            '\r' if version.escapes_carriage_return() => result.push_str("\\r"),
            _ => result.push(ch),
        }
    }
    result
}

/// Reverse [`escape_header`]. Unknown escape sequences are a protocol error.
fn unescape_header(input: &[u8], version: ProtocolVersion) -> Result<Vec<u8>, String> {
    if !version.escapes_headers() {
        return Ok(input.to_vec());
    }
    let mut result = Vec::with_capacity(input.len());
    let mut iter = input.iter();
    while let Some(&b) = iter.next() {
        if b != b'\\' {
            result.push(b);
            continue;
        }
        match iter.next() {
            Some(b'\\') => result.push(b'\\'),
            Some(b'n') => result.push(b'\n'),
            Some(b'c') => result.push(b':'),
            Some(b'r') if version.escapes_carriage_return() => result.push(b'\r'),
            Some(&other) => return Err(format!("invalid escape sequence \\{}", other as char)),
            None => return Err("dangling escape at end of header".to_string()),
        }
    }
    Ok(result)
}

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP wire protocol.
///
/// Responsibilities:
/// - Decode incoming bytes into `StompItem::Frame` or `StompItem::Heartbeat`.
/// - Support both NUL-terminated frames and frames using the `content-length`
///   header for binary bodies containing NUL bytes.
/// - Encode `StompItem` back into the wire format, emitting `content-length`
///   when necessary, with LF or (when configured) CRLF line endings.
/// - Apply the header escaping rules of the negotiated protocol version.
///   CONNECT/CONNECTED frames are exempt from escaping per the STOMP spec.
///
/// The codec starts out assuming STOMP 1.2 for the CONNECT exchange; the
/// connection updates it via [`StompCodec::set_version`] once the CONNECTED
/// frame settles negotiation.
#[derive(Debug, Clone)]
pub struct StompCodec {
    version: ProtocolVersion,
    use_crlf: bool,
}

impl StompCodec {
    /// A codec with default framing: STOMP 1.2 escaping, LF line endings.
    pub fn new() -> Self {
        Self::with_options(ProtocolVersion::V1_2, false)
    }

    /// A codec for an explicit protocol version and line-ending convention.
    pub fn with_options(version: ProtocolVersion, use_crlf: bool) -> Self {
        Self { version, use_crlf }
    }

    /// The protocol version currently applied to escaping rules.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Switch the escaping rules after version negotiation.
    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.version = version;
    }

    fn line_ending(&self) -> &'static [u8] {
        if self.use_crlf { b"\r\n" } else { b"\n" }
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// CONNECT and CONNECTED never use header escaping, in any version.
fn escaping_exempt(command: Command) -> bool {
    matches!(
        command,
        Command::Connect | Command::Stomp | Command::Connected
    )
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = io::Error;

    /// Decode bytes from `src` into a `StompItem`.
    ///
    /// Returns
    /// - `Ok(Some(StompItem))` when a full item (frame or heartbeat) was
    ///   decoded; the consumed bytes are advanced out of `src`.
    /// - `Ok(None)` when more bytes are required; `src` is left untouched.
    /// - `Err(io::Error)` on protocol errors (unknown command, invalid UTF-8,
    ///   malformed headers, missing NUL after a content-length body). Errors
    ///   do not corrupt the codec itself but are fatal to the connection.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let chunk = src.chunk();

        // heartbeat: bare LF or CRLF
        match chunk {
            [] => return Ok(None),
            [b'\n', ..] => {
                src.advance(1);
                return Ok(Some(StompItem::Heartbeat));
            }
            [b'\r'] => return Ok(None),
            [b'\r', b'\n', ..] => {
                src.advance(2);
                return Ok(Some(StompItem::Heartbeat));
            }
            _ => {}
        }

        let raw = match parse_frame_slice(chunk) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(e) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("parse error: {e}"),
                ));
            }
        };
        src.advance(raw.consumed);

        let command = Command::from_bytes(&raw.command).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "unknown command: {:?}",
                    String::from_utf8_lossy(&raw.command)
                ),
            )
        })?;

        let version = if escaping_exempt(command) {
            ProtocolVersion::V1_0
        } else {
            self.version
        };
        let mut headers: Vec<(String, String)> = Vec::with_capacity(raw.headers.len());
        for (k, v) in raw.headers {
            let key = unescape_header(&k, version)
                .and_then(|k| String::from_utf8(k).map_err(|e| e.to_string()))
                .map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("invalid header key: {e}"),
                    )
                })?;
            let value = unescape_header(&v, version)
                .and_then(|v| String::from_utf8(v).map_err(|e| e.to_string()))
                .map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("invalid header value: {e}"),
                    )
                })?;
            headers.push((key, value));
        }

        Ok(Some(StompItem::Frame(Frame {
            command,
            headers,
            body: raw.body,
        })))
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = io::Error;

    /// Encode a `StompItem` into `dst`.
    ///
    /// The encoder appends the wire bytes of the item: command line, escaped
    /// header lines, blank line, body and trailing NUL for frames; a single
    /// line ending for heartbeats. A `content-length` header is added when
    /// the body contains NUL bytes or is not valid UTF-8 and the caller did
    /// not provide one.
    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let eol = self.line_ending();
        match item {
            StompItem::Heartbeat => {
                dst.put_slice(eol);
            }
            StompItem::Frame(frame) => {
                dst.extend_from_slice(frame.command.as_str().as_bytes());
                dst.put_slice(eol);

                let mut headers = frame.headers;
                let has_cl = headers
                    .iter()
                    .any(|(k, _)| k.eq_ignore_ascii_case("content-length"));
                if !has_cl && (frame.body.contains(&0) || std::str::from_utf8(&frame.body).is_err())
                {
                    headers.push(("content-length".to_string(), frame.body.len().to_string()));
                }

                let version = if escaping_exempt(frame.command) {
                    ProtocolVersion::V1_0
                } else {
                    self.version
                };
                for (k, v) in headers {
                    dst.extend_from_slice(escape_header(&k, version).as_bytes());
                    dst.put_u8(b':');
                    dst.extend_from_slice(escape_header(&v, version).as_bytes());
                    dst.put_slice(eol);
                }

                dst.put_slice(eol);
                dst.extend_from_slice(&frame.body);
                dst.put_u8(0);
            }
        }

        Ok(())
    }
}
