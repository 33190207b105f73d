use std::fmt;

/// Negotiated STOMP protocol version.
///
/// The version is decided by the broker's CONNECTED `version` header; a
/// CONNECTED frame without one is a 1.0 broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolVersion {
    V1_0,
    V1_1,
    V1_2,
}

impl ProtocolVersion {
    /// Wire representation, as used in `accept-version` and `version` headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V1_0 => "1.0",
            ProtocolVersion::V1_1 => "1.1",
            ProtocolVersion::V1_2 => "1.2",
        }
    }

    /// Parse a `version` header value.
    pub fn from_header(value: &str) -> Option<ProtocolVersion> {
        match value.trim() {
            "1.0" => Some(ProtocolVersion::V1_0),
            "1.1" => Some(ProtocolVersion::V1_1),
            "1.2" => Some(ProtocolVersion::V1_2),
            _ => None,
        }
    }

    /// Whether header names and values are backslash-escaped on the wire.
    /// STOMP 1.0 predates the escaping rules.
    pub fn escapes_headers(&self) -> bool {
        !matches!(self, ProtocolVersion::V1_0)
    }

    /// Whether carriage return must be escaped in headers (`\r`, 1.2 only).
    pub fn escapes_carriage_return(&self) -> bool {
        matches!(self, ProtocolVersion::V1_2)
    }

    /// The ack-header strategy for this version. See [`AckHeaders`].
    pub fn ack_headers(&self) -> AckHeaders {
        match self {
            ProtocolVersion::V1_0 => AckHeaders {
                frame_header: "message-id",
                source_header: "message-id",
                includes_subscription: false,
            },
            ProtocolVersion::V1_1 => AckHeaders {
                frame_header: "message-id",
                source_header: "message-id",
                includes_subscription: true,
            },
            ProtocolVersion::V1_2 => AckHeaders {
                frame_header: "id",
                source_header: "ack",
                includes_subscription: false,
            },
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an ACK/NACK frame identifies the message it acknowledges.
///
/// The three protocol versions disagree here: 1.0 and 1.1 echo the message's
/// `message-id` (1.1 additionally requires the `subscription` header), while
/// 1.2 copies the message's `ack` header into an `id` header. Keeping the
/// differences in one table keeps version branching out of the ack path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckHeaders {
    /// Header name written on the outgoing ACK/NACK frame.
    pub frame_header: &'static str,
    /// Header on the received MESSAGE the value is copied from.
    pub source_header: &'static str,
    /// Whether the ACK/NACK must also carry the `subscription` header.
    pub includes_subscription: bool,
}
