use std::fmt;

/// STOMP frame commands.
///
/// Covers every client and server command defined by STOMP 1.0 through 1.2.
/// Heartbeats are not frames and are represented separately by
/// [`crate::codec::StompItem::Heartbeat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    /// `STOMP` is the 1.1+ alias for `CONNECT`.
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Begin,
    Commit,
    Abort,
    Ack,
    Nack,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    /// Wire representation of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// Parse a command line as read off the wire.
    ///
    /// Returns `None` for anything that is not a known STOMP command; the
    /// codec treats that as a protocol error.
    pub fn from_bytes(input: &[u8]) -> Option<Command> {
        match input {
            b"CONNECT" => Some(Command::Connect),
            b"STOMP" => Some(Command::Stomp),
            b"CONNECTED" => Some(Command::Connected),
            b"SEND" => Some(Command::Send),
            b"SUBSCRIBE" => Some(Command::Subscribe),
            b"UNSUBSCRIBE" => Some(Command::Unsubscribe),
            b"BEGIN" => Some(Command::Begin),
            b"COMMIT" => Some(Command::Commit),
            b"ABORT" => Some(Command::Abort),
            b"ACK" => Some(Command::Ack),
            b"NACK" => Some(Command::Nack),
            b"DISCONNECT" => Some(Command::Disconnect),
            b"MESSAGE" => Some(Command::Message),
            b"RECEIPT" => Some(Command::Receipt),
            b"ERROR" => Some(Command::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame.
///
/// `Frame` contains the [`Command`], an ordered list of headers (key/value
/// pairs, duplicates allowed) and the raw body bytes. Frames are built once
/// via the builder methods and then handed off by move; no component mutates
/// a frame it did not construct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command (e.g. CONNECT, SEND, SUBSCRIBE)
    pub command: Command,
    /// Ordered headers as (key, value) pairs
    pub headers: Vec<(String, String)>,
    /// Raw body bytes
    pub body: Vec<u8>,
}

impl Frame {
    /// Create a new frame with the given command and empty headers/body.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Add a header (builder style).
    ///
    /// Parameters
    /// - `key`: header name (converted to `String`).
    /// - `value`: header value (converted to `String`).
    ///
    /// Returns the mutated `Frame` allowing builder-style chaining.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Append every header from `headers` (builder style).
    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Request a server RECEIPT for this frame (builder style).
    ///
    /// Adds a `receipt` header with the given id; the server answers with a
    /// RECEIPT frame carrying the same id in `receipt-id`.
    pub fn receipt(self, receipt_id: impl Into<String>) -> Self {
        self.header("receipt", receipt_id)
    }

    /// Set the frame body (builder style).
    pub fn set_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Get the value of a header by name.
    ///
    /// Header names need not be unique; when repeated, the value written last
    /// wins on lookup. Returns `None` if no such header exists.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// True when a header with the given name is present.
    pub fn has_header(&self, key: &str) -> bool {
        self.headers.iter().any(|(k, _)| k == key)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        for (k, v) in &self.headers {
            writeln!(f, "{}: {}", k, v)?;
        }
        writeln!(f, "Body ({} bytes)", self.body.len())
    }
}
