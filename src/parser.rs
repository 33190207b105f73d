//! Incremental slice parser for inbound STOMP frames.
//!
//! The parser works on a raw byte slice and reports how many bytes a complete
//! frame consumed, so the codec can `advance` its read buffer. Header
//! unescaping is not done here; the codec applies the version-dependent
//! escaping rules after the raw frame is split.

/// A frame parsed out of the read buffer, still in raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawFrame {
    pub command: Vec<u8>,
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    pub body: Vec<u8>,
    /// Total bytes consumed from the input, including the trailing NUL and
    /// any optional trailing line break.
    pub consumed: usize,
}

/// Extract an optional `content-length` header value from a raw header list.
///
/// Returns:
/// - `Ok(Some(n))` when a valid content-length header is present.
/// - `Ok(None)` when no content-length header is present.
/// - `Err` when the header is present but not a valid unsigned integer.
fn content_length(headers: &[(Vec<u8>, Vec<u8>)]) -> Result<Option<usize>, String> {
    for (k, v) in headers {
        if k.eq_ignore_ascii_case(b"content-length") {
            let s = std::str::from_utf8(v).map_err(|e| format!("content-length not utf8: {e}"))?;
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err("empty content-length".to_string());
            }
            return trimmed
                .parse::<usize>()
                .map(Some)
                .map_err(|e| format!("invalid content-length '{trimmed}': {e}"));
        }
    }
    Ok(None)
}

/// Strip one trailing CR, for CRLF line endings.
fn trim_cr(line: &[u8]) -> &[u8] {
    match line {
        [rest @ .., b'\r'] => rest,
        _ => line,
    }
}

/// Parse a single STOMP frame from a raw byte slice.
///
/// Returns `Ok(Some(RawFrame))` when a full frame was parsed, `Ok(None)` when
/// more bytes are required, and `Err` on protocol errors (malformed header
/// line, bad content-length, missing NUL terminator). Lines may end in LF or
/// CRLF; both are accepted regardless of what the encoder is configured to
/// emit.
pub(crate) fn parse_frame_slice(input: &[u8]) -> Result<Option<RawFrame>, String> {
    let len = input.len();
    let mut pos = 0usize;

    // Command line. Leading LF/CRLF heartbeats are consumed by the codec
    // before we get here, so the first line must be a command.
    let cmd_end = match input[pos..].iter().position(|&b| b == b'\n') {
        Some(i) => i,
        None => return Ok(None),
    };
    let command = trim_cr(&input[pos..pos + cmd_end]).to_vec();
    if command.is_empty() {
        return Err("empty command line".to_string());
    }
    pos += cmd_end + 1;

    // Header lines until a blank line.
    let mut headers: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    loop {
        let line_end = match input[pos..].iter().position(|&b| b == b'\n') {
            Some(i) => i,
            None => return Ok(None),
        };
        let line = trim_cr(&input[pos..pos + line_end]);
        pos += line_end + 1;
        if line.is_empty() {
            break;
        }
        match line.iter().position(|&b| b == b':') {
            Some(colon) => {
                headers.push((line[..colon].to_vec(), line[colon + 1..].to_vec()));
            }
            None => {
                return Err(format!(
                    "malformed header line: {:?}",
                    String::from_utf8_lossy(line)
                ));
            }
        }
    }

    // Body: exactly content-length bytes when the header is present (the
    // body may then contain NUL), otherwise everything up to the first NUL.
    let body_end = match content_length(&headers)? {
        Some(n) => {
            if pos + n >= len {
                // need n body bytes plus the terminating NUL
                return Ok(None);
            }
            if input[pos + n] != 0 {
                return Err("missing NUL terminator after content-length body".to_string());
            }
            pos + n
        }
        None => match input[pos..].iter().position(|&b| b == 0) {
            Some(nul) => pos + nul,
            None => return Ok(None),
        },
    };

    let body = input[pos..body_end].to_vec();
    pos = body_end + 1; // past the NUL

    // Tolerate one optional trailing line break after the NUL.
    if pos < len && input[pos] == b'\r' && pos + 1 < len && input[pos + 1] == b'\n' {
        pos += 2;
    } else if pos < len && input[pos] == b'\n' {
        pos += 1;
    }

    Ok(Some(RawFrame {
        command,
        headers,
        body,
        consumed: pos,
    }))
}
