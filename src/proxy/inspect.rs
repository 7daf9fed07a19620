//! Minimal inspection of raw HTTP response bytes.
//!
//! The proxy never parses a response into a structured form. It only needs the status line,
//! one header value, and a not-modified probe over the leading bytes.

use std::borrow::Cow;

pub const LAST_MODIFIED: &str = "Last-Modified";

/// Number of leading response bytes searched for [`NOT_MODIFIED_MARKER`].
pub const NOT_MODIFIED_PROBE_LEN: usize = 100;

/// Substring that marks a revalidation answer as "still valid".
///
/// Matched anywhere inside the probe window rather than parsed out of the status line, so a
/// response whose leading bytes mention the marker counts as not-modified.
pub const NOT_MODIFIED_MARKER: &[u8] = b"304 Not Modified";

const HEAD_DELIMITER: &[u8] = b"\r\n\r\n";

/// First line of the response, without its terminator.
pub fn status_line(raw: &[u8]) -> Cow<'_, str> {
    let end = raw
        .iter()
        .position(|b| *b == b'\r' || *b == b'\n')
        .unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end])
}

/// Numeric status taken from the second token of the status line, when there is one.
pub fn status_code(raw: &[u8]) -> Option<u16> {
    let line = status_line(raw);
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

pub fn is_not_modified(raw: &[u8]) -> bool {
    let probe = &raw[..raw.len().min(NOT_MODIFIED_PROBE_LEN)];
    probe
        .windows(NOT_MODIFIED_MARKER.len())
        .any(|window| window == NOT_MODIFIED_MARKER)
}

/// Header block of the response, or `None` when the delimiter never appears.
pub fn header_block(raw: &[u8]) -> Option<&[u8]> {
    raw.windows(HEAD_DELIMITER.len())
        .position(|window| window == HEAD_DELIMITER)
        .map(|end| &raw[..end])
}

/// Trimmed value of the first header called `name` (ASCII case-insensitive).
///
/// Empty values, missing headers, and buffers without a header block all yield `None`.
pub fn header(raw: &[u8], name: &str) -> Option<String> {
    let block = header_block(raw)?;
    let name = name.as_bytes();
    for line in block.split(|b| *b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.len() <= name.len() || line[name.len()] != b':' {
            continue;
        }
        if !line[..name.len()].eq_ignore_ascii_case(name) {
            continue;
        }
        let value = String::from_utf8_lossy(&line[name.len() + 1..]);
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        return Some(value.to_string());
    }
    None
}

/// `Last-Modified` of a stored response, used as the revalidation token.
pub fn validation_token(raw: &[u8]) -> Option<String> {
    header(raw, LAST_MODIFIED)
}
