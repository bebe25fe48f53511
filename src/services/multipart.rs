//! `multipart/related` parsing for two-part (metadata + media) uploads.

use crate::services::version_store::{StorageError, StorageResult};
use bytes::Bytes;

/// One MIME part: lower-cased headers and the raw payload bytes.
#[derive(Debug, Clone)]
pub struct Part {
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Part {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

fn invalid(message: impl Into<String>) -> StorageError {
    StorageError::InvalidArgument(message.into())
}

/// Extract the `boundary` parameter from a Content-Type header value.
///
/// Accepts both `boundary=abc` and `boundary="abc"`.
pub fn boundary(content_type: &str) -> StorageResult<String> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| invalid("multipart boundary is missing from the Content-Type header"))
}

/// Positions where a delimiter line `--{boundary}` begins.
///
/// A delimiter only counts at the start of the body or of a line, and must
/// be followed by `--`, whitespace or a line break.
fn delimiter_positions(body: &[u8], delimiter: &[u8]) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut i = 0;
    while i + delimiter.len() <= body.len() {
        let at_line_start = i == 0 || body[i - 1] == b'\n';
        if at_line_start && body[i..].starts_with(delimiter) {
            let next = body.get(i + delimiter.len()).copied();
            if matches!(next, None | Some(b'-' | b'\r' | b'\n' | b' ' | b'\t')) {
                positions.push(i);
                i += delimiter.len();
                continue;
            }
        }
        i += 1;
    }
    positions
}

/// Skip the rest of a delimiter line (transport padding and the line break).
fn skip_line(body: &[u8], mut pos: usize) -> usize {
    while pos < body.len() && body[pos] != b'\n' {
        pos += 1;
    }
    (pos + 1).min(body.len())
}

/// End of `body[start..end]` with one trailing CRLF (or LF) removed.
fn strip_trailing_newline(body: &[u8], start: usize, mut end: usize) -> usize {
    if end > start && body[end - 1] == b'\n' {
        end -= 1;
        if end > start && body[end - 1] == b'\r' {
            end -= 1;
        }
    }
    end
}

fn parse_headers(raw: &[u8]) -> StorageResult<Vec<(String, String)>> {
    let text = std::str::from_utf8(raw).map_err(|_| invalid("multipart part headers are not UTF-8"))?;
    let mut headers = Vec::new();
    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| invalid(format!("malformed multipart header `{}`", line)))?;
        headers.push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
    }
    Ok(headers)
}

/// Split a `multipart/related` body into its parts.
pub fn parse_parts(body: &Bytes, boundary: &str) -> StorageResult<Vec<Part>> {
    let delimiter = format!("--{}", boundary);
    let positions = delimiter_positions(body, delimiter.as_bytes());
    if positions.is_empty() {
        return Err(invalid("multipart body does not contain the declared boundary"));
    }

    let last = positions[positions.len() - 1];
    if !body[last + delimiter.len()..].starts_with(b"--") {
        return Err(invalid("multipart body is missing its closing boundary"));
    }

    let mut parts = Vec::new();
    for window in positions.windows(2) {
        let start = skip_line(body, window[0] + delimiter.len());
        let end = strip_trailing_newline(body, start, window[1]);
        let segment = &body[start..end];

        let (header_len, body_offset) = if segment.starts_with(b"\r\n") {
            (0, 2)
        } else if segment.starts_with(b"\n") {
            (0, 1)
        } else {
            match find(segment, b"\r\n\r\n") {
                Some(i) => (i, i + 4),
                None => match find(segment, b"\n\n") {
                    Some(i) => (i, i + 2),
                    // A part with no blank line has headers only.
                    None => (segment.len(), segment.len()),
                },
            }
        };
        let headers = parse_headers(&segment[..header_len])?;
        parts.push(Part {
            headers,
            body: body.slice(start + body_offset..end),
        });
    }
    Ok(parts)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
