//! Parsed WARC records and their canonical byte form.

use crate::errors::{Result, WarcMapError};
use crate::format::WarcVersion;
use time::OffsetDateTime;

pub const RECORD_ID: &str = "WARC-Record-ID";
pub const TARGET_URI: &str = "WARC-Target-URI";
pub const DATE: &str = "WARC-Date";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const RECORD_TYPE: &str = "WARC-Type";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarcRecord {
    pub version: WarcVersion,
    /// Header fields in file order, values trimmed.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl WarcRecord {
    /// Builds a record with `Content-Length` set from `body`.
    pub fn new(version: WarcVersion, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        let mut r = Self { version, headers, body };
        let len = r.body.len().to_string();
        match r.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(CONTENT_LENGTH)) {
            Some((_, v)) => *v = len,
            None => r.headers.push((CONTENT_LENGTH.to_string(), len)),
        }
        r
    }

    /// First value of `name`, compared ASCII-case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn record_id(&self) -> Option<&str> { self.header(RECORD_ID) }
    pub fn target_uri(&self) -> Option<&str> { self.header(TARGET_URI) }
    pub fn date(&self) -> Option<&str> { self.header(DATE) }
    pub fn content_type(&self) -> Option<&str> { self.header(CONTENT_TYPE) }
    pub fn record_type(&self) -> Option<&str> { self.header(RECORD_TYPE) }

    pub fn content_length(&self) -> Option<u64> {
        self.header(CONTENT_LENGTH).and_then(|v| v.parse().ok())
    }

    pub fn timestamp(&self) -> Option<OffsetDateTime> {
        self.date().and_then(|d| self.version.parse_date(d))
    }

    /// Version line, one `Name: value` line per header, blank line, body.
    /// Lines end with the version's line ending.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let eol = self.version.line_ending();
        let hdr_len: usize = self.headers.iter().map(|(k, v)| k.len() + v.len() + 2 + eol.len()).sum();
        let mut out = Vec::with_capacity(self.version.start_marker().len() + hdr_len + eol.len() + self.body.len());
        out.extend_from_slice(self.version.start_marker());
        for (k, v) in &self.headers {
            out.extend_from_slice(k.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(v.as_bytes());
            out.extend_from_slice(eol);
        }
        out.extend_from_slice(eol);
        out.extend_from_slice(&self.body);
        out
    }

    /// Canonical form plus the record terminator, as it appears in a corpus file.
    pub fn write_framed(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_canonical_bytes());
        out.extend_from_slice(self.version.record_terminator());
    }

    pub fn from_canonical_bytes(bytes: &[u8]) -> Result<Self> {
        let version = WarcVersion::ALL
            .into_iter()
            .find(|v| bytes.starts_with(v.start_marker()))
            .ok_or_else(|| WarcMapError::malformed(0, "unrecognized version line"))?;
        let marker = version.start_marker().len();
        let term = version.header_terminator();
        // headers may be empty, in which case the blank line follows the marker directly
        let (header_block, body_start) = if bytes[marker..].starts_with(version.line_ending()) {
            (&bytes[marker..marker], marker + version.line_ending().len())
        } else {
            let rel = memchr::memmem::find(&bytes[marker..], term)
                .ok_or_else(|| WarcMapError::malformed(0, "unterminated header block"))?;
            let header_end = marker + rel + version.line_ending().len();
            (&bytes[marker..header_end], marker + rel + term.len())
        };
        let headers = parse_header_lines(header_block, 0)?;
        let body = bytes[body_start..].to_vec();
        let record = Self { version, headers, body };
        match record.content_length() {
            Some(n) if n == record.body.len() as u64 => Ok(record),
            Some(n) => Err(WarcMapError::malformed(
                0,
                format!("Content-Length {n} does not match body of {} bytes", record.body.len()),
            )),
            None => Err(WarcMapError::malformed(0, "missing Content-Length")),
        }
    }
}

/// Parses `Name: value` lines; lines starting with space or tab continue the
/// previous value. `\r` before `\n` is stripped so either line ending works.
pub fn parse_header_lines(block: &[u8], offset: u64) -> Result<Vec<(String, String)>> {
    let text = std::str::from_utf8(block)
        .map_err(|e| WarcMapError::malformed(offset, format!("header block is not UTF-8: {e}")))?;
    let mut headers: Vec<(String, String)> = Vec::new();
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            match headers.last_mut() {
                Some((_, v)) => {
                    let cont = line.trim();
                    if !cont.is_empty() {
                        if !v.is_empty() {
                            v.push(' ');
                        }
                        v.push_str(cont);
                    }
                    continue;
                }
                None => return Err(WarcMapError::malformed(offset, "continuation line before first header")),
            }
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| WarcMapError::malformed(offset, format!("header line without colon: {line:?}")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(WarcMapError::malformed(offset, "empty header name"));
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }
    Ok(headers)
}

/// `Content-Length` from a raw header block without a full parse.
pub fn scan_content_length(block: &[u8]) -> Option<&[u8]> {
    block.split(|&b| b == b'\n').find_map(|line| {
        let colon = memchr::memchr(b':', line)?;
        let (name, rest) = line.split_at(colon);
        if trim_bytes(name).eq_ignore_ascii_case(CONTENT_LENGTH.as_bytes()) {
            Some(trim_bytes(&rest[1..]))
        } else {
            None
        }
    })
}

fn trim_bytes(mut b: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = b {
        if !first.is_ascii_whitespace() {
            break;
        }
        b = rest;
    }
    while let [rest @ .., last] = b {
        if !last.is_ascii_whitespace() {
            break;
        }
        b = rest;
    }
    b
}
