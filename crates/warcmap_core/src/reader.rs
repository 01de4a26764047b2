//! Record splitting shared by every protocol version.

use crate::errors::{Result, WarcMapError};
use crate::format::FormatDescriptor;
use crate::warc::{parse_header_lines, scan_content_length, WarcRecord};
use memchr::memmem;
use std::ops::Range;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Reject records whose `WARC-Date` does not parse in the version's format.
    pub validate_dates: bool,
}

/// Boundaries of one record inside a corpus buffer.
#[derive(Debug, Clone, Copy)]
pub struct RawRecord<'a> {
    /// Absolute offset of the start marker.
    pub offset: u64,
    /// Header lines between the version line and the blank line.
    pub header: &'a [u8],
    pub body: &'a [u8],
    /// Bytes from the start marker through the record terminator.
    pub len: usize,
}

impl RawRecord<'_> {
    pub fn parse(&self, desc: &FormatDescriptor, opts: ParseOptions) -> Result<WarcRecord> {
        let headers = parse_header_lines(self.header, self.offset)?;
        for field in desc.version.required_fields() {
            if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(field)) {
                return Err(WarcMapError::malformed(
                    self.offset,
                    format!("{} record lacks required field {field}", desc.version),
                ));
            }
        }
        let record = WarcRecord {
            version: desc.version,
            headers,
            body: self.body.to_vec(),
        };
        if opts.validate_dates && record.timestamp().is_none() {
            return Err(WarcMapError::malformed(
                self.offset,
                format!("WARC-Date {:?} is not a {} date", record.date().unwrap_or(""), desc.version),
            ));
        }
        Ok(record)
    }
}

/// Lazy, restartable iterator over the records starting inside a byte range.
pub struct RecordSplitter<'a> {
    desc: FormatDescriptor,
    data: &'a [u8],
    range: Range<usize>,
    pos: usize,
    finder: memmem::Finder<'static>,
    done: bool,
}

impl<'a> RecordSplitter<'a> {
    pub fn new(desc: FormatDescriptor, data: &'a [u8], range: Range<usize>) -> Self {
        let end = range.end.min(data.len());
        let start = range.start.min(end);
        Self {
            desc,
            data,
            range: start..end,
            pos: start,
            finder: memmem::Finder::new(desc.version.start_marker()),
            done: false,
        }
    }

    pub fn descriptor(&self) -> &FormatDescriptor { &self.desc }
    pub fn range(&self) -> Range<usize> { self.range.clone() }

    /// Back to the start of the range.
    pub fn reset(&mut self) {
        self.pos = self.range.start;
        self.done = false;
    }

    /// Parses each boundary into a [`WarcRecord`].
    pub fn records(self, opts: ParseOptions) -> impl Iterator<Item = Result<WarcRecord>> + 'a {
        let desc = self.desc;
        self.map(move |raw| raw.and_then(|r| r.parse(&desc, opts)))
    }

    fn next_marker(&self, from: usize) -> Option<usize> {
        let hay = &self.data[from..];
        for rel in self.finder.find_iter(hay) {
            let abs = from + rel;
            if abs >= self.range.end {
                return None;
            }
            if abs == 0 || self.data[abs - 1] == b'\n' {
                return Some(abs);
            }
        }
        None
    }

    fn frame(&self, start: usize) -> Result<RawRecord<'a>> {
        let v = self.desc.version;
        let marker = v.start_marker();
        let eol = v.line_ending();
        let hterm = v.header_terminator();
        let rterm = v.record_terminator();
        let offset = start as u64;

        let hdr_start = start + marker.len();
        // the marker's own line ending closes an empty header block
        let search_from = hdr_start - eol.len();
        let rel = memmem::find(&self.data[search_from..], hterm).ok_or_else(|| {
            WarcMapError::malformed(offset, "header block has no terminator before end of input")
        })?;
        let term_at = search_from + rel;
        let header = &self.data[hdr_start..term_at + eol.len()];
        if memmem::find(header, marker).is_some() {
            return Err(WarcMapError::malformed(offset, "header block runs into the next record"));
        }

        let raw_len = scan_content_length(header)
            .ok_or_else(|| WarcMapError::malformed(offset, "missing Content-Length"))?;
        let declared: usize = std::str::from_utf8(raw_len)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                WarcMapError::malformed(
                    offset,
                    format!("invalid Content-Length {:?}", String::from_utf8_lossy(raw_len)),
                )
            })?;

        let body_start = term_at + hterm.len();
        let body_end = body_start
            .checked_add(declared)
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| {
                WarcMapError::malformed(
                    offset,
                    format!(
                        "Content-Length {declared} runs past end of input ({} bytes left)",
                        self.data.len() - body_start
                    ),
                )
            })?;
        if !self.data[body_end..].starts_with(rterm) {
            return Err(WarcMapError::malformed(
                offset,
                format!("no record terminator after Content-Length {declared}; body span does not match"),
            ));
        }

        // a length that swallows whole records still lands on a terminator
        for rel in self.finder.find_iter(&self.data[body_start..body_end]) {
            if self.data[..body_start + rel].ends_with(rterm) {
                return Err(WarcMapError::malformed(
                    offset,
                    format!("Content-Length {declared} runs into the record at {}", body_start + rel),
                ));
            }
        }
        // a short length may stop on a blank line inside the body
        let mut next = body_end + rterm.len();
        while next < self.data.len() && matches!(self.data[next], b'\r' | b'\n') {
            next += 1;
        }
        if next < self.data.len() && !self.data[next..].starts_with(marker) {
            return Err(WarcMapError::malformed(
                offset,
                format!("Content-Length {declared} ends inside the body; no record follows its terminator"),
            ));
        }

        Ok(RawRecord {
            offset,
            header,
            body: &self.data[body_start..body_end],
            len: body_end + rterm.len() - start,
        })
    }
}

impl<'a> Iterator for RecordSplitter<'a> {
    type Item = Result<RawRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.range.end {
            return None;
        }
        let start = match self.next_marker(self.pos) {
            Some(s) => s,
            None => {
                self.done = true;
                return None;
            }
        };
        if start > self.pos {
            debug!(from = self.pos, to = start, "skipped bytes before record marker");
        }
        match self.frame(start) {
            Ok(rec) => {
                self.pos = start + rec.len;
                Some(Ok(rec))
            }
            Err(e) => {
                self.pos = start + 1;
                Some(Err(e))
            }
        }
    }
}
