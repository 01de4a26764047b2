//! Corpus formats and the version dispatcher.

use crate::errors::{Result, WarcMapError};
use crate::mapper::{KeyLayout, KeyMapper};
use crate::reader::RecordSplitter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

/// WARC protocol versions found in the supported corpora.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WarcVersion {
    #[serde(rename = "WARC/0.18")]
    V018,
    #[serde(rename = "WARC/1.0")]
    V10,
}

impl WarcVersion {
    pub const ALL: [WarcVersion; 2] = [WarcVersion::V018, WarcVersion::V10];

    pub const fn tag(self) -> &'static str {
        match self {
            Self::V018 => "WARC/0.18",
            Self::V10 => "WARC/1.0",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.tag() == tag)
    }

    pub const fn line_ending(self) -> &'static [u8] {
        match self {
            Self::V018 => b"\n",
            Self::V10 => b"\r\n",
        }
    }

    /// Version line including its line ending; records start with this.
    pub const fn start_marker(self) -> &'static [u8] {
        match self {
            Self::V018 => b"WARC/0.18\n",
            Self::V10 => b"WARC/1.0\r\n",
        }
    }

    /// Blank line closing the header block.
    pub const fn header_terminator(self) -> &'static [u8] {
        match self {
            Self::V018 => b"\n\n",
            Self::V10 => b"\r\n\r\n",
        }
    }

    /// Trailer that must follow the declared body.
    pub const fn record_terminator(self) -> &'static [u8] {
        match self {
            Self::V018 => b"\n\n",
            Self::V10 => b"\r\n\r\n",
        }
    }

    /// Mandatory named fields of the version's header vocabulary.
    pub const fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::V018 => &["WARC-Type", "WARC-Date", "WARC-Record-ID", "Content-Length"],
            Self::V10 => &["WARC-Record-ID", "Content-Length", "WARC-Date", "WARC-Type"],
        }
    }

    /// `WARC-Date` in the version's format. 0.18 writes numeric offsets
    /// without a colon (`2009-03-65T08:43:19-0800`), 1.0 writes RFC 3339.
    pub fn parse_date(self, s: &str) -> Option<OffsetDateTime> {
        match self {
            Self::V018 => {
                let fmt = format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory][offset_minute]"
                );
                OffsetDateTime::parse(s, &fmt).ok()
            }
            Self::V10 => OffsetDateTime::parse(s, &Rfc3339).ok(),
        }
    }
}

impl std::fmt::Display for WarcVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub name: &'static str,
    pub version: WarcVersion,
    /// Header holding the canonical record identifier.
    pub id_field: &'static str,
    /// `WARC-Type` values that produce store entries.
    pub mapped_types: &'static [&'static str],
}

pub const CLUEWEB09: FormatDescriptor = FormatDescriptor {
    name: "clueweb09",
    version: WarcVersion::V018,
    id_field: "WARC-TREC-ID",
    mapped_types: &["response"],
};

pub const CLUEWEB12: FormatDescriptor = FormatDescriptor {
    name: "clueweb12",
    version: WarcVersion::V10,
    id_field: "WARC-TREC-ID",
    mapped_types: &["response"],
};

/// Reader and mapper bound to one protocol version.
#[derive(Debug, Clone, Copy)]
pub struct Strategy {
    descriptor: FormatDescriptor,
}

impl Strategy {
    pub fn descriptor(&self) -> &FormatDescriptor { &self.descriptor }

    /// Record splitter over `data[range]`; records may run past `range.end`.
    pub fn reader<'a>(&self, data: &'a [u8], range: Range<usize>) -> RecordSplitter<'a> {
        RecordSplitter::new(self.descriptor, data, range)
    }

    pub fn mapper(&self, prefix: impl Into<String>, layout: KeyLayout) -> KeyMapper {
        KeyMapper::new(self.descriptor, prefix, layout)
    }
}

/// Fixed table of supported corpus formats.
#[derive(Debug, Clone)]
pub struct FormatRegistry {
    formats: BTreeMap<&'static str, FormatDescriptor>,
}

impl Default for FormatRegistry {
    fn default() -> Self { Self::builtin() }
}

impl FormatRegistry {
    pub fn builtin() -> Self {
        let formats = [CLUEWEB09, CLUEWEB12]
            .into_iter()
            .map(|d| (d.name, d))
            .collect();
        Self { formats }
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.formats.keys().copied().collect()
    }

    pub fn get(&self, name: &str) -> Option<&FormatDescriptor> {
        self.formats.get(name)
    }

    pub fn resolve(&self, name: &str) -> Result<Strategy> {
        match self.formats.get(name) {
            Some(d) => Ok(Strategy { descriptor: *d }),
            None => Err(WarcMapError::UnsupportedFormat {
                name: name.to_string(),
                valid: self.names().into_iter().map(String::from).collect(),
            }),
        }
    }
}
