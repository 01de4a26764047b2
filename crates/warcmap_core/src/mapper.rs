//! Record → (key, value) mapping.

use crate::consts::KEY_SEPARATOR;
use crate::errors::{Result, WarcMapError};
use crate::format::FormatDescriptor;
use crate::warc::WarcRecord;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// How the namespace prefix and the record identifier form a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyLayout {
    /// `prefix + id`; one sort domain for the whole corpus.
    #[default]
    Global,
    /// `prefix + source + U+001F + id`; keys grouped by input file.
    PerSource,
    /// Name-based UUID v5 (URL namespace) of `prefix + id`.
    Uuid,
}

impl KeyLayout {
    pub const ALL: [KeyLayout; 3] = [KeyLayout::Global, KeyLayout::PerSource, KeyLayout::Uuid];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::PerSource => "per-source",
            Self::Uuid => "uuid",
        }
    }
}

impl FromStr for KeyLayout {
    type Err = WarcMapError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| WarcMapError::Argument(format!("unknown key layout '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedEntry {
    pub key: String,
    /// Canonical serialization of the record.
    pub value: Vec<u8>,
}

impl MappedEntry {
    /// Bytes this entry occupies in memory, roughly.
    pub fn weight(&self) -> usize {
        self.key.len() + self.value.len() + std::mem::size_of::<Self>()
    }
}

#[derive(Debug, Clone)]
pub struct KeyMapper {
    desc: FormatDescriptor,
    prefix: String,
    layout: KeyLayout,
}

impl KeyMapper {
    pub fn new(desc: FormatDescriptor, prefix: impl Into<String>, layout: KeyLayout) -> Self {
        Self {
            desc,
            prefix: prefix.into(),
            layout,
        }
    }

    pub fn prefix(&self) -> &str { &self.prefix }
    pub fn layout(&self) -> KeyLayout { self.layout }

    /// Whether the record's type is one that gets mapped (e.g. `response`).
    pub fn accepts(&self, record: &WarcRecord) -> bool {
        record
            .record_type()
            .map(|t| self.desc.mapped_types.iter().any(|m| m.eq_ignore_ascii_case(t)))
            .unwrap_or(false)
    }

    pub fn key_for(&self, id: &str, source: &str) -> String {
        match self.layout {
            KeyLayout::Global => format!("{}{}", self.prefix, id),
            KeyLayout::PerSource => format!("{}{}{}{}", self.prefix, source, KEY_SEPARATOR, id),
            KeyLayout::Uuid => {
                let name = format!("{}{}", self.prefix, id);
                Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
            }
        }
    }

    /// `offset` is only used for error reporting.
    pub fn map(&self, record: &WarcRecord, source: &str, offset: u64) -> Result<MappedEntry> {
        let id = record
            .header(self.desc.id_field)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| WarcMapError::MissingIdentifier {
                offset,
                field: self.desc.id_field.to_string(),
            })?;
        if id.chars().any(|c| c == KEY_SEPARATOR || c.is_control()) {
            return Err(WarcMapError::malformed(
                offset,
                format!("identifier {id:?} contains a reserved character"),
            ));
        }
        Ok(MappedEntry {
            key: self.key_for(id, source),
            value: record.to_canonical_bytes(),
        })
    }
}
