use crate::consts::{MANIFEST_FILE, VERSION};
use crate::errors::{Result, WarcMapError};
use crate::format::{FormatDescriptor, WarcVersion};
use crate::mapper::KeyLayout;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Describes a published store. Holds no wall-clock values, so re-running
/// a job over the same input reproduces it byte for byte.
///
/// `entries`, `index_entries` and `index_interval` are filled in by the
/// store writer; the rest comes from the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreManifest {
    pub store_version: u16,
    pub corpus_format: String,
    pub warc_version: WarcVersion,
    pub prefix: String,
    pub key_layout: KeyLayout,

    #[serde(default)]
    pub entries: u64,
    #[serde(default)]
    pub index_interval: u32,
    #[serde(default)]
    pub index_entries: u64,

    /// Job statistics.
    #[serde(default)]
    pub splits: u64,
    #[serde(default)]
    pub records: u64,
    #[serde(default)]
    pub filtered_records: u64,
    #[serde(default)]
    pub skipped_records: u64,
}

impl StoreManifest {
    pub fn new(desc: &FormatDescriptor, prefix: &str, key_layout: KeyLayout) -> Self {
        Self {
            store_version: VERSION,
            corpus_format: desc.name.to_string(),
            warc_version: desc.version,
            prefix: prefix.to_string(),
            key_layout,
            entries: 0,
            index_interval: 0,
            index_entries: 0,
            splits: 0,
            records: 0,
            filtered_records: 0,
            skipped_records: 0,
        }
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let s = fs::read_to_string(dir.join(MANIFEST_FILE))?;
        let m: StoreManifest = serde_json::from_str(&s)?;
        if m.store_version != VERSION {
            return Err(WarcMapError::BadHeader);
        }
        Ok(m)
    }

    pub fn save_atomic(&self, dir: &Path) -> Result<()> {
        let p = dir.join(MANIFEST_FILE);
        let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        let mut f = fs::File::create(&tmp)?;
        f.write_all(serde_json::to_string_pretty(self)?.as_bytes())?;
        f.write_all(b"\n")?;
        f.sync_all()?;
        drop(f);
        fs::rename(&tmp, &p)?;
        Ok(())
    }
}
