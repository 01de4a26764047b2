// crates/warcmap_core/src/consts.rs

use core::mem::size_of;

pub const MAGIC_STORE: &[u8; 4] = b"WMAP";
pub const VERSION: u16 = 1;

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StoreFileKind {
    Data = 1,  // sorted entries
    Index = 2, // sampled key -> data offset
}

impl StoreFileKind {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(Self::Data),
            2 => Some(Self::Index),
            _ => None,
        }
    }
}

pub const HDR_SIZE: usize = 24;

pub const DATA_FILE: &str = "data";
pub const INDEX_FILE: &str = "index";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Every n-th data entry gets an index entry.
pub const DEFAULT_INDEX_INTERVAL: u32 = 128;

/// Reserved between source name and identifier in per-source keys.
pub const KEY_SEPARATOR: char = '\u{1f}';

pub const DEFAULT_SORT_BUDGET: usize = 256 * 1024 * 1024;

// key_len + value_len + crc
pub const ENTRY_OVERHEAD: usize = 4 + 4 + 4;

const _: () = { assert!(size_of::<[u8; 4]>() + 2 + 2 + 8 + 4 + 4 == HDR_SIZE); };
