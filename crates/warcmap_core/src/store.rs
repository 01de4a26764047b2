//! Sorted store: data file + sparse index, published as one directory.

use crate::consts::{StoreFileKind, DATA_FILE, ENTRY_OVERHEAD, HDR_SIZE, INDEX_FILE, MAGIC_STORE, VERSION};
use crate::errors::{Result, WarcMapError};
use crate::manifest::StoreManifest;
use crate::utils::{crc32_pair, fsync_dir, le_u32_at, le_u64_at, read_chunk, read_u64, write_chunk, write_u16, write_u32, write_u64};
use crate::warc::WarcRecord;
use memmap2::Mmap;
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub index_interval: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { index_interval: crate::consts::DEFAULT_INDEX_INTERVAL }
    }
}

// magic | version u16 | kind u16 | count u64 | interval u32 | reserved u32, all LE
fn write_header<W: Write>(w: &mut W, kind: StoreFileKind, count: u64, interval: u32) -> std::io::Result<()> {
    w.write_all(MAGIC_STORE)?;
    write_u16(w, VERSION)?;
    write_u16(w, kind as u16)?;
    write_u64(w, count)?;
    write_u32(w, interval)?;
    write_u32(w, 0)
}

fn parse_header(buf: &[u8], want: StoreFileKind) -> Result<(u64, u32)> {
    if buf.len() < HDR_SIZE || &buf[0..4] != MAGIC_STORE {
        return Err(WarcMapError::BadHeader);
    }
    let ver = u16::from_le_bytes([buf[4], buf[5]]);
    let kind = StoreFileKind::from_u16(u16::from_le_bytes([buf[6], buf[7]]));
    if ver != VERSION || kind != Some(want) {
        return Err(WarcMapError::BadHeader);
    }
    let count = le_u64_at(buf, 8).ok_or(WarcMapError::BadHeader)?;
    let interval = le_u32_at(buf, 16).ok_or(WarcMapError::BadHeader)?;
    Ok((count, interval))
}

/// Writer: ascending keys only; publishes the directory atomically.
pub struct StoreWriter {
    path_final: PathBuf,
    data: BufWriter<File>,
    index: BufWriter<File>,
    // dropped after the files so an abandoned build is removed whole
    tmp: TempDir,
    interval: u32,
    count: u64,
    index_count: u64,
    offset: u64,
    last_key: Option<String>,
}

impl StoreWriter {
    /// New store at `path` (not published until `finalize`). Fails if
    /// `path` exists.
    pub fn create(path: impl AsRef<Path>, opts: StoreOptions) -> Result<Self> {
        let path_final = path.as_ref().to_path_buf();
        if opts.index_interval == 0 {
            return Err(WarcMapError::Argument("index interval must be at least 1".into()));
        }
        if path_final.exists() {
            return Err(WarcMapError::OutputExists(path_final));
        }
        let dir = match path_final.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let tmp = tempfile::Builder::new().prefix(".warcmap_store_").tempdir_in(&dir)?;

        let mut data = BufWriter::new(File::create(tmp.path().join(DATA_FILE))?);
        data.write_all(&[0u8; HDR_SIZE])?; // header written in finalize
        let mut index = BufWriter::new(File::create(tmp.path().join(INDEX_FILE))?);
        index.write_all(&[0u8; HDR_SIZE])?;

        Ok(Self {
            path_final,
            tmp,
            data,
            index,
            interval: opts.index_interval,
            count: 0,
            index_count: 0,
            offset: HDR_SIZE as u64,
            last_key: None,
        })
    }

    pub fn len(&self) -> u64 { self.count }
    pub fn is_empty(&self) -> bool { self.count == 0 }

    /// Appends one entry; keys must be strictly ascending.
    pub fn append(&mut self, key: &str, value: &[u8]) -> Result<()> {
        if let Some(prev) = &self.last_key {
            match prev.as_bytes().cmp(key.as_bytes()) {
                Ordering::Less => {}
                Ordering::Equal => return Err(WarcMapError::DuplicateKey(key.to_string())),
                Ordering::Greater => {
                    return Err(WarcMapError::KeyOrder { prev: prev.clone(), next: key.to_string() })
                }
            }
        }
        if self.count % u64::from(self.interval) == 0 {
            write_chunk(&mut self.index, key.as_bytes())?;
            write_u64(&mut self.index, self.offset)?;
            self.index_count += 1;
        }
        write_chunk(&mut self.data, key.as_bytes())?;
        write_chunk(&mut self.data, value)?;
        write_u32(&mut self.data, crc32_pair(key.as_bytes(), value))?;

        self.offset += (ENTRY_OVERHEAD + key.len() + value.len()) as u64;
        self.count += 1;
        match &mut self.last_key {
            Some(k) => {
                k.clear();
                k.push_str(key);
            }
            None => self.last_key = Some(key.to_string()),
        }
        Ok(())
    }

    /// Writes headers and the manifest, syncs, then renames the directory
    /// onto the output path.
    pub fn finalize(self, mut manifest: StoreManifest) -> Result<PathBuf> {
        let Self { path_final, tmp, data, index, interval, count, index_count, .. } = self;

        for (w, kind, n) in [
            (data, StoreFileKind::Data, count),
            (index, StoreFileKind::Index, index_count),
        ] {
            let mut f = w.into_inner().map_err(|e| e.into_error())?;
            f.seek(SeekFrom::Start(0))?;
            write_header(&mut f, kind, n, interval)?;
            f.sync_all()?;
        }

        manifest.store_version = VERSION;
        manifest.entries = count;
        manifest.index_interval = interval;
        manifest.index_entries = index_count;
        manifest.save_atomic(tmp.path())?;

        if path_final.exists() {
            return Err(WarcMapError::OutputExists(path_final));
        }
        fs::rename(tmp.path(), &path_final)?;
        let _ = fsync_dir(&path_final);
        info!(path = %path_final.display(), entries = count, index_entries = index_count, "published sorted store");
        Ok(path_final)
    }
}

/// Result of [`SortedStore::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub entries: u64,
    pub bad_crc: u64,
    pub out_of_order: u64,
    pub bad_index: u64,
    /// Framing broke before the header's entry count was reached.
    pub truncated: bool,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.bad_crc == 0 && self.out_of_order == 0 && self.bad_index == 0 && !self.truncated
    }
}

struct Frame<'a> {
    key: &'a [u8],
    value: &'a [u8],
    crc: u32,
    next: usize,
}

/// Read side of a published store.
pub struct SortedStore {
    dir: PathBuf,
    _f: File,
    mmap: Mmap,
    count: u64,
    interval: u32,
    index: Vec<(String, u64)>,
    manifest: StoreManifest,
}

impl SortedStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let f = File::open(dir.join(DATA_FILE))?;
        let mmap = unsafe { Mmap::map(&f)? };
        let (count, interval) = parse_header(&mmap, StoreFileKind::Data)?;
        if interval == 0 {
            return Err(WarcMapError::BadHeader);
        }

        let raw = fs::read(dir.join(INDEX_FILE))?;
        let (index_count, index_interval) = parse_header(&raw, StoreFileKind::Index)?;
        if index_interval != interval {
            return Err(WarcMapError::BadHeader);
        }
        let mut cur = Cursor::new(&raw[HDR_SIZE..]);
        // smallest index entry: empty key plus offset
        let fit = (raw.len() - HDR_SIZE) / 12;
        let mut index = Vec::with_capacity((index_count as usize).min(fit));
        for _ in 0..index_count {
            let at = HDR_SIZE as u64 + cur.position();
            let key = read_chunk(&mut cur)?.ok_or(WarcMapError::Corrupt(at))?;
            let key = String::from_utf8(key).map_err(|_| WarcMapError::Corrupt(at))?;
            let off = read_u64(&mut cur)?;
            index.push((key, off));
        }

        let manifest = StoreManifest::load(&dir)?;
        Ok(Self { dir, _f: f, mmap, count, interval, index, manifest })
    }

    pub fn path(&self) -> &Path { &self.dir }
    pub fn len(&self) -> u64 { self.count }
    pub fn is_empty(&self) -> bool { self.count == 0 }
    pub fn index_len(&self) -> usize { self.index.len() }
    pub fn index_interval(&self) -> u32 { self.interval }
    pub fn manifest(&self) -> &StoreManifest { &self.manifest }

    /// Sampled (key, data offset) pairs.
    pub fn index_entries(&self) -> &[(String, u64)] { &self.index }

    fn frame_at(&self, pos: usize) -> Option<Frame<'_>> {
        let klen = le_u32_at(&self.mmap, pos)? as usize;
        let kstart = pos + 4;
        let key = self.mmap.get(kstart..kstart.checked_add(klen)?)?;
        let vpos = kstart + klen;
        let vlen = le_u32_at(&self.mmap, vpos)? as usize;
        let vstart = vpos + 4;
        let value = self.mmap.get(vstart..vstart.checked_add(vlen)?)?;
        let cpos = vstart + vlen;
        let crc = le_u32_at(&self.mmap, cpos)?;
        Some(Frame { key, value, crc, next: cpos + 4 })
    }

    fn entry_at(&self, pos: usize) -> Result<(&str, &[u8], usize)> {
        let fr = self.frame_at(pos).ok_or(WarcMapError::Corrupt(pos as u64))?;
        if crc32_pair(fr.key, fr.value) != fr.crc {
            return Err(WarcMapError::Corrupt(pos as u64));
        }
        let key = std::str::from_utf8(fr.key).map_err(|_| WarcMapError::Corrupt(pos as u64))?;
        Ok((key, fr.value, fr.next))
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Result<Option<&[u8]>> {
        let i = self.index.partition_point(|(k, _)| k.as_bytes() <= key.as_bytes());
        if i == 0 {
            return Ok(None);
        }
        let mut pos = self.index[i - 1].1 as usize;
        let stop = self.index.get(i).map(|(_, o)| *o as usize).unwrap_or(self.mmap.len());
        while pos < stop {
            let (k, v, next) = self.entry_at(pos)?;
            match k.as_bytes().cmp(key.as_bytes()) {
                Ordering::Equal => return Ok(Some(v)),
                Ordering::Greater => return Ok(None),
                Ordering::Less => pos = next,
            }
        }
        Ok(None)
    }

    pub fn get_record(&self, key: &str) -> Result<Option<WarcRecord>> {
        self.get(key)?.map(WarcRecord::from_canonical_bytes).transpose()
    }

    /// All entries in key order.
    pub fn iter(&self) -> StoreIter<'_> {
        StoreIter { store: self, pos: HDR_SIZE, remaining: self.count }
    }

    /// Checks CRCs, key order and that each index entry points at its key.
    pub fn verify(&self) -> VerifyReport {
        let mut rep = VerifyReport::default();
        let mut pos = HDR_SIZE;
        let mut prev: Option<&[u8]> = None;
        while rep.entries < self.count {
            let Some(fr) = self.frame_at(pos) else {
                rep.truncated = true;
                break;
            };
            if crc32_pair(fr.key, fr.value) != fr.crc {
                rep.bad_crc += 1;
            }
            if let Some(p) = prev {
                if p >= fr.key {
                    rep.out_of_order += 1;
                }
            }
            prev = Some(fr.key);
            rep.entries += 1;
            pos = fr.next;
        }
        for (key, off) in &self.index {
            match self.frame_at(*off as usize) {
                Some(fr) if fr.key == key.as_bytes() => {}
                _ => rep.bad_index += 1,
            }
        }
        rep
    }
}

pub struct StoreIter<'a> {
    store: &'a SortedStore,
    pos: usize,
    remaining: u64,
}

impl<'a> Iterator for StoreIter<'a> {
    type Item = Result<(&'a str, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match self.store.entry_at(self.pos) {
            Ok((k, v, next)) => {
                self.pos = next;
                self.remaining -= 1;
                Some(Ok((k, v)))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}
