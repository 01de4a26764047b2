//! External sort of mapped entries.

use crate::errors::{Result, WarcMapError};
use crate::mapper::MappedEntry;
use crate::utils::{read_chunk, write_chunk};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

pub struct ExternalSorter {
    budget: usize,
    scratch_parent: PathBuf,
    scratch: Option<TempDir>,
    buf: Vec<MappedEntry>,
    buf_weight: usize,
    runs: Vec<PathBuf>,
    pushed: u64,
}

impl ExternalSorter {
    /// Spill files go to a fresh directory under `scratch_parent`, created on
    /// the first spill.
    pub fn new(scratch_parent: impl AsRef<Path>, budget: usize) -> Self {
        Self {
            budget: budget.max(1),
            scratch_parent: scratch_parent.as_ref().to_path_buf(),
            scratch: None,
            buf: Vec::new(),
            buf_weight: 0,
            runs: Vec::new(),
            pushed: 0,
        }
    }

    pub fn len(&self) -> u64 { self.pushed }
    pub fn is_empty(&self) -> bool { self.pushed == 0 }
    pub fn run_count(&self) -> usize { self.runs.len() }

    pub fn push(&mut self, entry: MappedEntry) -> Result<()> {
        self.buf_weight += entry.weight();
        self.buf.push(entry);
        self.pushed += 1;
        if self.buf_weight >= self.budget {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let dir = match &self.scratch {
            Some(d) => d.path().to_path_buf(),
            None => {
                std::fs::create_dir_all(&self.scratch_parent)?;
                let d = tempfile::Builder::new().prefix(".warcmap_sort_").tempdir_in(&self.scratch_parent)?;
                let p = d.path().to_path_buf();
                self.scratch = Some(d);
                p
            }
        };
        sort_entries(&mut self.buf);
        let path = dir.join(format!("run-{:05}", self.runs.len()));
        let mut w = BufWriter::new(File::create(&path)?);
        for e in self.buf.drain(..) {
            write_chunk(&mut w, e.key.as_bytes())?;
            write_chunk(&mut w, &e.value)?;
        }
        w.flush()?;
        debug!(run = self.runs.len(), bytes = self.buf_weight, "spilled sorted run");
        self.runs.push(path);
        self.buf_weight = 0;
        Ok(())
    }

    /// All pushed entries in ascending key order.
    pub fn finish(mut self) -> Result<SortedEntries> {
        if self.runs.is_empty() {
            sort_entries(&mut self.buf);
            return Ok(SortedEntries {
                source: Source::Memory(std::mem::take(&mut self.buf).into_iter()),
                _scratch: None,
            });
        }
        self.spill()?;
        let mut readers = Vec::with_capacity(self.runs.len());
        let mut heap = BinaryHeap::with_capacity(self.runs.len());
        for (run, path) in self.runs.iter().enumerate() {
            let mut r = BufReader::new(File::open(path)?);
            if let Some(e) = read_entry(&mut r)? {
                heap.push(Reverse(HeapItem { key: e.key, run, value: e.value }));
            }
            readers.push(r);
        }
        debug!(runs = readers.len(), entries = self.pushed, "merging sorted runs");
        Ok(SortedEntries {
            source: Source::Runs { readers, heap, failed: false },
            _scratch: self.scratch.take(),
        })
    }
}

fn sort_entries(buf: &mut [MappedEntry]) {
    buf.sort_by(|a, b| a.key.as_bytes().cmp(b.key.as_bytes()));
}

fn read_entry<R: io::Read>(r: &mut R) -> Result<Option<MappedEntry>> {
    let Some(key) = read_chunk(r)? else { return Ok(None) };
    let value = read_chunk(r)?
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "run file ends inside an entry"))?;
    let key = String::from_utf8(key)
        .map_err(|_| WarcMapError::Io(io::Error::new(io::ErrorKind::InvalidData, "run key is not UTF-8")))?;
    Ok(Some(MappedEntry { key, value }))
}

// field order is the comparison order: key, then run
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct HeapItem {
    key: String,
    run: usize,
    value: Vec<u8>,
}

enum Source {
    Memory(std::vec::IntoIter<MappedEntry>),
    Runs {
        readers: Vec<BufReader<File>>,
        heap: BinaryHeap<Reverse<HeapItem>>,
        failed: bool,
    },
}

pub struct SortedEntries {
    source: Source,
    _scratch: Option<TempDir>,
}

impl Iterator for SortedEntries {
    type Item = Result<MappedEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            Source::Memory(it) => it.next().map(Ok),
            Source::Runs { readers, heap, failed } => {
                if *failed {
                    return None;
                }
                let Reverse(top) = heap.pop()?;
                match read_entry(&mut readers[top.run]) {
                    Ok(Some(e)) => heap.push(Reverse(HeapItem { key: e.key, run: top.run, value: e.value })),
                    Ok(None) => {}
                    Err(e) => {
                        *failed = true;
                        return Some(Err(e));
                    }
                }
                Some(Ok(MappedEntry { key: top.key, value: top.value }))
            }
        }
    }
}
