//! Input splits: whole corpus files or byte ranges of them.

use std::fs;
use std::path::{Path, PathBuf};
use warcmap_core::{Result, WarcMapError};

/// One unit of map work. `start..end` is the byte range whose record start
/// markers this split owns; records may run past `end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub id: usize,
    pub path: PathBuf,
    /// Path relative to the input root, `/`-separated.
    pub source: String,
    pub start: u64,
    pub end: u64,
}

impl Split {
    pub fn len(&self) -> u64 { self.end - self.start }
    pub fn is_empty(&self) -> bool { self.end == self.start }
}

/// Regular, non-hidden files under `input` sorted by relative path, each cut
/// into `split_size` byte ranges when given. Ids follow that order.
pub fn enumerate_splits(input: &Path, split_size: Option<u64>) -> Result<Vec<Split>> {
    let meta = fs::metadata(input).map_err(|e| {
        WarcMapError::Argument(format!("cannot read input path {}: {e}", input.display()))
    })?;

    let mut files: Vec<(String, PathBuf, u64)> = Vec::new();
    if meta.is_file() {
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        files.push((name, input.to_path_buf(), meta.len()));
    } else {
        collect_files(input, "", &mut files)?;
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut splits = Vec::new();
    for (source, path, len) in files {
        let step = split_size.unwrap_or(len).max(1);
        let mut start = 0u64;
        loop {
            let end = start.saturating_add(step).min(len);
            splits.push(Split { id: splits.len(), path: path.clone(), source: source.clone(), start, end });
            if end >= len {
                break;
            }
            start = end;
        }
    }
    Ok(splits)
}

fn collect_files(dir: &Path, rel: &str, out: &mut Vec<(String, PathBuf, u64)>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let rel_name = if rel.is_empty() { name } else { format!("{rel}/{name}") };
        let ft = entry.file_type()?;
        if ft.is_dir() {
            collect_files(&entry.path(), &rel_name, out)?;
        } else if ft.is_file() {
            out.push((rel_name, entry.path(), entry.metadata()?.len()));
        }
    }
    Ok(())
}
