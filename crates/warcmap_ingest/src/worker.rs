//! Map stage: one split in, its mapped entries out.

use crate::config::{ErrorPolicy, PipelineConfig};
use crate::splits::Split;
use memmap2::Mmap;
use serde::Serialize;
use std::fs::File;
use tracing::{debug, warn};
use warcmap_core::{KeyMapper, MappedEntry, ParseOptions, Result, Strategy, WarcMapError};

/// Called before every attempt at a split. An `Err` fails that attempt as if
/// the split's own work had failed.
pub trait AttemptHook: Send + Sync {
    fn before_attempt(&self, split: &Split, attempt: u32) -> Result<()>;
}

pub struct NoHook;

impl AttemptHook for NoHook {
    fn before_attempt(&self, _split: &Split, _attempt: u32) -> Result<()> { Ok(()) }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SplitStats {
    /// Record boundaries found, good or bad.
    pub records: u64,
    pub mapped: u64,
    /// Parsed records of a type that is not mapped.
    pub filtered: u64,
    pub skipped: u64,
}

impl SplitStats {
    pub fn add(&mut self, other: &SplitStats) {
        self.records += other.records;
        self.mapped += other.mapped;
        self.filtered += other.filtered;
        self.skipped += other.skipped;
    }
}

#[derive(Debug)]
pub struct SplitOutput {
    pub split: usize,
    pub entries: Vec<MappedEntry>,
    pub stats: SplitStats,
    pub attempts: u32,
}

pub struct SplitWorker<'a> {
    strategy: &'a Strategy,
    mapper: &'a KeyMapper,
    hook: &'a dyn AttemptHook,
    policy: ErrorPolicy,
    parse: ParseOptions,
    max_attempts: u32,
}

impl<'a> SplitWorker<'a> {
    pub fn new(
        strategy: &'a Strategy,
        mapper: &'a KeyMapper,
        hook: &'a dyn AttemptHook,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            strategy,
            mapper,
            hook,
            policy: config.on_malformed,
            parse: config.parse_options(),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Processes `split`, retrying transient failures. Every attempt starts
    /// from scratch; only a complete attempt's entries are returned.
    pub fn run(&self, split: &Split) -> Result<SplitOutput> {
        let mut attempt = 1;
        loop {
            match self.attempt(split, attempt) {
                Ok((entries, stats)) => {
                    debug!(split = split.id, source = %split.source, mapped = stats.mapped, attempt, "split done");
                    return Ok(SplitOutput { split: split.id, entries, stats, attempts: attempt });
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(split = split.id, source = %split.source, attempt, error = %e, "retrying split");
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(WarcMapError::WorkerFailure {
                        split: split.id,
                        attempts: attempt,
                        reason: e.to_string(),
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn attempt(&self, split: &Split, attempt: u32) -> Result<(Vec<MappedEntry>, SplitStats)> {
        self.hook.before_attempt(split, attempt)?;
        let mut entries = Vec::new();
        let mut stats = SplitStats::default();

        let f = File::open(&split.path)?;
        let len = f.metadata()?.len();
        if len == 0 || split.start >= len {
            return Ok((entries, stats));
        }
        let mmap = unsafe { Mmap::map(&f)? };
        let desc = *self.strategy.descriptor();

        for raw in self.strategy.reader(&mmap, split.start as usize..split.end as usize) {
            stats.records += 1;
            let raw = match raw {
                Ok(r) => r,
                Err(e) => {
                    self.record_error(split, e, &mut stats)?;
                    continue;
                }
            };
            let record = match raw.parse(&desc, self.parse) {
                Ok(r) => r,
                Err(e) => {
                    self.record_error(split, e, &mut stats)?;
                    continue;
                }
            };
            if !self.mapper.accepts(&record) {
                stats.filtered += 1;
                continue;
            }
            match self.mapper.map(&record, &split.source, raw.offset) {
                Ok(entry) => {
                    entries.push(entry);
                    stats.mapped += 1;
                }
                Err(e) => self.record_error(split, e, &mut stats)?,
            }
        }
        Ok((entries, stats))
    }

    fn record_error(&self, split: &Split, e: WarcMapError, stats: &mut SplitStats) -> Result<()> {
        match self.policy {
            ErrorPolicy::Skip if e.is_record_error() => {
                warn!(source = %split.source, error = %e, "skipping record");
                stats.skipped += 1;
                Ok(())
            }
            _ => Err(e),
        }
    }
}
