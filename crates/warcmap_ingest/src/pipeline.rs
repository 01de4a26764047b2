//! Whole job: splits → worker pool → channel barrier → external sort → store.

use crate::config::PipelineConfig;
use crate::splits::{enumerate_splits, Split};
use crate::worker::{AttemptHook, NoHook, SplitOutput, SplitStats, SplitWorker};
use crossbeam_channel as channel;
use rayon::prelude::*;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};
use warcmap_core::{
    ExternalSorter, FormatRegistry, Result, StoreManifest, StoreWriter, WarcMapError,
};

/// Counts for one finished job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub splits: u64,
    pub records: u64,
    pub mapped: u64,
    pub filtered: u64,
    pub skipped: u64,
    /// Entries written to the store.
    pub entries: u64,
    /// Attempts over all splits, retries included.
    pub attempts: u64,
}

pub struct Pipeline {
    config: PipelineConfig,
    registry: FormatRegistry,
    hook: Arc<dyn AttemptHook>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, registry: FormatRegistry) -> Self {
        Self { config, registry, hook: Arc::new(NoHook) }
    }

    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn AttemptHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn config(&self) -> &PipelineConfig { &self.config }

    pub fn job_name(&self) -> String {
        format!("mapfile-generator-{}", self.config.format)
    }

    /// Runs the job. The output directory appears only if every split
    /// succeeded and the store was fully written.
    pub fn run(&self) -> Result<JobReport> {
        let cfg = &self.config;
        cfg.validate()?;
        let strategy = self.registry.resolve(&cfg.format)?;
        if cfg.output.exists() {
            return Err(WarcMapError::OutputExists(cfg.output.clone()));
        }

        info!(job = %self.job_name(), "starting job");
        info!(
            prefix = %cfg.prefix,
            input = %cfg.input.display(),
            format = %cfg.format,
            output = %cfg.output.display(),
            "job options"
        );
        info!(
            key_layout = cfg.key_layout.as_str(),
            on_malformed = cfg.on_malformed.as_str(),
            workers = cfg.workers,
            max_attempts = cfg.max_attempts,
            index_interval = cfg.index_interval,
            "job settings"
        );

        let splits = enumerate_splits(&cfg.input, cfg.split_size)?;
        info!(splits = splits.len(), "enumerated input splits");

        let mapper = strategy.mapper(cfg.prefix.clone(), cfg.key_layout);
        let worker = SplitWorker::new(&strategy, &mapper, self.hook.as_ref(), cfg);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.workers)
            .build()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

        let mut sorter = ExternalSorter::new(scratch_parent(&cfg.output), cfg.sort_budget);
        let mut report = JobReport { splits: splits.len() as u64, ..JobReport::default() };
        let stats = map_stage(&pool, &splits, &worker, &mut sorter, &mut report)?;

        report.records = stats.records;
        report.mapped = stats.mapped;
        report.filtered = stats.filtered;
        report.skipped = stats.skipped;
        info!(mapped = stats.mapped, skipped = stats.skipped, runs = sorter.run_count(), "map stage finished");

        let mut manifest = StoreManifest::new(strategy.descriptor(), &cfg.prefix, cfg.key_layout);
        manifest.splits = report.splits;
        manifest.records = report.records;
        manifest.filtered_records = report.filtered;
        manifest.skipped_records = report.skipped;

        let mut writer = StoreWriter::create(&cfg.output, cfg.store_options())?;
        for entry in sorter.finish()? {
            let entry = entry?;
            writer.append(&entry.key, &entry.value)?;
        }
        report.entries = writer.len();
        writer.finalize(manifest)?;

        info!(job = %self.job_name(), entries = report.entries, attempts = report.attempts, "job finished");
        Ok(report)
    }
}

/// Fans splits out over the pool and feeds completed splits into the sorter.
/// Returns once every split has reported; fails unless all succeeded.
fn map_stage(
    pool: &rayon::ThreadPool,
    splits: &[Split],
    worker: &SplitWorker<'_>,
    sorter: &mut ExternalSorter,
    report: &mut JobReport,
) -> Result<SplitStats> {
    let (tx, rx) = channel::unbounded::<(usize, Result<SplitOutput>)>();
    let cancel = AtomicBool::new(false);
    let mut done = vec![false; splits.len()];
    let mut stats = SplitStats::default();
    let mut first_err: Option<WarcMapError> = None;

    std::thread::scope(|s| {
        let cancel = &cancel;
        s.spawn(move || {
            pool.install(|| {
                splits.par_iter().for_each_with(tx, |tx, split| {
                    if cancel.load(Ordering::Relaxed) {
                        return;
                    }
                    let _ = tx.send((split.id, worker.run(split)));
                })
            })
        });

        for (id, res) in rx.iter() {
            if first_err.is_some() {
                continue;
            }
            let fed = res.and_then(|out| {
                report.attempts += u64::from(out.attempts);
                stats.add(&out.stats);
                for entry in out.entries {
                    sorter.push(entry)?;
                }
                Ok(())
            });
            match fed {
                Ok(()) => {
                    debug!(split = id, "split accounted for");
                    done[id] = true;
                }
                Err(e) => {
                    error!(split = id, source = %splits[id].source, error = %e, "split failed");
                    cancel.store(true, Ordering::Relaxed);
                    first_err = Some(e);
                }
            }
        }
    });

    if let Some(e) = first_err {
        return Err(e);
    }
    let received = done.iter().filter(|d| **d).count();
    if received != splits.len() {
        return Err(WarcMapError::IncompleteInput { expected: splits.len(), received });
    }
    Ok(stats)
}

fn scratch_parent(output: &Path) -> PathBuf {
    match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ErrorPolicy;
    use std::fs;
    use tempfile::tempdir;
    use warcmap_core::{SortedStore, WarcRecord, WarcVersion};

    fn write_corpus(path: &Path, ids: &[&str]) {
        let mut buf = Vec::new();
        for id in ids {
            WarcRecord::new(
                WarcVersion::V10,
                vec![
                    ("WARC-Type".into(), "response".into()),
                    ("WARC-Date".into(), "2012-02-10T21:51:20Z".into()),
                    ("WARC-Record-ID".into(), format!("<urn:uuid:{id}>")),
                    ("WARC-TREC-ID".into(), (*id).into()),
                ],
                id.as_bytes().to_vec(),
            )
            .write_framed(&mut buf);
        }
        fs::write(path, buf).unwrap();
    }

    #[test]
    fn small_job_end_to_end() {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("in");
        fs::create_dir_all(&input).unwrap();
        write_corpus(&input.join("b.warc"), &["d-3", "d-1"]);
        write_corpus(&input.join("a.warc"), &["d-2"]);
        let out = tmp.path().join("out");

        let cfg = PipelineConfig::new("x-", &input, "clueweb12", &out).workers(2);
        let p = Pipeline::new(cfg, FormatRegistry::builtin());
        assert_eq!(p.job_name(), "mapfile-generator-clueweb12");
        let rep = p.run().unwrap();
        assert_eq!(rep.splits, 2);
        assert_eq!(rep.entries, 3);
        assert_eq!(rep.attempts, 2);

        let s = SortedStore::open(&out).unwrap();
        let keys: Vec<String> = s.iter().map(|e| e.unwrap().0.to_string()).collect();
        assert_eq!(keys, vec!["x-d-1", "x-d-2", "x-d-3"]);
        assert_eq!(s.manifest().splits, 2);
        assert_eq!(s.manifest().corpus_format, "clueweb12");
    }

    #[test]
    fn duplicate_ids_fail_the_job() {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("in");
        fs::create_dir_all(&input).unwrap();
        write_corpus(&input.join("a.warc"), &["same"]);
        write_corpus(&input.join("b.warc"), &["same"]);
        let out = tmp.path().join("out");
        let cfg = PipelineConfig::new("x-", &input, "clueweb12", &out).on_malformed(ErrorPolicy::Skip);
        let err = Pipeline::new(cfg, FormatRegistry::builtin()).run().unwrap_err();
        assert!(matches!(err, WarcMapError::DuplicateKey(_)));
        assert!(!out.exists());
    }

    #[test]
    fn existing_output_refused() {
        let tmp = tempdir().unwrap();
        let input = tmp.path().join("c.warc");
        write_corpus(&input, &["a"]);
        let out = tmp.path().join("out");
        fs::create_dir_all(&out).unwrap();
        let cfg = PipelineConfig::new("x-", &input, "clueweb12", &out);
        let err = Pipeline::new(cfg, FormatRegistry::builtin()).run().unwrap_err();
        assert!(matches!(err, WarcMapError::OutputExists(_)));
    }
}
