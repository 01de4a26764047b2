use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use warcmap_core::{FormatRegistry, KeyLayout, SortedStore, WarcMapError};
use warcmap_ingest::{ErrorPolicy, Pipeline, PipelineConfig};

#[derive(Parser)]
#[command(name = "warcmap", version, about = "WARC corpus → sorted key-value store")]
struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(ValueEnum, Clone, Copy)]
enum CliKeyLayout {
    Global,
    PerSource,
    Uuid,
}

#[derive(ValueEnum, Clone, Copy)]
enum CliErrorPolicy {
    Abort,
    Skip,
}

#[derive(Subcommand)]
enum Cmd {
    /// Build a sorted store from a corpus
    Generate {
        /// Namespace prefix for every key
        #[arg(short, long)]
        prefix: Option<String>,
        /// Corpus file or directory
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Input format (see `warcmap formats`)
        #[arg(short, long)]
        format: Option<String>,
        /// Store directory to create; must not exist
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum)]
        key_layout: Option<CliKeyLayout>,
        /// What to do with records that fail to parse
        #[arg(long, value_enum)]
        on_malformed: Option<CliErrorPolicy>,
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        max_attempts: Option<u32>,
        #[arg(long)]
        index_interval: Option<u32>,
        /// Cut input files into byte ranges of this size
        #[arg(long, value_name = "BYTES")]
        split_size: Option<u64>,
        #[arg(long, value_name = "BYTES")]
        sort_budget: Option<usize>,
        #[arg(long, default_value_t = false)]
        validate_dates: bool,
        /// JSON job file; flags override its values
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Print the record stored under a key
    Get {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        key: String,
        /// Print the body too
        #[arg(long, default_value_t = false)]
        body: bool,
    },

    /// Manifest and index stats
    Info {
        #[arg(long)]
        store: PathBuf,
    },

    /// Check CRCs, key order and the index
    Verify {
        #[arg(long)]
        store: PathBuf,
    },

    /// List supported input formats
    Formats,
}

impl From<CliKeyLayout> for KeyLayout {
    fn from(l: CliKeyLayout) -> Self {
        match l {
            CliKeyLayout::Global => KeyLayout::Global,
            CliKeyLayout::PerSource => KeyLayout::PerSource,
            CliKeyLayout::Uuid => KeyLayout::Uuid,
        }
    }
}

impl From<CliErrorPolicy> for ErrorPolicy {
    fn from(p: CliErrorPolicy) -> Self {
        match p {
            CliErrorPolicy::Abort => ErrorPolicy::Abort,
            CliErrorPolicy::Skip => ErrorPolicy::Skip,
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(path: &Path) -> Result<SortedStore> {
    SortedStore::open(path).with_context(|| format!("opening store {}", path.display()))
}

/// Job option errors get the subcommand usage, like clap's own parse errors.
fn usage_error(sub: &str, e: &WarcMapError) -> ! {
    let mut cmd = Cli::command();
    if let Some(c) = cmd.find_subcommand_mut(sub) {
        eprintln!("{}", c.render_usage());
    }
    eprintln!("Error: {e}");
    std::process::exit(1)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.cmd {
        Cmd::Generate {
            prefix,
            input,
            format,
            output,
            key_layout,
            on_malformed,
            workers,
            max_attempts,
            index_interval,
            split_size,
            sort_budget,
            validate_dates,
            config,
        } => {
            let mut cfg = match &config {
                Some(p) => PipelineConfig::from_json_file(p)
                    .with_context(|| format!("loading job file {}", p.display()))?,
                None => PipelineConfig::default(),
            };
            if let Some(v) = prefix { cfg.prefix = v; }
            if let Some(v) = input { cfg.input = v; }
            if let Some(v) = format { cfg.format = v; }
            if let Some(v) = output { cfg.output = v; }
            if let Some(v) = key_layout { cfg.key_layout = v.into(); }
            if let Some(v) = on_malformed { cfg.on_malformed = v.into(); }
            if let Some(v) = workers { cfg.workers = v; }
            if let Some(v) = max_attempts { cfg.max_attempts = v; }
            if let Some(v) = index_interval { cfg.index_interval = v; }
            if split_size.is_some() { cfg.split_size = split_size; }
            if let Some(v) = sort_budget { cfg.sort_budget = v; }
            if validate_dates { cfg.validate_dates = true; }

            let output = cfg.output.clone();
            let report = match Pipeline::new(cfg, FormatRegistry::builtin()).run() {
                Ok(r) => r,
                Err(e @ (WarcMapError::Argument(_) | WarcMapError::UnsupportedFormat { .. })) => {
                    usage_error("generate", &e)
                }
                Err(e) => return Err(e.into()),
            };
            println!("generated: {}", output.display());
            println!(
                "  splits={} records={} mapped={} filtered={} skipped={} entries={} attempts={}",
                report.splits,
                report.records,
                report.mapped,
                report.filtered,
                report.skipped,
                report.entries,
                report.attempts
            );
        }
        Cmd::Get { store, key, body } => {
            let s = open_store(&store)?;
            let Some(rec) = s.get_record(&key)? else {
                bail!("key not found: {key}");
            };
            let mut out = std::io::stdout().lock();
            writeln!(out, "{}", rec.version)?;
            for (k, v) in &rec.headers {
                writeln!(out, "{k}: {v}")?;
            }
            if body {
                writeln!(out)?;
                out.write_all(&rec.body)?;
            }
            out.flush()?;
        }
        Cmd::Info { store } => {
            let s = open_store(&store)?;
            println!("{}", serde_json::to_string_pretty(s.manifest())?);
            println!("entries: {}", s.len());
            println!("index: entries={} interval={}", s.index_len(), s.index_interval());
            if let (Some((first, _)), Some(last)) = (s.index_entries().first(), s.iter().last()) {
                let (last, _) = last?;
                println!("keys: {first:?} .. {last:?}");
            }
        }
        Cmd::Verify { store } => {
            let s = open_store(&store)?;
            let rep = s.verify();
            println!("verify: entries={} (header says {})", rep.entries, s.len());
            println!(
                "        bad_crc={} out_of_order={} bad_index={} truncated={}",
                rep.bad_crc, rep.out_of_order, rep.bad_index, rep.truncated
            );
            if !rep.is_ok() || rep.entries != s.len() {
                bail!("store {} failed verification", store.display());
            }
            println!("verify: ok");
        }
        Cmd::Formats => {
            let reg = FormatRegistry::builtin();
            for name in reg.names() {
                if let Some(d) = reg.get(name) {
                    println!("{name}\t{}\tid={}", d.version, d.id_field);
                }
            }
        }
    }
    Ok(())
}
