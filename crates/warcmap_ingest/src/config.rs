//! Job configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use warcmap_core::consts::{DEFAULT_INDEX_INTERVAL, DEFAULT_SORT_BUDGET};
use warcmap_core::{KeyLayout, ParseOptions, Result, StoreOptions, WarcMapError};

/// What happens to a record that fails to parse or has no identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// The first bad record fails the job; nothing is published.
    #[default]
    Abort,
    /// Bad records are logged, counted and left out.
    Skip,
}

impl ErrorPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Skip => "skip",
        }
    }
}

impl FromStr for ErrorPolicy {
    type Err = WarcMapError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => Err(WarcMapError::Argument(format!("unknown error policy '{other}'"))),
        }
    }
}

/// Everything one generation job needs. Loadable from JSON; every field has a
/// default so a file may set only some of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Namespace prefix for every key.
    pub prefix: String,
    /// Corpus file or directory.
    pub input: PathBuf,
    /// Registry name of the corpus format.
    pub format: String,
    /// Store directory to create.
    pub output: PathBuf,

    pub key_layout: KeyLayout,
    pub on_malformed: ErrorPolicy,

    /// Worker threads in the map stage.
    pub workers: usize,
    /// Attempts per split for transient (I/O) failures.
    pub max_attempts: u32,
    pub index_interval: u32,
    /// Cut files into byte ranges of this size; whole files when unset.
    pub split_size: Option<u64>,
    /// Bytes of mapped entries held in memory before spilling a sorted run.
    pub sort_budget: usize,
    pub validate_dates: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            input: PathBuf::new(),
            format: String::new(),
            output: PathBuf::new(),
            key_layout: KeyLayout::default(),
            on_malformed: ErrorPolicy::default(),
            workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            max_attempts: 3,
            index_interval: DEFAULT_INDEX_INTERVAL,
            split_size: None,
            sort_budget: DEFAULT_SORT_BUDGET,
            validate_dates: false,
        }
    }
}

impl PipelineConfig {
    /// The four options every job needs; the rest keep their defaults.
    #[must_use]
    pub fn new(
        prefix: impl Into<String>,
        input: impl Into<PathBuf>,
        format: impl Into<String>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            input: input.into(),
            format: format.into(),
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    #[must_use]
    pub fn key_layout(mut self, layout: KeyLayout) -> Self {
        self.key_layout = layout;
        self
    }

    #[must_use]
    pub fn on_malformed(mut self, policy: ErrorPolicy) -> Self {
        self.on_malformed = policy;
        self
    }

    #[must_use]
    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    #[must_use]
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    #[must_use]
    pub fn index_interval(mut self, n: u32) -> Self {
        self.index_interval = n;
        self
    }

    #[must_use]
    pub fn split_size(mut self, bytes: Option<u64>) -> Self {
        self.split_size = bytes;
        self
    }

    #[must_use]
    pub fn sort_budget(mut self, bytes: usize) -> Self {
        self.sort_budget = bytes;
        self
    }

    #[must_use]
    pub fn validate_dates(mut self, on: bool) -> Self {
        self.validate_dates = on;
        self
    }

    /// Rejects missing options and zero-valued settings.
    pub fn validate(&self) -> Result<()> {
        let arg = |msg: &str| -> Result<()> { Err(WarcMapError::Argument(msg.to_string())) };
        if self.prefix.is_empty() {
            return arg("prefix must not be empty");
        }
        if self.input.as_os_str().is_empty() {
            return arg("input path is required");
        }
        if self.format.is_empty() {
            return arg("input format is required");
        }
        if self.output.as_os_str().is_empty() {
            return arg("output path is required");
        }
        if self.workers == 0 {
            return arg("workers must be at least 1");
        }
        if self.max_attempts == 0 {
            return arg("max attempts must be at least 1");
        }
        if self.index_interval == 0 {
            return arg("index interval must be at least 1");
        }
        if self.split_size == Some(0) {
            return arg("split size must be at least 1 byte");
        }
        if self.sort_budget == 0 {
            return arg("sort budget must be at least 1 byte");
        }
        Ok(())
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions { validate_dates: self.validate_dates }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions { index_interval: self.index_interval }
    }
}
