pub mod config;
pub mod splits;
pub mod worker;
pub mod pipeline;

pub use config::{ErrorPolicy, PipelineConfig};
pub use pipeline::{JobReport, Pipeline};
pub use splits::{enumerate_splits, Split};
pub use worker::{AttemptHook, NoHook, SplitOutput, SplitStats, SplitWorker};
