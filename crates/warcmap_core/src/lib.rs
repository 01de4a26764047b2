pub mod consts;
pub mod errors;
pub mod utils;
pub mod format;
pub mod warc;
pub mod reader;
pub mod mapper;
pub mod manifest;
pub mod store;
pub mod sort;

pub use errors::{Result, WarcMapError};
pub use format::{FormatDescriptor, FormatRegistry, Strategy, WarcVersion, CLUEWEB09, CLUEWEB12};
pub use manifest::StoreManifest;
pub use mapper::{KeyLayout, KeyMapper, MappedEntry};
pub use reader::{ParseOptions, RawRecord, RecordSplitter};
pub use sort::{ExternalSorter, SortedEntries};
pub use store::{SortedStore, StoreOptions, StoreWriter, VerifyReport};
pub use warc::WarcRecord;
