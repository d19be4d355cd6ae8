//! filehist core: a local file history engine.
//!
//! For any editable resource, the engine captures point-in-time
//! snapshots whenever the resource is saved, persists them to a side
//! store on disk, enforces a retention policy, follows the resource
//! across renames and moves, and reconstructs its in-memory model by
//! reconciling a metadata listing against the snapshot files actually
//! on disk — the files, not the listing, decide what exists.

pub mod config;
pub mod domain;
pub mod events;
pub mod flush;
pub mod fs;
pub mod limiter;
pub mod model;
pub mod registry;
pub mod services;
pub mod telemetry;

pub use config::{
    HistoryConfiguration, StaticConfiguration, DEFAULT_MAX_ENTRIES,
    DEFAULT_MERGE_WINDOW_SECONDS, MAX_ENTRIES_KEY, MERGE_WINDOW_KEY,
};
pub use domain::{
    Entry, EntrySource, HistoryError, Listing, ListingEntry, Result, WorkingCopy, LISTING_FILE,
    LISTING_VERSION,
};
pub use events::{HistoryEvent, HistoryEvents};
pub use flush::{FlushPolicy, FlushScheduler, FLUSH_INTERVAL};
pub use fs::{DirEntryMeta, FileService, LocalFileService};
pub use limiter::{Limiter, MAX_PARALLEL_IO};
pub use model::{history_folder_name, now_millis, HistoryModel};
pub use registry::HistoryRegistry;
pub use services::{
    LabelService, NoRemoteEnvironment, PathLabelService, RemoteEnvironment,
};
pub use telemetry::init_tracing;

/// filehist version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
