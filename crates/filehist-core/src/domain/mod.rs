//! Domain value types for the file history engine.

pub mod entry;
pub mod error;
pub mod listing;

pub use entry::{Entry, EntrySource, WorkingCopy};
pub use error::{HistoryError, Result};
pub use listing::{Listing, ListingEntry, LISTING_FILE, LISTING_VERSION};
