//! Resource-scoped configuration lookups for retention and merging.
//!
//! The engine never defines these values itself; hosts supply them
//! through [`HistoryConfiguration`] under the documented keys.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use url::Url;

/// Configuration key for the per-resource retention cap.
pub const MAX_ENTRIES_KEY: &str = "workingcopy.history.maxEntries";

/// Configuration key for the save merge window, in seconds.
pub const MERGE_WINDOW_KEY: &str = "workingcopy.history.mergeWindow";

/// Default retention cap when the host provides none.
pub const DEFAULT_MAX_ENTRIES: usize = 50;

/// Default merge window in seconds when the host provides none.
pub const DEFAULT_MERGE_WINDOW_SECONDS: u64 = 10;

/// Numeric configuration lookups, scoped to a resource so hosts can
/// vary retention per folder or per language.
pub trait HistoryConfiguration: Send + Sync {
    /// Maximum number of entries kept per resource
    /// (`workingcopy.history.maxEntries`).
    fn max_entries(&self, resource: &Url) -> usize;

    /// Interval within which consecutive saves with the same source
    /// collapse into one entry (`workingcopy.history.mergeWindow`).
    fn merge_window_seconds(&self, resource: &Url) -> u64;
}

/// Fixed-value configuration for composition roots and tests.
///
/// Values are atomics so a shared handle can be retuned while models
/// hold a reference.
#[derive(Debug)]
pub struct StaticConfiguration {
    max_entries: AtomicUsize,
    merge_window_seconds: AtomicU64,
}

impl StaticConfiguration {
    pub fn new(max_entries: usize, merge_window_seconds: u64) -> Self {
        Self {
            max_entries: AtomicUsize::new(max_entries),
            merge_window_seconds: AtomicU64::new(merge_window_seconds),
        }
    }

    pub fn set_max_entries(&self, max_entries: usize) {
        self.max_entries.store(max_entries, Ordering::SeqCst);
    }

    pub fn set_merge_window_seconds(&self, seconds: u64) {
        self.merge_window_seconds.store(seconds, Ordering::SeqCst);
    }
}

impl Default for StaticConfiguration {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_MERGE_WINDOW_SECONDS)
    }
}

impl HistoryConfiguration for StaticConfiguration {
    fn max_entries(&self, _resource: &Url) -> usize {
        self.max_entries.load(Ordering::SeqCst)
    }

    fn merge_window_seconds(&self, _resource: &Url) -> u64 {
        self.merge_window_seconds.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = StaticConfiguration::default();
        let resource = Url::parse("file:///a.txt").unwrap();
        assert_eq!(config.max_entries(&resource), DEFAULT_MAX_ENTRIES);
        assert_eq!(
            config.merge_window_seconds(&resource),
            DEFAULT_MERGE_WINDOW_SECONDS
        );
    }

    #[test]
    fn values_can_be_retuned_through_shared_handle() {
        let config = StaticConfiguration::default();
        let resource = Url::parse("file:///a.txt").unwrap();
        config.set_max_entries(1);
        config.set_merge_window_seconds(0);
        assert_eq!(config.max_entries(&resource), 1);
        assert_eq!(config.merge_window_seconds(&resource), 0);
    }
}
