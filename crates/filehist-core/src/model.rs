//! Per-resource history model.
//!
//! A `HistoryModel` owns the full entry list for exactly one tracked
//! resource: snapshot capture with merge-on-save, one-shot disk
//! reconciliation, retention cleanup, serialized persistence of the
//! listing file, and migration of the whole history on rename/move.
//!
//! Reconciliation rule: the snapshot files on disk are the source of
//! truth for which entries exist. The listing file only enriches them
//! with their true timestamp, source and description — it never
//! manufactures an entry that has no backing file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::config::HistoryConfiguration;
use crate::domain::{
    Entry, EntrySource, HistoryError, Listing, Result, WorkingCopy, LISTING_FILE,
};
use crate::events::{HistoryEvent, HistoryEvents};
use crate::flush::FlushPolicy;
use crate::fs::FileService;
use crate::limiter::Limiter;
use crate::services::LabelService;

/// Current time as epoch millis.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Stable folder name for a resource's snapshots under the history
/// home: the first 8 hex chars of the sha-256 of the URI string.
/// Computable without a directory scan.
pub fn history_folder_name(resource: &Url) -> String {
    let digest = Sha256::digest(resource.as_str().as_bytes());
    hex::encode(&digest[..4])
}

/// Extract the entry id from a snapshot file name, or `None` when the
/// name does not match the `<8 hex chars>[.ext]` snapshot pattern.
fn snapshot_id_from_file_name(name: &str) -> Option<&str> {
    let stem = name.split('.').next().unwrap_or(name);
    if stem.len() == 8 && stem.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        Some(stem)
    } else {
        None
    }
}

/// Mutable state of a model, guarded by one async mutex.
struct ModelState {
    resource: Url,
    name: String,
    folder: PathBuf,
    listing_path: PathBuf,
    /// Always sorted ascending by timestamp.
    entries: Vec<Entry>,
    /// Bumped on every mutation.
    version_id: u64,
    /// `version_id` at the moment of the last successful persist.
    stored_version_id: u64,
    /// Whether the one-shot disk reconciliation has run under the
    /// current identity.
    resolved: bool,
}

/// Owner of one tracked resource's history entries and persistence.
pub struct HistoryModel {
    files: Arc<dyn FileService>,
    config: Arc<dyn HistoryConfiguration>,
    labels: Arc<dyn LabelService>,
    events: HistoryEvents,
    flush: FlushPolicy,
    history_home: PathBuf,
    state: Mutex<ModelState>,
    /// Serializes the first disk reconciliation so concurrent callers
    /// share one execution.
    resolve_gate: Mutex<()>,
    /// Width-1 queue: listing writes for this model never interleave.
    store_queue: Limiter,
}

impl HistoryModel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resource: Url,
        history_home: PathBuf,
        files: Arc<dyn FileService>,
        config: Arc<dyn HistoryConfiguration>,
        labels: Arc<dyn LabelService>,
        events: HistoryEvents,
        flush: FlushPolicy,
    ) -> Self {
        let name = labels.basename(&resource);
        let folder = history_home.join(history_folder_name(&resource));
        let listing_path = folder.join(LISTING_FILE);
        Self {
            files,
            config,
            labels,
            events,
            flush,
            history_home,
            state: Mutex::new(ModelState {
                resource,
                name,
                folder,
                listing_path,
                entries: Vec::new(),
                version_id: 0,
                stored_version_id: 0,
                resolved: false,
            }),
            resolve_gate: Mutex::new(()),
            store_queue: Limiter::new(1),
        }
    }

    /// The resource this model currently tracks.
    pub async fn resource(&self) -> Url {
        self.state.lock().await.resource.clone()
    }

    /// The folder holding this model's snapshots and listing file.
    pub async fn folder(&self) -> PathBuf {
        self.state.lock().await.folder.clone()
    }

    /// Whether there are mutations not yet persisted.
    pub async fn should_store(&self) -> bool {
        let st = self.state.lock().await;
        st.stored_version_id != st.version_id
    }

    /// Re-point this model at a new resource. Identity fields are
    /// replaced wholesale (they derive deterministically from the URI),
    /// the entry list is reset and reconciliation is re-armed. Touches
    /// no files; callers relocate snapshots and re-populate entries.
    fn apply_resource(&self, st: &mut ModelState, resource: Url) {
        st.name = self.labels.basename(&resource);
        st.folder = self.history_home.join(history_folder_name(&resource));
        st.listing_path = st.folder.join(LISTING_FILE);
        st.resource = resource;
        st.entries.clear();
        st.resolved = false;
    }

    // ── Mutators ────────────────────────────────────────────────────

    /// Capture a snapshot of the working copy.
    ///
    /// When the immediately preceding entry carries the same `source`
    /// and lies within the configured merge window, the previous entry
    /// is replaced in place instead of a new one being appended. This
    /// bounds snapshot proliferation from rapid auto-saves while still
    /// recording a new entry whenever the save reason changes.
    ///
    /// Returns `Ok(None)` when `token` was cancelled.
    pub async fn add_entry(
        &self,
        source: EntrySource,
        source_description: Option<String>,
        timestamp: i64,
        token: &CancellationToken,
    ) -> Result<Option<Entry>> {
        if token.is_cancelled() {
            return Ok(None);
        }

        // Decide replace-vs-append against the current last entry.
        let (resource, folder, replace_target, new_id) = {
            let st = self.state.lock().await;
            let window_ms = self.config.merge_window_seconds(&st.resource) as i64 * 1000;
            let replace = st
                .entries
                .last()
                .filter(|last| last.source == source && timestamp - last.timestamp <= window_ms)
                .cloned();
            let new_id = if replace.is_none() {
                Some(self.unused_entry_id(&st.entries))
            } else {
                None
            };
            (st.resource.clone(), st.folder.clone(), replace, new_id)
        };

        let from = resource_to_path(&resource)?;

        if let Some(previous) = replace_target {
            // Replace path: re-clone current bytes over the existing
            // snapshot, then rewrite the entry's metadata.
            self.files.clone_file(&from, &previous.location).await?;
            if token.is_cancelled() {
                return Ok(None);
            }

            let replaced = {
                let mut st = self.state.lock().await;
                let Some(entry) = st.entries.iter_mut().find(|e| e.id == previous.id) else {
                    return Ok(None);
                };
                entry.timestamp = timestamp;
                entry.source = source;
                entry.source_description = source_description;
                let replaced = entry.clone();
                st.version_id += 1;
                st.entries.sort_by(compare_entries);
                replaced
            };
            self.events.emit(HistoryEvent::EntryReplaced(replaced.clone()));
            self.flush_if_eager(token).await;
            return Ok(Some(replaced));
        }

        // Append path: fresh id, fresh snapshot clone.
        let id = new_id.expect("append path always has a fresh id");
        let location = folder.join(snapshot_file_name(&id, &resource));
        self.files.clone_file(&from, &location).await?;
        if token.is_cancelled() {
            return Ok(None);
        }

        let added = {
            let mut st = self.state.lock().await;
            let entry = Entry {
                id,
                working_copy: WorkingCopy {
                    resource: st.resource.clone(),
                    name: st.name.clone(),
                },
                location,
                timestamp,
                source,
                source_description,
            };
            st.entries.push(entry.clone());
            st.entries.sort_by(compare_entries);
            st.version_id += 1;
            entry
        };
        self.events.emit(HistoryEvent::EntryAdded(added.clone()));
        self.flush_if_eager(token).await;
        Ok(Some(added))
    }

    /// Remove one entry and its snapshot file. Returns `false` when
    /// cancelled or when the entry is unknown to this model.
    pub async fn remove_entry(&self, entry: &Entry, token: &CancellationToken) -> bool {
        self.resolve_once().await;
        if token.is_cancelled() {
            return false;
        }

        let found = {
            let st = self.state.lock().await;
            st.entries.iter().find(|e| e.id == entry.id).cloned()
        };
        let Some(found) = found else {
            return false;
        };

        if let Err(err) = self.files.delete(&found.location, false).await {
            if !err.is_not_found() {
                debug!(entry = %found.id, error = %err, "failed to delete snapshot file");
            }
        }
        if token.is_cancelled() {
            return false;
        }

        {
            let mut st = self.state.lock().await;
            st.entries.retain(|e| e.id != found.id);
            st.version_id += 1;
        }
        self.events.emit(HistoryEvent::EntryRemoved(found));
        self.flush_if_eager(token).await;
        true
    }

    /// Update the source tag of an existing entry. No-op when
    /// cancelled or when the entry is unknown.
    pub async fn update_entry(
        &self,
        entry: &Entry,
        source: EntrySource,
        token: &CancellationToken,
    ) {
        self.resolve_once().await;
        if token.is_cancelled() {
            return;
        }

        let updated = {
            let mut st = self.state.lock().await;
            let Some(existing) = st.entries.iter_mut().find(|e| e.id == entry.id) else {
                return;
            };
            existing.source = source;
            let updated = existing.clone();
            st.version_id += 1;
            updated
        };
        self.events.emit(HistoryEvent::EntryChanged(updated));
        self.flush_if_eager(token).await;
    }

    // ── Readers ─────────────────────────────────────────────────────

    /// All entries, capped to the most recent `max entries` from
    /// configuration. Read-time capping only: no state is mutated and
    /// no cleanup runs here.
    pub async fn get_entries(&self) -> Vec<Entry> {
        self.resolve_once().await;
        let st = self.state.lock().await;
        let cap = self.config.max_entries(&st.resource);
        let skip = st.entries.len().saturating_sub(cap);
        st.entries[skip..].to_vec()
    }

    /// Whether any entry exists. `skip_resolve` is a fast path for
    /// callers enumerating models whose resolution state is known to
    /// be irrelevant.
    pub async fn has_entries(&self, skip_resolve: bool) -> bool {
        if !skip_resolve {
            self.resolve_once().await;
        }
        !self.state.lock().await.entries.is_empty()
    }

    // ── Disk reconciliation ─────────────────────────────────────────

    /// Reconcile the in-memory entry list against disk, at most once
    /// per model identity. Concurrent first-callers share one
    /// execution via the resolve gate.
    async fn resolve_once(&self) {
        if self.state.lock().await.resolved {
            return;
        }
        let _gate = self.resolve_gate.lock().await;

        let (resource, folder, listing_path) = {
            let st = self.state.lock().await;
            if st.resolved {
                return;
            }
            (st.resource.clone(), st.folder.clone(), st.listing_path.clone())
        };

        let disk = self
            .read_entries_from_disk(&resource, &folder, &listing_path)
            .await;

        let mut st = self.state.lock().await;
        if st.resolved {
            return;
        }
        // Entries mutated in memory before resolution completed win
        // over the disk-derived set, keyed by id.
        let mut merged: HashMap<String, Entry> =
            disk.into_iter().map(|e| (e.id.clone(), e)).collect();
        for entry in st.entries.drain(..) {
            merged.insert(entry.id.clone(), entry);
        }
        let mut entries: Vec<Entry> = merged.into_values().collect();
        entries.sort_by(compare_entries);
        st.entries = entries;
        st.resolved = true;
    }

    /// Build the disk-derived entry set: the snapshot folder scan is
    /// authoritative for existence, the listing file (when present and
    /// parsable) overlays richer metadata by id.
    async fn read_entries_from_disk(
        &self,
        resource: &Url,
        folder: &PathBuf,
        listing_path: &PathBuf,
    ) -> Vec<Entry> {
        let listing = match self.files.read_file(listing_path).await {
            Ok(bytes) => match Listing::parse(&bytes) {
                Ok(listing) => Some(listing),
                Err(err) => {
                    // Structural corruption: discard wholesale, the
                    // folder scan still yields file-presence entries.
                    warn!(resource = %resource, error = %err, "discarding unparsable history listing");
                    None
                }
            },
            Err(err) => {
                if !err.is_not_found() {
                    debug!(resource = %resource, error = %err, "failed to read history listing");
                }
                None
            }
        };

        let children = match self.files.read_dir_with_meta(folder).await {
            Ok(children) => children,
            Err(err) => {
                if !err.is_not_found() {
                    debug!(resource = %resource, error = %err, "failed to scan history folder");
                }
                Vec::new()
            }
        };

        let name = self.labels.basename(resource);
        let mut by_id: HashMap<String, Entry> = HashMap::new();
        for child in children {
            if !child.is_file || child.name == LISTING_FILE {
                continue;
            }
            let Some(id) = snapshot_id_from_file_name(&child.name) else {
                continue;
            };
            by_id.insert(
                id.to_string(),
                Entry {
                    id: id.to_string(),
                    working_copy: WorkingCopy {
                        resource: resource.clone(),
                        name: name.clone(),
                    },
                    location: child.path,
                    // Seeded from the file mtime until the listing
                    // provides the true capture time.
                    timestamp: child.mtime,
                    source: EntrySource::default(),
                    source_description: None,
                },
            );
        }

        if let Some(listing) = listing {
            for meta in listing.entries {
                // A listing row without a backing file manufactures
                // nothing: file absence wins.
                if let Some(entry) = by_id.get_mut(&meta.id) {
                    entry.timestamp = meta.timestamp;
                    entry.source = meta.entry_source();
                    entry.source_description = meta.source_description;
                }
            }
        }

        by_id.into_values().collect()
    }

    // ── Persistence ─────────────────────────────────────────────────

    /// Persist the listing file if there are unpersisted mutations.
    ///
    /// Writes are serialized through a width-1 queue; a store issued
    /// while another is in flight waits, then re-checks dirtiness so
    /// it can skip a write the first store already covered.
    pub async fn store(&self, token: &CancellationToken) -> Result<()> {
        if !self.should_store().await {
            return Ok(());
        }
        self.store_queue.run(self.do_store(token)).await
    }

    async fn do_store(&self, token: &CancellationToken) -> Result<()> {
        if !self.should_store().await {
            return Ok(());
        }
        self.resolve_once().await;
        if token.is_cancelled() {
            return Ok(());
        }

        // Capture the version before cleanup so mutations arriving
        // during the async write are not falsely marked clean.
        let version = self.state.lock().await.version_id;
        self.clean_up_entries().await;

        let (resource, folder, listing_path, entries) = {
            let st = self.state.lock().await;
            (
                st.resource.clone(),
                st.folder.clone(),
                st.listing_path.clone(),
                st.entries.clone(),
            )
        };

        if entries.is_empty() {
            // Nothing left: delete the whole snapshot folder instead
            // of writing an empty listing.
            if let Err(err) = self.files.delete(&folder, true).await {
                if !err.is_not_found() {
                    warn!(resource = %resource, error = %err, "failed to delete empty history folder");
                }
            }
        } else {
            let listing = Listing::from_entries(resource.as_str(), &entries);
            self.files
                .write_file(&listing_path, &listing.to_bytes()?)
                .await?;
        }

        self.state.lock().await.stored_version_id = version;
        Ok(())
    }

    /// Evict the oldest entries beyond the configured retention cap,
    /// deleting their snapshot files and firing one removed event per
    /// evicted entry.
    async fn clean_up_entries(&self) {
        let evicted = {
            let mut st = self.state.lock().await;
            let cap = self.config.max_entries(&st.resource);
            if st.entries.len() <= cap {
                return;
            }
            let split = st.entries.len() - cap;
            st.entries.drain(..split).collect::<Vec<_>>()
        };

        for entry in evicted {
            if let Err(err) = self.files.delete(&entry.location, false).await {
                if !err.is_not_found() {
                    debug!(entry = %entry.id, error = %err, "failed to delete evicted snapshot");
                }
            }
            self.events.emit(HistoryEvent::EntryRemoved(entry));
        }
    }

    // ── Rename / move ───────────────────────────────────────────────

    /// Migrate this model's history to `target`'s resource after the
    /// tracked file itself was renamed or moved.
    ///
    /// Snapshot files are moved individually; when every per-file move
    /// fails the whole folder is moved as one unit instead. The merged
    /// history is the id-keyed union with the target's entries (a move
    /// can land on a resource that already has history), the model is
    /// re-pointed at the target resource, the move itself is recorded
    /// as an entry, and a store is forced.
    ///
    /// Best-effort: when the folder fallback also fails partway, the
    /// folder is left in a mixed state, logged, not rolled back.
    pub async fn move_entries(
        &self,
        target: &HistoryModel,
        source: EntrySource,
        token: &CancellationToken,
    ) -> Result<()> {
        self.resolve_once().await;
        target.resolve_once().await;
        if token.is_cancelled() {
            return Ok(());
        }

        let (old_resource, old_folder, my_entries) = {
            let st = self.state.lock().await;
            (st.resource.clone(), st.folder.clone(), st.entries.clone())
        };
        let (new_resource, target_folder, target_entries) = {
            let st = target.state.lock().await;
            (st.resource.clone(), st.folder.clone(), st.entries.clone())
        };

        if !my_entries.is_empty() {
            let mut moved = 0usize;
            for entry in &my_entries {
                let Some(file_name) = entry.location.file_name() else {
                    continue;
                };
                let destination = target_folder.join(file_name);
                match self.files.move_file(&entry.location, &destination).await {
                    Ok(()) => moved += 1,
                    Err(err) => {
                        if !err.is_not_found() {
                            debug!(entry = %entry.id, error = %err, "failed to move snapshot file");
                        }
                    }
                }
            }
            if moved == 0 {
                // Total per-file failure: move the folder as one unit.
                if let Err(err) = self.files.move_file(&old_folder, &target_folder).await {
                    if !err.is_not_found() {
                        warn!(resource = %old_resource, error = %err, "failed to migrate history folder");
                    }
                }
            } else if moved == my_entries.len() {
                // Fully migrated: drop the old folder so its stale
                // listing cannot resurface the resource. A partial
                // migration keeps the folder; it still owns snapshots.
                if let Err(err) = self.files.delete(&old_folder, true).await {
                    if !err.is_not_found() {
                        debug!(resource = %old_resource, error = %err, "failed to remove migrated history folder");
                    }
                }
            }
        }
        if token.is_cancelled() {
            return Ok(());
        }

        {
            let mut st = self.state.lock().await;
            self.apply_resource(&mut st, new_resource.clone());

            let mut merged: HashMap<String, Entry> = HashMap::new();
            for entry in target_entries.into_iter().chain(my_entries.into_iter()) {
                merged.insert(entry.id.clone(), entry);
            }
            let mut entries: Vec<Entry> = merged
                .into_values()
                .map(|mut entry| {
                    entry.working_copy = WorkingCopy {
                        resource: new_resource.clone(),
                        name: st.name.clone(),
                    };
                    if let Some(file_name) = entry.location.file_name() {
                        entry.location = st.folder.join(file_name);
                    }
                    entry
                })
                .collect();
            entries.sort_by(compare_entries);
            st.entries = entries;
            st.resolved = true;
            st.version_id += 1;
        }

        let description = old_resource
            .to_file_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| old_resource.to_string());
        self.add_entry(source, Some(description), now_millis(), token)
            .await?;
        self.store(token).await
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn flush_if_eager(&self, token: &CancellationToken) {
        if self.flush == FlushPolicy::Eager && !token.is_cancelled() {
            if let Err(err) = self.store(token).await {
                warn!(error = %err, "failed to store history after mutation");
            }
        }
    }

    /// A fresh 8-char hex id not used by any current entry.
    fn unused_entry_id(&self, entries: &[Entry]) -> String {
        loop {
            let id = Uuid::new_v4().simple().to_string()[..8].to_string();
            if !entries.iter().any(|e| e.id == id) {
                return id;
            }
        }
    }
}

fn compare_entries(a: &Entry, b: &Entry) -> std::cmp::Ordering {
    a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id))
}

/// Snapshot file name: entry id plus the resource's file extension.
fn snapshot_file_name(id: &str, resource: &Url) -> String {
    match resource.path().rsplit_once('.') {
        Some((prefix, ext))
            if !ext.is_empty() && !ext.contains('/') && !prefix.is_empty() =>
        {
            format!("{id}.{ext}")
        }
        _ => id.to_string(),
    }
}

fn resource_to_path(resource: &Url) -> Result<PathBuf> {
    resource
        .to_file_path()
        .map_err(|_| HistoryError::InvalidResource(resource.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_name_is_stable_and_short() {
        let resource = Url::parse("file:///home/user/a.txt").unwrap();
        let name = history_folder_name(&resource);
        assert_eq!(name, history_folder_name(&resource));
        assert_eq!(name.len(), 8);
        assert!(name.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn folder_name_differs_per_resource() {
        let a = Url::parse("file:///a.txt").unwrap();
        let b = Url::parse("file:///b.txt").unwrap();
        assert_ne!(history_folder_name(&a), history_folder_name(&b));
    }

    #[test]
    fn snapshot_file_name_keeps_extension() {
        let resource = Url::parse("file:///home/user/notes.md").unwrap();
        assert_eq!(snapshot_file_name("ab12cd34", &resource), "ab12cd34.md");

        let no_ext = Url::parse("file:///home/user/Makefile").unwrap();
        assert_eq!(snapshot_file_name("ab12cd34", &no_ext), "ab12cd34");
    }

    #[test]
    fn snapshot_pattern_accepts_only_short_hex_stems() {
        assert_eq!(snapshot_id_from_file_name("ab12cd34.txt"), Some("ab12cd34"));
        assert_eq!(snapshot_id_from_file_name("ab12cd34"), Some("ab12cd34"));
        assert_eq!(snapshot_id_from_file_name("entries.json"), None);
        assert_eq!(snapshot_id_from_file_name("AB12CD34.txt"), None);
        assert_eq!(snapshot_id_from_file_name("ab12cd3.txt"), None);
        assert_eq!(snapshot_id_from_file_name("notahexid.txt"), None);
    }
}
