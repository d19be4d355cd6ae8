//! Process-wide registry of per-resource history models.
//!
//! An explicit object owned by the composition root, never a
//! language-level singleton: tests construct isolated registries. All
//! collaborators arrive through the constructor. Models are created
//! lazily on first access and only ever reached through the registry,
//! so two models can never race for the same resource.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::HistoryConfiguration;
use crate::domain::{Entry, EntrySource, Listing, Result, LISTING_FILE};
use crate::events::{HistoryEvent, HistoryEvents};
use crate::flush::FlushPolicy;
use crate::fs::FileService;
use crate::limiter::{Limiter, MAX_PARALLEL_IO};
use crate::model::{now_millis, HistoryModel};
use crate::services::{LabelService, RemoteEnvironment};

/// Registry of history models, one per tracked resource.
pub struct HistoryRegistry {
    files: Arc<dyn FileService>,
    config: Arc<dyn HistoryConfiguration>,
    labels: Arc<dyn LabelService>,
    remote: Arc<dyn RemoteEnvironment>,
    events: HistoryEvents,
    flush: FlushPolicy,
    local_home: PathBuf,
    history_home: OnceCell<PathBuf>,
    /// Keyed by the normalized resource URI string.
    models: Mutex<HashMap<String, Arc<HistoryModel>>>,
    /// Shared bounded pool for bulk cross-model file work.
    io_limiter: Limiter,
}

impl HistoryRegistry {
    pub fn new(
        local_home: PathBuf,
        files: Arc<dyn FileService>,
        config: Arc<dyn HistoryConfiguration>,
        labels: Arc<dyn LabelService>,
        remote: Arc<dyn RemoteEnvironment>,
        flush: FlushPolicy,
    ) -> Self {
        Self {
            files,
            config,
            labels,
            remote,
            events: HistoryEvents::new(),
            flush,
            local_home,
            history_home: OnceCell::new(),
            models: Mutex::new(HashMap::new()),
            io_limiter: Limiter::new(MAX_PARALLEL_IO),
        }
    }

    /// Change-notification streams for history consumers.
    pub fn events(&self) -> &HistoryEvents {
        &self.events
    }

    /// The root directory all per-resource snapshot folders live
    /// under. Resolved exactly once: a reachable remote-provided root
    /// wins, otherwise the local root; remote probe failures are
    /// logged and treated as "use local".
    pub async fn history_home(&self) -> &PathBuf {
        self.history_home
            .get_or_init(|| async {
                match self.remote.history_home().await {
                    Ok(Some(remote)) => remote,
                    Ok(None) => self.local_home.clone(),
                    Err(err) => {
                        warn!(error = %err, "failed to resolve remote history home, using local");
                        self.local_home.clone()
                    }
                }
            })
            .await
    }

    /// The model tracking `resource`, created lazily on first access.
    pub async fn get_model(&self, resource: &Url) -> Arc<HistoryModel> {
        let home = self.history_home().await.clone();
        let mut models = self.models.lock().await;
        Arc::clone(
            models
                .entry(resource_key(resource))
                .or_insert_with(|| {
                    Arc::new(HistoryModel::new(
                        resource.clone(),
                        home,
                        Arc::clone(&self.files),
                        Arc::clone(&self.config),
                        Arc::clone(&self.labels),
                        self.events.clone(),
                        self.flush,
                    ))
                }),
        )
    }

    // ── Per-entry operations ────────────────────────────────────────

    /// Capture a snapshot of `resource` now. Returns `None` when the
    /// resource's scheme has no backing file provider (nothing to
    /// snapshot), when cancelled, or when capture failed (logged, the
    /// triggering save must never fail because of history).
    pub async fn add_entry(
        &self,
        resource: &Url,
        source: EntrySource,
        source_description: Option<String>,
        token: &CancellationToken,
    ) -> Option<Entry> {
        if !self.files.can_handle(resource.scheme()) {
            return None;
        }
        let model = self.get_model(resource).await;
        match model
            .add_entry(source, source_description, now_millis(), token)
            .await
        {
            Ok(entry) => entry,
            Err(err) => {
                warn!(resource = %resource, error = %err, "failed to add history entry");
                None
            }
        }
    }

    /// Update the source tag of `entry`.
    pub async fn update_entry(
        &self,
        entry: &Entry,
        source: EntrySource,
        token: &CancellationToken,
    ) {
        let model = self.get_model(&entry.working_copy.resource).await;
        model.update_entry(entry, source, token).await;
    }

    /// Remove `entry` and its snapshot file.
    pub async fn remove_entry(&self, entry: &Entry, token: &CancellationToken) -> bool {
        let model = self.get_model(&entry.working_copy.resource).await;
        model.remove_entry(entry, token).await
    }

    /// Entries for `resource`, empty when cancelled.
    pub async fn get_entries(&self, resource: &Url, token: &CancellationToken) -> Vec<Entry> {
        if token.is_cancelled() {
            return Vec::new();
        }
        self.get_model(resource).await.get_entries().await
    }

    // ── Bulk operations ─────────────────────────────────────────────

    /// Migrate the history of `source` — and of every tracked
    /// descendant when `source` is a folder — to the corresponding
    /// location under `target`. Call after the resources themselves
    /// have been renamed or moved on disk.
    ///
    /// Per-model migrations run through the shared bounded pool so a
    /// mass rename never opens unbounded file handles. Returns the new
    /// resource URIs and fires one aggregate moved event.
    pub async fn move_entries(
        &self,
        source: &Url,
        target: &Url,
        token: &CancellationToken,
    ) -> Result<Vec<Url>> {
        self.history_home().await;

        let affected: Vec<(String, Arc<HistoryModel>, Url)> = {
            let models = self.models.lock().await;
            models
                .iter()
                .filter_map(|(key, model)| {
                    let resource = Url::parse(key).ok()?;
                    let new_resource = rebase_resource(&resource, source, target)?;
                    Some((key.clone(), Arc::clone(model), new_resource))
                })
                .collect()
        };

        // Same parent directory: a rename. Different parent: a move.
        let tag = if parent_path(source) == parent_path(target) {
            EntrySource::Renamed
        } else {
            EntrySource::Moved
        };

        let migrations = affected.iter().map(|(_, model, new_resource)| {
            let tag = tag.clone();
            self.io_limiter.run(async move {
                let target_model = self.get_model(new_resource).await;
                model.move_entries(&target_model, tag, token).await
            })
        });
        for (result, (key, ..)) in join_all(migrations).await.iter().zip(&affected) {
            if let Err(err) = result {
                warn!(resource = %key, error = %err, "failed to migrate history");
            }
        }

        let mut moved = Vec::with_capacity(affected.len());
        {
            let mut models = self.models.lock().await;
            for (key, model, new_resource) in affected {
                models.remove(&key);
                // The source model re-pointed itself to the target
                // resource and absorbed the target's entries; it now
                // owns that key.
                models.insert(resource_key(&new_resource), model);
                moved.push(new_resource);
            }
        }

        info!(source = %source, target = %target, count = moved.len(), "moved history entries");
        self.events.emit(HistoryEvent::EntriesMoved {
            resources: moved.clone(),
        });
        Ok(moved)
    }

    /// Every resource known to have at least one entry: the union of
    /// in-memory models with entries and a scan of the history home's
    /// immediate children, each probed by reading its listing file
    /// directly. Per-child scan failures are swallowed — one corrupt
    /// model must not fail the whole enumeration.
    pub async fn get_all(&self, token: &CancellationToken) -> Vec<Url> {
        let home = self.history_home().await.clone();

        let mut seen: HashSet<String> = HashSet::new();
        let mut all: Vec<Url> = Vec::new();

        let models: Vec<Arc<HistoryModel>> =
            self.models.lock().await.values().cloned().collect();
        for model in models {
            if token.is_cancelled() {
                return all;
            }
            if model.has_entries(true).await {
                let resource = model.resource().await;
                if seen.insert(resource_key(&resource)) {
                    all.push(resource);
                }
            }
        }
        if token.is_cancelled() {
            return all;
        }

        let children = match self.files.read_dir_with_meta(&home).await {
            Ok(children) => children,
            Err(err) => {
                if !err.is_not_found() {
                    debug!(error = %err, "failed to scan history home");
                }
                return all;
            }
        };
        let probes = children
            .into_iter()
            .filter(|child| !child.is_file)
            .map(|child| {
                self.io_limiter.run(async move {
                    if token.is_cancelled() {
                        return None;
                    }
                    let bytes = self
                        .files
                        .read_file(&child.path.join(LISTING_FILE))
                        .await
                        .ok()?;
                    let listing = Listing::parse(&bytes).ok()?;
                    if listing.entries.is_empty() {
                        return None;
                    }
                    Url::parse(&listing.resource).ok()
                })
            });
        for resource in join_all(probes).await.into_iter().flatten() {
            if seen.insert(resource_key(&resource)) {
                all.push(resource);
            }
        }

        all
    }

    /// Persist every dirty model through the shared bounded pool.
    /// The first failure propagates; used by the batched flush sweep
    /// and by the mandatory shutdown join.
    pub async fn store_all(&self, token: &CancellationToken) -> Result<()> {
        let models: Vec<Arc<HistoryModel>> =
            self.models.lock().await.values().cloned().collect();
        let stores = models
            .iter()
            .map(|model| self.io_limiter.run(async move { model.store(token).await }));
        for result in join_all(stores).await {
            result?;
        }
        Ok(())
    }

    /// Drop every model and recursively delete the entire history
    /// home. Irreversible and non-granular: no per-resource cleanup,
    /// no partial rollback. Fires one aggregate removed event.
    pub async fn remove_all(&self, token: &CancellationToken) -> Result<()> {
        let home = self.history_home().await.clone();
        if token.is_cancelled() {
            return Ok(());
        }

        self.models.lock().await.clear();
        if let Err(err) = self.files.delete(&home, true).await {
            if !err.is_not_found() {
                return Err(err);
            }
        }
        info!("removed all file history");
        self.events.emit(HistoryEvent::AllRemoved);
        Ok(())
    }
}

/// Normalized map key for a resource (schemes and hosts are already
/// lowercased by `Url`).
fn resource_key(resource: &Url) -> String {
    resource.as_str().to_string()
}

/// The new resource for `resource` when `source` moves to `target`:
/// `target` itself on an exact match, the path rebased under `target`
/// for descendants, `None` when `resource` is unaffected.
fn rebase_resource(resource: &Url, source: &Url, target: &Url) -> Option<Url> {
    if resource.scheme() != source.scheme() || resource.host_str() != source.host_str() {
        return None;
    }
    if resource.path() == source.path() {
        return Some(target.clone());
    }
    let rest = resource.path().strip_prefix(source.path())?;
    if !rest.starts_with('/') && !source.path().ends_with('/') {
        // Path-segment boundary: /a/b is not under /a/bc.
        return None;
    }
    let mut rebased = target.clone();
    rebased.set_path(&format!("{}{}", target.path(), rest));
    Some(rebased)
}

/// The parent portion of a resource's path, used to classify a move
/// as a rename (same parent) or a true move.
fn parent_path(resource: &Url) -> &str {
    let path = resource.path();
    match path.trim_end_matches('/').rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}
