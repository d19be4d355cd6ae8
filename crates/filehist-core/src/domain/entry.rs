//! History entries: one retained snapshot of a working copy.

use std::path::PathBuf;

use url::Url;

/// Identity of the tracked resource plus a cached display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingCopy {
    /// URI of the live, editable resource being tracked.
    pub resource: Url,
    /// Short display name (basename), cached at capture time.
    pub name: String,
}

/// Why an entry was created. Carries a stable tag used in the listing
/// file and a human-readable label for UIs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntrySource {
    /// The default: the working copy was saved.
    FileSaved,
    /// The working copy was renamed within its parent directory.
    Renamed,
    /// The working copy was moved to a different parent directory.
    Moved,
    /// A caller-registered tag (e.g. "undo", "restore").
    Custom(String),
}

impl EntrySource {
    /// Stable tag written to the listing file.
    pub fn tag(&self) -> &str {
        match self {
            Self::FileSaved => "file.saved",
            Self::Renamed => "file.renamed",
            Self::Moved => "file.moved",
            Self::Custom(tag) => tag,
        }
    }

    /// Parse a listing-file tag back into a source.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "file.saved" => Self::FileSaved,
            "file.renamed" => Self::Renamed,
            "file.moved" => Self::Moved,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &str {
        match self {
            Self::FileSaved => "File Saved",
            Self::Renamed => "File Renamed",
            Self::Moved => "File Moved",
            Self::Custom(tag) => tag,
        }
    }

    /// The default source is omitted from the listing file.
    pub fn is_default(&self) -> bool {
        matches!(self, Self::FileSaved)
    }
}

impl Default for EntrySource {
    fn default() -> Self {
        Self::FileSaved
    }
}

impl std::fmt::Display for EntrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// One retained snapshot of a working copy at a point in time.
///
/// The `id` is unique within its model and doubles as the snapshot
/// file's base name. The `location` file is owned exclusively by this
/// entry until deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Opaque token, unique per model, never reused.
    pub id: String,
    /// The tracked resource this snapshot belongs to.
    pub working_copy: WorkingCopy,
    /// Path of the snapshot file (a fresh clone, not deduplicated).
    pub location: PathBuf,
    /// Capture time, epoch millis.
    pub timestamp: i64,
    /// Why the entry was created.
    pub source: EntrySource,
    /// Optional elaboration, e.g. the old path for a rename.
    pub source_description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_tag_roundtrip() {
        for source in [
            EntrySource::FileSaved,
            EntrySource::Renamed,
            EntrySource::Moved,
            EntrySource::Custom("undo".into()),
        ] {
            assert_eq!(EntrySource::from_tag(source.tag()), source);
        }
    }

    #[test]
    fn only_file_saved_is_default() {
        assert!(EntrySource::FileSaved.is_default());
        assert!(!EntrySource::Renamed.is_default());
        assert!(!EntrySource::Custom("file.saved.custom".into()).is_default());
    }
}
