//! On-disk metadata listing file (`entries.json`).
//!
//! One listing per tracked resource, stored inside the resource's
//! snapshot folder. The listing only enriches entries with their true
//! timestamp, source and description — the snapshot files on disk,
//! not the listing, are the source of truth for which entries exist.

use serde::{Deserialize, Serialize};

use super::entry::{Entry, EntrySource};
use super::error::Result;

/// File name of the metadata listing inside a snapshot folder.
pub const LISTING_FILE: &str = "entries.json";

/// Current listing schema version.
pub const LISTING_VERSION: u32 = 1;

/// One entry record in the listing file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub id: String,

    /// Omitted when it equals the default "file saved" tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(
        rename = "sourceDescription",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_description: Option<String>,

    pub timestamp: i64,
}

/// The listing file schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub version: u32,
    pub resource: String,
    pub entries: Vec<ListingEntry>,
}

impl Listing {
    /// Build a listing from the in-memory entry set of a model.
    pub fn from_entries(resource: &str, entries: &[Entry]) -> Self {
        Self {
            version: LISTING_VERSION,
            resource: resource.to_string(),
            entries: entries
                .iter()
                .map(|entry| ListingEntry {
                    id: entry.id.clone(),
                    source: if entry.source.is_default() {
                        None
                    } else {
                        Some(entry.source.tag().to_string())
                    },
                    source_description: entry.source_description.clone(),
                    timestamp: entry.timestamp,
                })
                .collect(),
        }
    }

    /// Parse listing bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize to the bytes written to disk.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl ListingEntry {
    /// The source recorded for this entry, defaulting to "file saved".
    pub fn entry_source(&self) -> EntrySource {
        self.source
            .as_deref()
            .map(EntrySource::from_tag)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entry::WorkingCopy;
    use std::path::PathBuf;
    use url::Url;

    fn make_entry(id: &str, source: EntrySource, timestamp: i64) -> Entry {
        Entry {
            id: id.to_string(),
            working_copy: WorkingCopy {
                resource: Url::parse("file:///a.txt").unwrap(),
                name: "a.txt".to_string(),
            },
            location: PathBuf::from(format!("/history/ab12cd34/{id}.txt")),
            timestamp,
            source,
            source_description: None,
        }
    }

    #[test]
    fn listing_roundtrip() {
        let entries = vec![
            make_entry("11111111", EntrySource::FileSaved, 1000),
            make_entry("22222222", EntrySource::Renamed, 2000),
        ];
        let listing = Listing::from_entries("file:///a.txt", &entries);
        let parsed = Listing::parse(&listing.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, listing);
        assert_eq!(parsed.version, LISTING_VERSION);
    }

    #[test]
    fn default_source_is_omitted() {
        let entries = vec![make_entry("11111111", EntrySource::FileSaved, 1000)];
        let listing = Listing::from_entries("file:///a.txt", &entries);
        let json = String::from_utf8(listing.to_bytes().unwrap()).unwrap();
        assert!(!json.contains("\"source\""));
        assert_eq!(listing.entries[0].entry_source(), EntrySource::FileSaved);
    }

    #[test]
    fn non_default_source_is_written() {
        let entries = vec![make_entry("22222222", EntrySource::Moved, 2000)];
        let listing = Listing::from_entries("file:///a.txt", &entries);
        assert_eq!(listing.entries[0].source.as_deref(), Some("file.moved"));
        assert_eq!(listing.entries[0].entry_source(), EntrySource::Moved);
    }

    #[test]
    fn corrupt_listing_fails_to_parse() {
        assert!(Listing::parse(b"{not json").is_err());
    }
}
