//! Reference Catalog
//!
//! Canonical entries with their aliases and reference images. Readers take
//! an immutable [`CatalogSnapshot`]; every mutation builds a new snapshot
//! under a single writer lock and swaps it in, so matches already running
//! never observe a half-applied change.

mod loader;
mod maintenance;

pub use loader::{load_catalog, save_catalog};
pub use maintenance::{
    IngestFailure, IngestItem, IngestOptions, IngestOutcome, IngestReport, OptimizationReport,
};

use image::RgbImage;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::config::{CatalogConfig, EngineConfig};
use crate::error::IngestError;
use crate::text::{normalize_text, AliasResolver};
use crate::vision::{FeatureSet, QualityScore, VisualFeatureExtractor, VisualSimilarityScorer};

/// Handle to a raw image buffer owned by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageHandle(Uuid);

impl ImageHandle {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Physical state of the photographed package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Pristine,
    Worn,
    Damaged,
}

/// Lighting the reference was captured under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightingClass {
    Daylight,
    #[default]
    Indoor,
    Dim,
    Flash,
}

/// How a reference image was captured
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureMetadata {
    pub condition: Condition,
    /// Degrees off a frontal view
    pub viewing_angle: f32,
    pub lighting: LightingClass,
}

/// A stored reference image with its precomputed features
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceImage {
    pub handle: ImageHandle,
    pub entry_id: String,
    pub features: FeatureSet,
    pub quality: QualityScore,
    pub metadata: CaptureMetadata,
    /// SHA-256 of the decoded pixels
    pub content_hash: String,
    /// Stored with an explicit duplicate override; never pruned as a duplicate
    pub pinned: bool,
}

/// One canonical catalog item
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub id: String,
    /// Canonical display name
    pub name: String,
    pub category: String,
    aliases: Vec<String>,
    pub(crate) images: Vec<ReferenceImage>,
}

impl CatalogEntry {
    /// Create an entry with no aliases or images
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: category.into(),
            aliases: Vec::new(),
            images: Vec::new(),
        }
    }

    /// Builder form of [`CatalogEntry::add_alias`]
    pub fn with_alias(mut self, alias: &str) -> Self {
        self.add_alias(alias);
        self
    }

    /// Add a brand alias; aliases are kept normalized and unique
    pub fn add_alias(&mut self, alias: &str) -> bool {
        let alias = normalize_text(alias);
        if alias.is_empty() || self.aliases.contains(&alias) {
            return false;
        }
        self.aliases.push(alias);
        true
    }

    /// Normalized aliases
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Reference images
    pub fn images(&self) -> &[ReferenceImage] {
        &self.images
    }

    /// Look up one reference image
    pub fn image(&self, handle: ImageHandle) -> Option<&ReferenceImage> {
        self.images.iter().find(|img| img.handle == handle)
    }
}

/// Immutable view of the catalog at one point in time
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    entries: Vec<Arc<CatalogEntry>>,
    index: HashMap<String, usize>,
    names: Vec<String>,
    aliases: AliasResolver,
    lexicon: Vec<String>,
    raw: HashMap<ImageHandle, Arc<RgbImage>>,
    generation: u64,
}

impl CatalogSnapshot {
    /// Entries ordered by id
    pub fn entries(&self) -> &[Arc<CatalogEntry>] {
        &self.entries
    }

    /// Look up an entry by id
    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.index.get(id).map(|&i| self.entries[i].as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total reference images across entries
    pub fn image_count(&self) -> usize {
        self.entries.iter().map(|e| e.images.len()).sum()
    }

    /// Brand alias resolver built from the entries and configured aliases
    pub fn aliases(&self) -> &AliasResolver {
        &self.aliases
    }

    /// Every normalized canonical name and alias, sorted and unique
    pub fn lexicon(&self) -> &[String] {
        &self.lexicon
    }

    /// Raw pixels behind a reference image
    pub fn raw_image(&self, handle: ImageHandle) -> Option<&RgbImage> {
        self.raw.get(&handle).map(Arc::as_ref)
    }

    /// Number of raw buffers held, including orphans awaiting optimization
    pub fn raw_image_count(&self) -> usize {
        self.raw.len()
    }

    /// Incremented on every published change
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Normalized canonical names, parallel to [`CatalogSnapshot::entries`]
    pub(crate) fn normalized_names(&self) -> &[String] {
        &self.names
    }

    fn draft(&self) -> CatalogDraft {
        CatalogDraft {
            entries: self
                .entries
                .iter()
                .map(|e| (e.id.clone(), Arc::clone(e)))
                .collect(),
            raw: self.raw.clone(),
        }
    }
}

/// Mutable copy of a snapshot, published as a new snapshot when done
struct CatalogDraft {
    entries: BTreeMap<String, Arc<CatalogEntry>>,
    raw: HashMap<ImageHandle, Arc<RgbImage>>,
}

impl CatalogDraft {
    /// Insert a new entry without images, or update an existing one in place
    fn merge(&mut self, entry: CatalogEntry) -> bool {
        match self.entries.get_mut(&entry.id) {
            Some(existing) => {
                let existing = Arc::make_mut(existing);
                existing.name = entry.name;
                existing.category = entry.category;
                for alias in entry.aliases {
                    existing.add_alias(&alias);
                }
                false
            }
            None => {
                let mut entry = entry;
                entry.images.clear();
                self.entries.insert(entry.id.clone(), Arc::new(entry));
                true
            }
        }
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut CatalogEntry, IngestError> {
        self.entries
            .get_mut(id)
            .map(Arc::make_mut)
            .ok_or_else(|| IngestError::UnknownEntry(id.to_string()))
    }

    fn build(self, extra_aliases: &HashMap<String, String>, generation: u64) -> CatalogSnapshot {
        let entries: Vec<Arc<CatalogEntry>> = self.entries.into_values().collect();
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
        let names: Vec<String> = entries.iter().map(|e| normalize_text(&e.name)).collect();

        let aliases = AliasResolver::from_entries(
            entries.iter().map(|e| (e.name.as_str(), e.aliases.as_slice())),
            extra_aliases,
        );

        let mut lexicon: Vec<String> = names
            .iter()
            .cloned()
            .chain(entries.iter().flat_map(|e| e.aliases.iter().cloned()))
            .filter(|t| !t.is_empty())
            .collect();
        lexicon.sort();
        lexicon.dedup();

        CatalogSnapshot {
            entries,
            index,
            names,
            aliases,
            lexicon,
            raw: self.raw,
            generation,
        }
    }
}

/// Shared catalog handle: many readers, one writer
pub struct CatalogStore {
    current: RwLock<Arc<CatalogSnapshot>>,
    writer: Mutex<()>,
    config: CatalogConfig,
    extra_aliases: HashMap<String, String>,
    extractor: VisualFeatureExtractor,
    scorer: VisualSimilarityScorer,
}

impl CatalogStore {
    /// Create an empty store
    pub fn new(config: &EngineConfig) -> Self {
        let store = Self {
            current: RwLock::new(Arc::new(CatalogSnapshot::default())),
            writer: Mutex::new(()),
            config: config.catalog.clone(),
            extra_aliases: config.aliases.clone(),
            extractor: VisualFeatureExtractor::new(config.visual.clone()),
            scorer: VisualSimilarityScorer::new(config.visual.clone()),
        };
        // Publish once so configured aliases resolve even before any entry exists
        let draft = store.snapshot().draft();
        store.publish(draft);
        store
    }

    /// Current immutable snapshot
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Insert an entry, or update the name, category and aliases of an
    /// existing entry with the same id (its reference images are kept).
    /// Returns true when the entry is new.
    pub fn add_entry(&self, entry: CatalogEntry) -> bool {
        let _guard = self.writer.lock();
        let mut draft = self.snapshot().draft();
        let is_new = draft.merge(entry);
        self.publish(draft);
        is_new
    }

    /// Insert or update many entries with the semantics of [`Self::add_entry`],
    /// publishing a single snapshot. Returns the number of new entries.
    pub fn add_entries(&self, entries: impl IntoIterator<Item = CatalogEntry>) -> usize {
        let _guard = self.writer.lock();
        let mut draft = self.snapshot().draft();

        let mut touched = 0usize;
        let mut added = 0usize;
        for entry in entries {
            touched += 1;
            if draft.merge(entry) {
                added += 1;
            }
        }

        if touched > 0 {
            self.publish(draft);
        }
        debug!("Added {} of {} catalog entries", added, touched);
        added
    }

    /// Remove an entry. Its raw images stay in the pool as orphans until the
    /// next optimization pass.
    pub fn remove_entry(&self, id: &str) -> Option<CatalogEntry> {
        let _guard = self.writer.lock();
        let mut draft = self.snapshot().draft();
        let removed = draft.entries.remove(id)?;
        self.publish(draft);
        debug!("Removed catalog entry '{}'", id);
        Some(Arc::unwrap_or_clone(removed))
    }

    /// Append a learned brand alias to an entry
    pub fn add_alias(&self, id: &str, alias: &str) -> Result<bool, IngestError> {
        let _guard = self.writer.lock();
        let mut draft = self.snapshot().draft();
        let added = draft.entry_mut(id)?.add_alias(alias);
        if added {
            self.publish(draft);
        }
        Ok(added)
    }

    /// Delete one reference image and its raw buffer
    pub fn remove_image(&self, handle: ImageHandle) -> Result<(), IngestError> {
        let _guard = self.writer.lock();
        let mut draft = self.snapshot().draft();

        let owner = draft
            .entries
            .values()
            .find(|e| e.image(handle).is_some())
            .map(|e| e.id.clone())
            .ok_or(IngestError::UnknownImage(handle))?;

        draft.entry_mut(&owner)?.images.retain(|img| img.handle != handle);
        draft.raw.remove(&handle);
        self.publish(draft);
        Ok(())
    }

    fn publish(&self, draft: CatalogDraft) {
        let generation = self.current.read().generation + 1;
        let snapshot = draft.build(&self.extra_aliases, generation);
        *self.current.write() = Arc::new(snapshot);
    }
}

/// SHA-256 over dimensions and pixels
fn content_hash(image: &RgbImage) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image.width().to_le_bytes());
    hasher.update(image.height().to_le_bytes());
    hasher.update(image.as_raw());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CatalogStore {
        CatalogStore::new(&EngineConfig::default())
    }

    #[test]
    fn test_aliases_are_a_normalized_set() {
        let mut entry = CatalogEntry::new("met-500", "Metformin 500mg", "antidiabetic");
        assert!(entry.add_alias("Glucophage"));
        assert!(!entry.add_alias("  GLUCOPHAGE "));
        assert!(!entry.add_alias("--"));
        assert_eq!(entry.aliases(), &["glucophage".to_string()]);
    }

    #[test]
    fn test_add_and_replace_entry() {
        let store = store();
        assert!(store.add_entry(CatalogEntry::new("a", "Aspirin 100mg", "analgesic")));
        assert!(!store.add_entry(
            CatalogEntry::new("a", "Aspirin 100 mg", "analgesic").with_alias("Bayer Aspirin")
        ));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        let entry = snapshot.get("a").unwrap();
        assert_eq!(entry.name, "Aspirin 100 mg");
        assert_eq!(entry.aliases(), &["bayer aspirin".to_string()]);
        assert!(snapshot.lexicon().contains(&"aspirin 100 mg".to_string()));
    }

    #[test]
    fn test_bulk_add_publishes_once() {
        let store = store();
        store.add_entry(CatalogEntry::new("a", "Aspirin 100mg", "analgesic"));
        let before = store.snapshot().generation();

        let mut entries: Vec<CatalogEntry> = (0..50)
            .map(|i| CatalogEntry::new(format!("e{:02}", i), "Generic", "x"))
            .collect();
        entries.push(CatalogEntry::new("a", "Aspirin 100 mg", "analgesic").with_alias("Bayer"));
        assert_eq!(store.add_entries(entries), 50);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.generation(), before + 1);
        assert_eq!(snapshot.len(), 51);
        let updated = snapshot.get("a").unwrap();
        assert_eq!(updated.name, "Aspirin 100 mg");
        assert_eq!(updated.aliases(), &["bayer".to_string()]);

        // Nothing to add leaves the snapshot alone
        assert_eq!(store.add_entries(Vec::new()), 0);
        assert_eq!(store.snapshot().generation(), before + 1);
    }

    #[test]
    fn test_snapshots_are_isolated() {
        let store = store();
        store.add_entry(CatalogEntry::new("a", "Aspirin", "analgesic"));
        let before = store.snapshot();

        store.add_entry(CatalogEntry::new("b", "Ibuprofen", "analgesic"));
        store.add_alias("a", "Bayer").unwrap();

        assert_eq!(before.len(), 1);
        assert!(before.get("a").unwrap().aliases().is_empty());
        let after = store.snapshot();
        assert_eq!(after.len(), 2);
        assert!(after.generation() > before.generation());
    }

    #[test]
    fn test_alias_resolution_follows_catalog() {
        let store = store();
        store.add_entry(
            CatalogEntry::new("m", "Metformin 500mg", "antidiabetic").with_alias("Glucophage"),
        );
        let snapshot = store.snapshot();
        let resolved = snapshot.aliases().resolve("glucophage");
        assert!(resolved.changed);
        assert_eq!(resolved.text, "metformin 500 mg");
    }

    #[test]
    fn test_unknown_entry_errors() {
        let store = store();
        assert_eq!(
            store.add_alias("missing", "x"),
            Err(IngestError::UnknownEntry("missing".into()))
        );
        assert!(store.remove_entry("missing").is_none());
    }

    #[test]
    fn test_entries_sorted_by_id() {
        let store = store();
        store.add_entry(CatalogEntry::new("b", "Beta", "x"));
        store.add_entry(CatalogEntry::new("a", "Alpha", "x"));
        let ids: Vec<_> = store.snapshot().entries().iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
