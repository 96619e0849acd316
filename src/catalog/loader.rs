//! Serialized catalog documents
//!
//! JSON with entries, aliases and base64-encoded PNG reference images.
//! Feature sets are not stored; they are re-derived on load.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use tracing::info;

use super::maintenance::{IngestOptions, IngestReport, PendingImage};
use super::{CaptureMetadata, CatalogEntry, CatalogStore};
use crate::error::IngestError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    entries: Vec<EntryDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryDocument {
    id: String,
    name: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    images: Vec<ImageDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageDocument {
    /// Base64 PNG
    data: String,
    #[serde(default)]
    metadata: CaptureMetadata,
    #[serde(default)]
    pinned: bool,
}

/// Load a catalog file into the store
///
/// Unreadable files fail as a whole; individual images that fail to decode
/// or ingest are reported and skipped.
pub fn load_catalog(path: &Path, store: &CatalogStore) -> Result<IngestReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog: {:?}", path))?;
    let document: CatalogDocument = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse catalog: {:?}", path))?;

    let mut entries = Vec::with_capacity(document.entries.len());
    let mut pending = Vec::new();

    for doc in document.entries {
        let mut entry = CatalogEntry::new(doc.id, doc.name, doc.category);
        for alias in &doc.aliases {
            entry.add_alias(alias);
        }

        for img in doc.images {
            let image = BASE64
                .decode(img.data.as_bytes())
                .map_err(|e| IngestError::CorruptImage(format!("invalid base64: {}", e)))
                .and_then(|bytes| Ok(image::load_from_memory(&bytes)?.to_rgb8()));
            pending.push(PendingImage {
                entry_id: entry.id.clone(),
                image,
                options: IngestOptions {
                    allow_duplicate: img.pinned,
                    metadata: img.metadata,
                    cancel: None,
                },
            });
        }
        entries.push(entry);
    }

    store.add_entries(entries);
    let report = store.ingest_pending(pending);

    let snapshot = store.snapshot();
    info!(
        "Loaded {} catalog entries with {} reference images from {:?} ({} failed)",
        snapshot.len(),
        snapshot.image_count(),
        path,
        report.failures.len()
    );
    Ok(report)
}

/// Write the current snapshot to a catalog file
pub fn save_catalog(store: &CatalogStore, path: &Path) -> Result<()> {
    let snapshot = store.snapshot();
    let mut document = CatalogDocument::default();

    for entry in snapshot.entries() {
        let mut images = Vec::with_capacity(entry.images.len());
        for img in &entry.images {
            let Some(raw) = snapshot.raw_image(img.handle) else {
                continue;
            };
            let mut png = Vec::new();
            raw.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
                .with_context(|| format!("Failed to encode reference image {}", img.handle))?;
            images.push(ImageDocument {
                data: BASE64.encode(&png),
                metadata: img.metadata,
                pinned: img.pinned,
            });
        }

        document.entries.push(EntryDocument {
            id: entry.id.clone(),
            name: entry.name.clone(),
            category: entry.category.clone(),
            aliases: entry.aliases().to_vec(),
            images,
        });
    }

    let content = serde_json::to_string_pretty(&document)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write catalog: {:?}", path))?;
    info!("Saved {} catalog entries to {:?}", document.entries.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::vision::test_images;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load_catalog() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");

        let store = CatalogStore::new(&EngineConfig::default());
        store.add_entry(
            CatalogEntry::new("met", "Metformin 500mg", "antidiabetic").with_alias("Glucophage"),
        );
        store
            .ingest_image("met", test_images::package(), &IngestOptions::default())
            .unwrap();
        save_catalog(&store, &path).unwrap();

        let loaded = CatalogStore::new(&EngineConfig::default());
        let report = load_catalog(&path, &loaded).unwrap();
        assert_eq!(report.stored, 1);
        assert!(report.failures.is_empty());

        let snapshot = loaded.snapshot();
        let entry = snapshot.get("met").unwrap();
        assert_eq!(entry.aliases(), &["glucophage".to_string()]);
        assert_eq!(entry.images().len(), 1);
        assert_eq!(
            entry.images()[0].content_hash,
            store.snapshot().get("met").unwrap().images()[0].content_hash
        );
    }

    #[test]
    fn test_load_publishes_entries_then_images() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");

        let store = CatalogStore::new(&EngineConfig::default());
        for i in 0..20 {
            store.add_entry(CatalogEntry::new(format!("e{:02}", i), "Generic", "x"));
        }
        store
            .ingest_image("e03", test_images::package(), &IngestOptions::default())
            .unwrap();
        store
            .ingest_image("e11", test_images::other_package(), &IngestOptions::default())
            .unwrap();
        save_catalog(&store, &path).unwrap();

        let loaded = CatalogStore::new(&EngineConfig::default());
        let before = loaded.snapshot().generation();
        let report = load_catalog(&path, &loaded).unwrap();
        assert_eq!(report.stored, 2);

        let snapshot = loaded.snapshot();
        assert_eq!(snapshot.generation(), before + 2);
        assert_eq!(snapshot.len(), 20);
        assert_eq!(snapshot.image_count(), 2);
    }

    #[test]
    fn test_bad_images_do_not_abort_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"entries": [
                {"id": "a", "name": "Aspirin", "images": [{"data": "!!!"}, {"data": "aGVsbG8="}]},
                {"id": "b", "name": "Ibuprofen", "aliases": ["Advil", "advil"]}
            ]}"#,
        )
        .unwrap();

        let store = CatalogStore::new(&EngineConfig::default());
        let report = load_catalog(&path, &store).unwrap();
        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .iter()
            .all(|f| matches!(f.error, IngestError::CorruptImage(_))));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("b").unwrap().aliases().len(), 1);
    }

    #[test]
    fn test_unreadable_file_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, "not json").unwrap();

        let store = CatalogStore::new(&EngineConfig::default());
        assert!(load_catalog(&path, &store).is_err());
        assert!(load_catalog(&dir.path().join("missing.json"), &store).is_err());
    }
}
