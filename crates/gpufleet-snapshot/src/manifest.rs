//! Content manifest and chunking.
//!
//! Chunk boundaries here are fixed-size rather than content-defined (a true
//! content-defined chunker like FastCDC is its own crate's worth of work and
//! nothing else in this workspace needs it) — documented as a deliberate
//! simplification, the manifest shape the rest of the engine depends on
//! (`relative_path`, `size`, `mtime`, chunk hashes) is unchanged.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Files at or above this size are split into chunks; smaller files are a
/// single chunk equal to their whole content.
pub const CHUNK_SIZE_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub relative_path: String,
    pub size: u64,
    pub mtime: i64,
    /// Hash of the whole file's content, used for cheap unchanged-file
    /// detection between incremental snapshots.
    pub content_hash: String,
    /// Ordered chunk hashes; `chunks/<hash>` is the BlobStore key for each.
    pub chunk_hashes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn chunk_hashes(&self) -> Vec<String> {
        let mut hashes: Vec<String> = self
            .entries
            .iter()
            .flat_map(|e| e.chunk_hashes.iter().cloned())
            .collect();
        hashes.sort();
        hashes.dedup();
        hashes
    }

    pub fn file_count(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    fn by_path(&self) -> BTreeMap<&str, &ManifestEntry> {
        self.entries
            .iter()
            .map(|e| (e.relative_path.as_str(), e))
            .collect()
    }

    /// Diffs `self` (new) against `base` (old) for the diff summary an
    /// incremental snapshot descriptor records.
    pub fn diff_against(&self, base: &Manifest) -> DiffSummary {
        let new_by_path = self.by_path();
        let base_by_path = base.by_path();

        let mut files_added = 0;
        let mut files_changed = 0;
        for (path, entry) in &new_by_path {
            match base_by_path.get(path) {
                None => files_added += 1,
                Some(old) if old.content_hash != entry.content_hash => files_changed += 1,
                Some(_) => {}
            }
        }
        let files_removed = base_by_path
            .keys()
            .filter(|p| !new_by_path.contains_key(*p))
            .count() as u64;

        DiffSummary {
            files_added,
            files_removed,
            files_changed,
        }
    }

    /// Chunks from `self` not already present in any entry of `ancestors`,
    /// used to decide what an incremental snapshot still has to upload.
    pub fn chunks_missing_from(&self, ancestors: &Manifest) -> Vec<String> {
        let known: std::collections::HashSet<&str> = ancestors
            .entries
            .iter()
            .flat_map(|e| e.chunk_hashes.iter().map(String::as_str))
            .collect();
        self.chunk_hashes()
            .into_iter()
            .filter(|h| !known.contains(h.as_str()))
            .collect()
    }

    /// Merges `self` as the base with `overlay` applied on top, latest-wins
    /// per path — used to flatten an ancestry chain into one restorable
    /// manifest.
    pub fn merged_with(mut self, overlay: &Manifest) -> Manifest {
        for entry in &overlay.entries {
            if let Some(existing) = self
                .entries
                .iter_mut()
                .find(|e| e.relative_path == entry.relative_path)
            {
                *existing = entry.clone();
            } else {
                self.entries.push(entry.clone());
            }
        }
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub files_added: u64,
    pub files_removed: u64,
    pub files_changed: u64,
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Splits `content` into fixed-size chunks and hashes each, returning the
/// per-chunk hashes in order alongside the whole-file hash.
pub fn chunk_and_hash(content: &[u8]) -> (String, Vec<String>) {
    let whole = hash_bytes(content);
    if content.is_empty() {
        return (whole, vec![whole.clone()]);
    }
    let chunks = content
        .chunks(CHUNK_SIZE_BYTES as usize)
        .map(hash_bytes)
        .collect();
    (whole, chunks)
}
