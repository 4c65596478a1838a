//! Segment manifest for tracking live segments
//!
//! The manifest is the commit point of an index. Publishing a commit:
//! 1. Write new segment and live-docs files, fsync
//! 2. Write `segments.json.tmp`, fsync
//! 3. Rename to `segments.json`, fsync directory
//!
//! A crash before step 3 leaves the previous manifest in place; files it
//! does not reference are garbage and removed on the next open.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::reader::SegmentInfo;
use super::types::SegmentId;
use crate::config::SyncPolicy;
use crate::error::{LucentError, Result};
use crate::store::Directory;

pub const MANIFEST_FILE: &str = "segments.json";

/// The segment manifest tracks all committed segments
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentManifest {
    /// Manifest version (for format upgrades)
    pub version: u32,
    /// Generation number (incremented on each commit)
    pub generation: u64,
    /// Next segment ID to allocate
    pub next_segment_id: SegmentId,
    /// Committed segments, oldest first
    pub segments: Vec<SegmentInfo>,
}

impl SegmentManifest {
    /// Current manifest format version
    pub const VERSION: u32 = 1;

    /// Create a new empty manifest
    pub fn new() -> Self {
        Self {
            version: Self::VERSION,
            generation: 0,
            next_segment_id: SegmentId::new(0),
            segments: Vec::new(),
        }
    }

    /// Allocate a new segment ID
    pub fn allocate_segment_id(&mut self) -> SegmentId {
        let id = self.next_segment_id;
        self.next_segment_id = id.next();
        id
    }

    /// Get total document count across all segments
    pub fn total_doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.doc_count as u64).sum()
    }

    /// Get total live document count across all segments
    pub fn total_live_doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.live_count() as u64).sum()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.size_bytes).sum()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get_segment(&self, segment_id: SegmentId) -> Option<&SegmentInfo> {
        self.segments.iter().find(|s| s.id == segment_id)
    }

    /// Every file referenced by this manifest, itself included
    pub fn referenced_files(&self) -> Vec<String> {
        let mut files: Vec<String> = self.segments.iter().flat_map(|s| s.files()).collect();
        files.push(MANIFEST_FILE.to_string());
        files
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        let manifest: Self = serde_json::from_slice(data)?;
        if manifest.version != Self::VERSION {
            return Err(LucentError::corrupt(
                MANIFEST_FILE,
                format!("unsupported manifest version {}", manifest.version),
            ));
        }
        if let Some(s) = manifest.segments.iter().find(|s| s.id >= manifest.next_segment_id) {
            return Err(LucentError::corrupt(
                MANIFEST_FILE,
                format!("{} not below next segment id {}", s.id, manifest.next_segment_id.0),
            ));
        }
        Ok(manifest)
    }

    /// Read the committed manifest; `None` for a fresh directory
    pub fn load(dir: &dyn Directory) -> Result<Option<Self>> {
        if !dir.exists(MANIFEST_FILE) {
            return Ok(None);
        }
        let bytes = dir.open_input(MANIFEST_FILE)?;
        Self::from_json(&bytes).map(Some)
    }

    /// Publish this manifest as the new commit point
    pub fn commit(&self, dir: &dyn Directory, sync: SyncPolicy) -> Result<()> {
        dir.write_atomic(MANIFEST_FILE, &self.to_json()?, sync)?;
        info!(
            generation = self.generation,
            segments = self.segments.len(),
            docs = self.total_live_doc_count(),
            "committed manifest"
        );
        Ok(())
    }
}

impl Default for SegmentManifest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RamDirectory;

    fn info(id: SegmentId, doc_count: u32, del_count: u32, del_gen: u64) -> SegmentInfo {
        SegmentInfo {
            id,
            doc_count,
            del_count,
            del_gen,
            size_bytes: 1024,
            checksum: 7,
        }
    }

    #[test]
    fn test_manifest_basic() {
        let mut manifest = SegmentManifest::new();

        assert_eq!(manifest.segment_count(), 0);
        assert!(manifest.is_empty());

        let id = manifest.allocate_segment_id();
        assert_eq!(id, SegmentId::new(0));
        assert_eq!(manifest.next_segment_id, SegmentId::new(1));

        manifest.segments.push(info(id, 1000, 50, 2));

        assert_eq!(manifest.segment_count(), 1);
        assert_eq!(manifest.total_doc_count(), 1000);
        assert_eq!(manifest.total_live_doc_count(), 950);
        assert!(manifest.get_segment(id).is_some());
        assert_eq!(
            manifest.referenced_files(),
            vec![
                "segment_0.seg".to_string(),
                "segment_0_2.liv".to_string(),
                MANIFEST_FILE.to_string()
            ]
        );
    }

    #[test]
    fn test_commit_and_load() {
        let dir = RamDirectory::new();
        assert!(SegmentManifest::load(&dir).unwrap().is_none());

        let mut manifest = SegmentManifest::new();
        let id = manifest.allocate_segment_id();
        manifest.segments.push(info(id, 10, 0, 0));
        manifest.generation = 3;
        manifest.commit(&dir, SyncPolicy::none()).unwrap();

        let loaded = SegmentManifest::load(&dir).unwrap().unwrap();
        assert_eq!(loaded, manifest);
        assert!(!dir.exists("segments.json.tmp"));
    }

    #[test]
    fn test_rejects_inconsistent_manifest() {
        let mut manifest = SegmentManifest::new();
        manifest.segments.push(info(SegmentId(4), 1, 0, 0));
        let json = manifest.to_json().unwrap();
        assert!(SegmentManifest::from_json(&json).unwrap_err().is_corruption());

        assert!(SegmentManifest::from_json(b"{not json").is_err());
    }
}
