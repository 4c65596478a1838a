use serde::{Deserialize, Serialize};

use crate::error::{LucentError, Result};

/// Largest postings stream a segment may hold (skip data uses 32-bit offsets)
pub const MAX_POSTINGS_BYTES: u64 = i32::MAX as u64;

/// Index configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Postings between two skip entries
    pub skip_interval: u32,
    /// Terms per front-coded dictionary block
    pub terms_per_block: usize,
    /// Record token positions in postings
    pub index_positions: bool,
    /// Record start/end character offsets alongside positions
    pub index_offsets: bool,
    /// Upper bound on the postings stream of one segment
    pub max_postings_bytes: u64,
    /// Buffered documents that trigger an automatic flush
    pub max_buffered_docs: usize,
    pub merge: MergePolicyConfig,
    pub sync: SyncPolicy,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            skip_interval: 128,
            terms_per_block: 32,
            index_positions: true,
            index_offsets: true,
            max_postings_bytes: MAX_POSTINGS_BYTES,
            max_buffered_docs: 10_000,
            merge: MergePolicyConfig::default(),
            sync: SyncPolicy::detect(),
        }
    }
}

impl IndexConfig {
    /// Reject settings the codecs cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.skip_interval < 2 {
            return Err(LucentError::InvalidArgument(format!(
                "skip_interval must be at least 2, got {}",
                self.skip_interval
            )));
        }
        if self.terms_per_block == 0 {
            return Err(LucentError::InvalidArgument(
                "terms_per_block must be positive".to_string(),
            ));
        }
        if self.index_offsets && !self.index_positions {
            return Err(LucentError::InvalidArgument(
                "index_offsets requires index_positions".to_string(),
            ));
        }
        if self.max_postings_bytes > MAX_POSTINGS_BYTES {
            return Err(LucentError::InvalidArgument(format!(
                "max_postings_bytes cannot exceed {}",
                MAX_POSTINGS_BYTES
            )));
        }
        if self.max_buffered_docs == 0 {
            return Err(LucentError::InvalidArgument(
                "max_buffered_docs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Postings without positions, the smallest format
    pub fn docs_and_freqs() -> Self {
        Self {
            index_positions: false,
            index_offsets: false,
            ..Default::default()
        }
    }
}

/// File durability behavior
///
/// Computed once for the running platform and carried inside `IndexConfig`
/// so every component sees the same decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPolicy {
    /// fsync files before they are renamed into place
    pub sync_files: bool,
    /// fsync the parent directory after a rename
    pub sync_directory: bool,
}

impl SyncPolicy {
    /// Platform default: directories can only be opened and synced on Unix
    pub fn detect() -> Self {
        Self {
            sync_files: true,
            sync_directory: cfg!(unix),
        }
    }

    /// No fsync at all (tests and throwaway indexes)
    pub fn none() -> Self {
        Self {
            sync_files: false,
            sync_directory: false,
        }
    }
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self::detect()
    }
}

/// Configuration for the tiered merge policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergePolicyConfig {
    /// Maximum size for a merged segment (default: 5GB)
    pub max_merged_segment_bytes: u64,
    /// Target number of segments per tier (default: 10)
    pub segments_per_tier: usize,
    /// Minimum number of segments to merge at once
    pub min_merge_count: usize,
    /// Maximum number of segments to merge at once
    pub max_merge_count: usize,
    /// Delete ratio threshold to force merge (default: 0.15 = 15%)
    pub delete_ratio_threshold: f64,
    /// Segments below this size are treated as this size
    pub floor_segment_bytes: u64,
}

impl Default for MergePolicyConfig {
    fn default() -> Self {
        Self {
            max_merged_segment_bytes: 5 * 1024 * 1024 * 1024,
            segments_per_tier: 10,
            min_merge_count: 2,
            max_merge_count: 10,
            delete_ratio_threshold: 0.15,
            floor_segment_bytes: 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = IndexConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.skip_interval, 128);
        assert_eq!(config.max_postings_bytes, MAX_POSTINGS_BYTES);
    }

    #[test]
    fn test_invalid_configs() {
        let config = IndexConfig {
            skip_interval: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = IndexConfig {
            index_positions: false,
            index_offsets: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = IndexConfig {
            max_postings_bytes: MAX_POSTINGS_BYTES + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serde() {
        let config = IndexConfig::docs_and_freqs();
        let json = serde_json::to_string(&config).unwrap();
        let restored: IndexConfig = serde_json::from_str(&json).unwrap();
        assert!(!restored.index_positions);
        assert_eq!(restored.terms_per_block, config.terms_per_block);
        assert_eq!(restored.sync, config.sync);
    }
}
