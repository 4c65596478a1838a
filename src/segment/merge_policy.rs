//! Tiered merge policy for segment management
//!
//! Segments are bucketed into size tiers (`floor_segment_bytes` times
//! powers of `segments_per_tier`). A tier holding more than
//! `segments_per_tier` segments yields a merge of its smallest members;
//! segments whose delete ratio passes the threshold are merged first so
//! deleted docs get reclaimed. The policy only proposes merges: running
//! them is up to the caller.

use super::reader::SegmentInfo;
use super::types::SegmentId;
use crate::config::MergePolicyConfig;

const MAX_TIERS: usize = 10;

/// A candidate merge operation
#[derive(Clone, Debug, PartialEq)]
pub struct MergeCandidate {
    /// Segment IDs to merge
    pub segment_ids: Vec<SegmentId>,
    /// Total size after merge (estimate)
    pub estimated_size: u64,
    /// Merge score (higher = more urgent)
    pub score: f64,
    pub reason: MergeReason,
}

/// Reason why segments should be merged
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeReason {
    /// Too many segments in a tier
    TierOverflow,
    /// High delete ratio
    HighDeleteRatio,
    /// Requested by the caller
    Forced,
}

/// Tiered merge policy implementation
#[derive(Clone, Debug, Default)]
pub struct TieredMergePolicy {
    config: MergePolicyConfig,
}

impl TieredMergePolicy {
    pub fn new(config: MergePolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MergePolicyConfig {
        &self.config
    }

    /// Proposed merges, most urgent first; no segment appears twice
    pub fn find_merges(&self, segments: &[SegmentInfo]) -> Vec<MergeCandidate> {
        let mut candidates = Vec::new();
        if segments.len() < self.config.min_merge_count {
            return candidates;
        }

        if let Some(candidate) = self.find_high_delete_merge(segments) {
            candidates.push(candidate);
        }
        for candidate in self.find_tiered_merges(segments) {
            let overlaps = candidates.iter().any(|c: &MergeCandidate| {
                c.segment_ids.iter().any(|id| candidate.segment_ids.contains(id))
            });
            if !overlaps {
                candidates.push(candidate);
            }
        }

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates
    }

    /// Merge everything down to at most `max_segments` segments
    ///
    /// Takes the smallest segments first; `None` when already there.
    pub fn find_forced_merge(
        &self,
        segments: &[SegmentInfo],
        max_segments: usize,
    ) -> Option<MergeCandidate> {
        let max_segments = max_segments.max(1);
        if segments.len() <= max_segments {
            return None;
        }
        let mut sorted: Vec<&SegmentInfo> = segments.iter().collect();
        sorted.sort_by_key(|s| s.size_bytes);
        let to_merge: Vec<&SegmentInfo> = sorted
            .into_iter()
            .take(segments.len() - max_segments + 1)
            .collect();

        Some(MergeCandidate {
            segment_ids: to_merge.iter().map(|s| s.id).collect(),
            estimated_size: estimated_size(&to_merge),
            score: self.calculate_merge_score(&to_merge),
            reason: MergeReason::Forced,
        })
    }

    /// Find segments with high delete ratios that should be merged
    fn find_high_delete_merge(&self, segments: &[SegmentInfo]) -> Option<MergeCandidate> {
        let mut high_delete: Vec<&SegmentInfo> = segments
            .iter()
            .filter(|s| s.delete_ratio() > self.config.delete_ratio_threshold)
            .collect();
        high_delete.sort_by(|a, b| b.delete_ratio().total_cmp(&a.delete_ratio()));
        high_delete.truncate(self.config.max_merge_count);
        while high_delete.len() > 1 && self.would_exceed_max_size(&high_delete) {
            high_delete.pop();
        }

        // A single segment is worth rewriting on its own to drop deletes
        if high_delete.is_empty() {
            return None;
        }
        let avg_delete_ratio = high_delete.iter().map(|s| s.delete_ratio()).sum::<f64>()
            / high_delete.len() as f64;

        Some(MergeCandidate {
            segment_ids: high_delete.iter().map(|s| s.id).collect(),
            estimated_size: estimated_size(&high_delete),
            score: avg_delete_ratio * 100.0,
            reason: MergeReason::HighDeleteRatio,
        })
    }

    /// Find tiered merge candidates
    fn find_tiered_merges(&self, segments: &[SegmentInfo]) -> Vec<MergeCandidate> {
        let mut candidates = Vec::new();

        for (tier_idx, tier) in self.group_by_tier(segments).iter().enumerate() {
            if tier.len() <= self.config.segments_per_tier {
                continue;
            }
            let merge_count = (tier.len() - self.config.segments_per_tier + 1)
                .min(self.config.max_merge_count)
                .max(self.config.min_merge_count);

            let mut sorted = tier.clone();
            sorted.sort_by_key(|s| s.size_bytes);

            let mut to_merge: Vec<&SegmentInfo> = Vec::with_capacity(merge_count);
            let mut total = 0u64;
            for segment in sorted {
                if to_merge.len() == merge_count {
                    break;
                }
                if total + segment.size_bytes > self.config.max_merged_segment_bytes {
                    break;
                }
                total += segment.size_bytes;
                to_merge.push(segment);
            }

            if to_merge.len() >= self.config.min_merge_count {
                // Lower tiers are cheaper to merge and more urgent
                let score = (10.0 - tier_idx as f64).max(1.0) * to_merge.len() as f64;
                candidates.push(MergeCandidate {
                    segment_ids: to_merge.iter().map(|s| s.id).collect(),
                    estimated_size: total,
                    score,
                    reason: MergeReason::TierOverflow,
                });
            }
        }

        candidates
    }

    /// Group segments into tiers by live size
    fn group_by_tier<'a>(&self, segments: &'a [SegmentInfo]) -> Vec<Vec<&'a SegmentInfo>> {
        let floor = self.config.floor_segment_bytes.max(1);
        let ratio = self.config.segments_per_tier.max(2) as u64;

        let mut tiers: Vec<Vec<&SegmentInfo>> = vec![Vec::new(); MAX_TIERS];
        for segment in segments {
            let size = live_size(segment).max(floor);
            let tier = size_to_tier(size, floor, ratio).min(MAX_TIERS - 1);
            tiers[tier].push(segment);
        }

        while tiers.last().map_or(false, |t| t.is_empty()) {
            tiers.pop();
        }
        tiers
    }

    /// Check if a merge would exceed the maximum segment size
    fn would_exceed_max_size(&self, segments: &[&SegmentInfo]) -> bool {
        let total = estimated_size(segments);
        total > self.config.max_merged_segment_bytes
    }

    /// Score a merge of `segments`: delete ratio, count reduction, size
    fn calculate_merge_score(&self, segments: &[&SegmentInfo]) -> f64 {
        if segments.is_empty() {
            return 0.0;
        }

        let total = estimated_size(segments);
        let avg_delete_ratio =
            segments.iter().map(|s| s.delete_ratio()).sum::<f64>() / segments.len() as f64;

        let delete_score = avg_delete_ratio * 100.0;
        let count_score = (segments.len() as f64 - 1.0) * 10.0;
        let size_score = if total < self.config.max_merged_segment_bytes {
            50.0 * (1.0 - total as f64 / self.config.max_merged_segment_bytes as f64)
        } else {
            0.0
        };

        delete_score + count_score + size_score
    }
}

/// Bytes expected to survive a merge
fn live_size(segment: &SegmentInfo) -> u64 {
    (segment.size_bytes as f64 * (1.0 - segment.delete_ratio())) as u64
}

fn estimated_size(segments: &[&SegmentInfo]) -> u64 {
    segments.iter().map(|s| live_size(s)).sum()
}

/// Calculate which tier a segment belongs to based on size
fn size_to_tier(size: u64, floor: u64, ratio: u64) -> usize {
    if size <= floor {
        return 0;
    }

    let mut tier_max = floor.saturating_mul(ratio);
    let mut tier = 0;
    while size > tier_max && tier < MAX_TIERS {
        tier += 1;
        tier_max = tier_max.saturating_mul(ratio);
    }
    tier
}
