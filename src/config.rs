use serde::{Deserialize, Serialize};

use crate::neighbor::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_LEAVES, MatchMethod};

/// Acceptance rule for descriptor matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    #[default]
    Mutual,
    Ratio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub method: MatchMethod,
    pub policy: MatchPolicy,
    pub ratio: f32,
    pub kdtree_max_depth: usize,
    pub kdtree_max_leaves: usize,
    /// Image pairs with fewer matches are not merged into the track graph.
    pub min_pair_matches: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            method: MatchMethod::KdTree,
            policy: MatchPolicy::Mutual,
            ratio: 0.8,
            kdtree_max_depth: DEFAULT_MAX_DEPTH,
            kdtree_max_leaves: DEFAULT_MAX_LEAVES,
            min_pair_matches: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyframeConfig {
    pub min_matches_pct: f32,
    pub min_num_matches: usize,
}

impl Default for KeyframeConfig {
    fn default() -> Self {
        Self {
            min_matches_pct: 0.15,
            min_num_matches: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Max epipolar error in pixels for the two-view solver.
    pub epipolar_threshold: f64,
    pub outlier_probability: f64,
    /// Max reprojection error in pixels for resection.
    pub resection_threshold: f64,
    pub min_views_initial: usize,
    pub min_views_incremental: usize,
    /// Refine after every n-th keyframe added by resection.
    pub keyframe_refinement_interval: usize,
    /// Refine after every n-th image localized during backfill.
    pub backfill_refinement_interval: usize,
    pub image_width: u32,
    pub image_height: u32,
    /// Focal length in pixels. Without it the reconstruction runs uncalibrated.
    pub focal: Option<f64>,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            epipolar_threshold: 1.0,
            outlier_probability: 1e-3,
            resection_threshold: 1.0,
            min_views_initial: 2,
            min_views_incremental: 3,
            keyframe_refinement_interval: 1,
            backfill_refinement_interval: 10,
            image_width: 640,
            image_height: 480,
            focal: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SfmConfig {
    pub matching: MatchingConfig,
    pub keyframes: KeyframeConfig,
    pub reconstruction: ReconstructionConfig,
}
