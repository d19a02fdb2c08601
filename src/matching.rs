//! Candidate correspondences between two keypoint sets, and merging of pairwise matches
//! into a global track graph.

use std::collections::{BTreeMap, HashMap};

use log::{debug, trace};

use crate::config::{MatchPolicy, MatchingConfig};
use crate::error::{Result, SfmError};
use crate::feature::KeypointSet;
use crate::neighbor::{KnnResult, NeighborIndex, new_index};
use crate::track_graph::TrackGraph;
use crate::{ImageId, TrackId};

/// Image ids used in the two-image graphs returned by the matchers.
pub const LEFT_IMAGE: ImageId = 0;
pub const RIGHT_IMAGE: ImageId = 1;

fn descriptors(set: &KeypointSet) -> Result<(Vec<f32>, usize)> {
    set.to_contiguous_array().ok_or_else(|| {
        SfmError::InvalidInput("keypoint descriptors do not share one positive dimension".into())
    })
}

fn build_index(config: &MatchingConfig, data: &[f32], rows: usize, dim: usize) -> Result<Box<dyn NeighborIndex>> {
    let mut index = new_index(
        config.method,
        config.kdtree_max_depth,
        config.kdtree_max_leaves,
    );
    index.build(data, rows, dim)?;
    Ok(index)
}

/// Queries every keypoint of `left` against an index over `right`.
fn search_left_in_right(
    left: &KeypointSet,
    right: &KeypointSet,
    config: &MatchingConfig,
    k: usize,
) -> Result<KnnResult> {
    let (data_left, _) = descriptors(left)?;
    let (data_right, dim_right) = descriptors(right)?;
    let index = build_index(config, &data_right, right.len(), dim_right)?;
    Ok(index.search_knn(&data_left, left.len(), k)?)
}

/// Index pairs `(i, j)` where `j` is the nearest neighbour of `left[i]` in `right` and
/// `i` is the nearest neighbour of `right[j]` in `left`. Sorted by `i`.
pub fn mutual_nearest_pairs(
    left: &KeypointSet,
    right: &KeypointSet,
    config: &MatchingConfig,
) -> Result<Vec<(usize, usize)>> {
    if left.is_empty() || right.is_empty() {
        return Ok(Vec::new());
    }
    let forward = search_left_in_right(left, right, config, 1)?.nearest_indices();
    let backward = search_left_in_right(right, left, config, 1)?.nearest_indices();
    Ok(forward
        .iter()
        .enumerate()
        .filter_map(|(i, j)| {
            let j = (*j)?;
            (backward.get(j).copied().flatten() == Some(i)).then_some((i, j))
        })
        .collect())
}

/// Index pairs `(i, j)` accepted by the distance-ratio test: the two nearest neighbours of
/// `left[i]` in `right` satisfy `d1 < ratio * d2`. A right set with a single keypoint
/// gives no second neighbour and therefore no match. Sorted by `i`.
pub fn ratio_test_pairs(
    left: &KeypointSet,
    right: &KeypointSet,
    config: &MatchingConfig,
    ratio: f32,
) -> Result<Vec<(usize, usize)>> {
    if left.is_empty() || right.is_empty() {
        return Ok(Vec::new());
    }
    let knn = search_left_in_right(left, right, config, 2)?;
    Ok(knn
        .neighbours
        .iter()
        .enumerate()
        .filter_map(|(i, n)| match n.as_slice() {
            [first, second, ..] if first.distance < ratio * second.distance => Some((i, first.index)),
            _ => None,
        })
        .collect())
}

fn pairs_to_graph(left: &KeypointSet, right: &KeypointSet, pairs: &[(usize, usize)]) -> TrackGraph {
    let mut matches = TrackGraph::new();
    for (track, (i, j)) in pairs.iter().enumerate() {
        matches.insert(LEFT_IMAGE, track as TrackId, left.keypoints[*i].feature);
        matches.insert(RIGHT_IMAGE, track as TrackId, right.keypoints[*j].feature);
    }
    matches
}

/// Mutual nearest-neighbour matches as a two-image graph: image [`LEFT_IMAGE`] and
/// [`RIGHT_IMAGE`], tracks numbered 0, 1, 2, ... in order of the left keypoint index.
pub fn find_candidate_matches(
    left: &KeypointSet,
    right: &KeypointSet,
    config: &MatchingConfig,
) -> Result<TrackGraph> {
    let pairs = mutual_nearest_pairs(left, right, config)?;
    trace!("mutual matches: {} of {} x {}", pairs.len(), left.len(), right.len());
    Ok(pairs_to_graph(left, right, &pairs))
}

/// Ratio-test matches as a two-image graph, numbered like [`find_candidate_matches`].
pub fn find_candidate_matches_ratio(
    left: &KeypointSet,
    right: &KeypointSet,
    config: &MatchingConfig,
    ratio: f32,
) -> Result<TrackGraph> {
    let pairs = ratio_test_pairs(left, right, config, ratio)?;
    trace!("ratio matches: {} of {} x {}", pairs.len(), left.len(), right.len());
    Ok(pairs_to_graph(left, right, &pairs))
}

/// Ratio-test matches as a raw `left index -> right index` mapping.
pub fn find_correspondences(
    left: &KeypointSet,
    right: &KeypointSet,
    config: &MatchingConfig,
    ratio: f32,
) -> Result<BTreeMap<usize, usize>> {
    Ok(ratio_test_pairs(left, right, config, ratio)?
        .into_iter()
        .collect())
}

/// Index pairs according to `config.policy`.
pub fn match_pair(
    left: &KeypointSet,
    right: &KeypointSet,
    config: &MatchingConfig,
) -> Result<Vec<(usize, usize)>> {
    match config.policy {
        MatchPolicy::Mutual => mutual_nearest_pairs(left, right, config),
        MatchPolicy::Ratio => ratio_test_pairs(left, right, config, config.ratio),
    }
}

/// Merges pairwise matches of many images into one track graph.
///
/// A feature is identified by its image and its index in that image's keypoint set. When
/// the right feature of a pair already belongs to a track the left feature joins that
/// track, and the other way round; otherwise both open a new track.
#[derive(Debug, Clone, Default)]
pub struct TrackBuilder {
    tracks: TrackGraph,
    feature_to_track: HashMap<(ImageId, usize), TrackId>,
    next_track: TrackId,
    min_pair_matches: usize,
}

impl TrackBuilder {
    pub fn new(min_pair_matches: usize) -> TrackBuilder {
        TrackBuilder {
            min_pair_matches,
            ..Default::default()
        }
    }

    pub fn graph(&self) -> &TrackGraph {
        &self.tracks
    }

    pub fn into_graph(self) -> TrackGraph {
        self.tracks
    }

    pub fn track_of(&self, image: ImageId, feature_index: usize) -> Option<TrackId> {
        self.feature_to_track.get(&(image, feature_index)).copied()
    }

    fn attach(&mut self, image: ImageId, index: usize, keypoints: &KeypointSet, track: TrackId) -> bool {
        if self.tracks.contains(image, track) {
            // the track already owns another feature of this image
            return self.track_of(image, index) == Some(track);
        }
        self.feature_to_track.insert((image, index), track);
        self.tracks.insert(image, track, keypoints.keypoints[index].feature);
        true
    }

    /// Adds the matches `(index in a, index in b)` between two images. Returns the number of
    /// matches merged, 0 when the pair had fewer than the minimum number of matches.
    pub fn add_pair(
        &mut self,
        image_a: ImageId,
        keypoints_a: &KeypointSet,
        image_b: ImageId,
        keypoints_b: &KeypointSet,
        pairs: &[(usize, usize)],
    ) -> usize {
        if pairs.len() < self.min_pair_matches.max(1) {
            debug!(
                "skip pair ({}, {}): {} matches",
                image_a,
                image_b,
                pairs.len()
            );
            return 0;
        }
        let mut merged = 0;
        for &(i, j) in pairs {
            if i >= keypoints_a.len() || j >= keypoints_b.len() {
                continue;
            }
            let ok = match (self.track_of(image_a, i), self.track_of(image_b, j)) {
                (Some(ta), Some(tb)) => ta == tb,
                (None, Some(tb)) => self.attach(image_a, i, keypoints_a, tb),
                (Some(ta), None) => self.attach(image_b, j, keypoints_b, ta),
                (None, None) => {
                    let track = self.next_track;
                    self.next_track += 1;
                    self.attach(image_a, i, keypoints_a, track)
                        && self.attach(image_b, j, keypoints_b, track)
                }
            };
            if ok {
                merged += 1;
            }
        }
        trace!("pair ({}, {}): merged {} of {}", image_a, image_b, merged, pairs.len());
        merged
    }

    /// Matches `a` against `b` with `config` and merges the result.
    pub fn match_and_add(
        &mut self,
        image_a: ImageId,
        keypoints_a: &KeypointSet,
        image_b: ImageId,
        keypoints_b: &KeypointSet,
        config: &MatchingConfig,
    ) -> Result<usize> {
        let pairs = match_pair(keypoints_a, keypoints_b, config)?;
        Ok(self.add_pair(image_a, keypoints_a, image_b, keypoints_b, &pairs))
    }
}
