use log::{debug, trace};
use nalgebra as na;

use crate::ImageId;
use crate::config::KeyframeConfig;
use crate::sequence::ImageSequence;
use crate::track_graph::TrackGraph;

fn min_shared_tracks(graph: &TrackGraph, reference: ImageId, config: &KeyframeConfig) -> usize {
    let from_pct = (config.min_matches_pct * graph.num_features_in_image(reference) as f32) as usize;
    from_pct.max(config.min_num_matches)
}

/// Greedy keyframe selection over an ordered image sequence.
///
/// The first image is a keyframe. Each following image is compared with the current
/// reference keyframe; once it shares fewer than `max(pct * F, min)` tracks with it (`F`
/// being the reference's feature count), the last image that still passed becomes the next
/// keyframe and the failing image is tested again against it.
///
/// When no image passed since the reference, the reference is emitted a second time and the
/// failing image is taken as the next candidate, so a segment may hold a single keyframe.
pub fn select_keyframes(
    graph: &TrackGraph,
    sequence: &ImageSequence,
    config: &KeyframeConfig,
) -> Vec<ImageId> {
    let Some(first) = sequence.first() else {
        return Vec::new();
    };
    let mut keyframes = vec![first];
    let mut reference = first;
    let mut prev_good = first;
    let mut threshold = min_shared_tracks(graph, reference, config);
    trace!("features to keep: {}", threshold);

    for current in sequence.iter().skip(1) {
        loop {
            let shared = graph.num_shared_tracks(reference, current);
            trace!("shared tracks {} <-> {}: {}", reference, current, shared);
            if shared >= threshold {
                prev_good = current;
                break;
            }
            if prev_good != reference {
                debug!("keyframe detected: {}", prev_good);
                keyframes.push(prev_good);
                reference = prev_good;
                threshold = min_shared_tracks(graph, reference, config);
                continue;
            }
            debug!("image {} already fails against keyframe {}", current, reference);
            keyframes.push(reference);
            prev_good = current;
            break;
        }
    }
    keyframes
}

/// Number of tracks shared by every pair of `images`, upper triangle only.
pub fn pairwise_match_matrix(graph: &TrackGraph, images: &[ImageId]) -> na::DMatrix<f64> {
    let n = images.len();
    let mut m = na::DMatrix::zeros(n, n);
    for i in 0..n {
        for j in (i + 1)..n {
            m[(i, j)] = graph.num_shared_tracks(images[i], images[j]) as f64;
        }
    }
    m
}

fn argmax<I: Iterator<Item = (usize, f64)>>(values: I) -> (usize, f64) {
    values.fold((0, 0.0), |best, (i, v)| if v > best.1 { (i, v) } else { best })
}

/// Splits the images into chains of strongly connected images.
///
/// Each chain starts at the best remaining pair of the score matrix and grows from there
/// along the best scores of the seed's column and row, zeroing every pair it consumes.
/// Chains are produced until no positive score remains. `scores[(i, j)]` refers to
/// `images[i]` and `images[j]`.
pub fn partition_by_pairwise_scores(
    mut scores: na::DMatrix<f64>,
    images: &[ImageId],
) -> Vec<Vec<ImageId>> {
    let n = images.len().min(scores.nrows()).min(scores.ncols());
    let mut partitions = Vec::new();
    loop {
        let (best, value) = argmax((0..n * n).map(|k| (k, scores[(k / n, k % n)])));
        if value <= 0.0 {
            break;
        }
        let seed = (best / n, best % n);
        let mut order = vec![seed.0, seed.1];
        // pending seeds, each with the index it adds to the chain when visited
        let mut stack: Vec<((usize, usize), Option<usize>)> = vec![(seed, None)];
        while let Some((seed, add)) = stack.pop() {
            if let Some(id) = add {
                if !order.contains(&id) {
                    order.push(id);
                }
            }
            scores[(seed.0, seed.1)] = 0.0;
            let (col_row, val_c) = argmax((0..n).map(|r| (r, scores[(r, seed.1)])));
            let (row_col, val_r) = argmax((0..n).map(|c| (c, scores[(seed.0, c)])));
            let max_c = (col_row, seed.1);
            let max_r = (seed.0, row_col);
            if val_c > 0.0 {
                scores[max_c] = 0.0;
            }
            if val_r > 0.0 {
                scores[max_r] = 0.0;
            }
            let col_branch = (val_c > 0.0).then_some((max_c, Some(max_c.0)));
            let row_branch = (val_r > 0.0).then_some((max_r, Some(max_r.1)));
            // the branch visited first goes on the stack last
            let (first, second) = if val_c < val_r {
                (row_branch, col_branch)
            } else {
                (col_branch, row_branch)
            };
            stack.extend(second);
            stack.extend(first);
        }
        partitions.push(order.into_iter().map(|i| images[i]).collect());
    }
    partitions
}

/// Connected image chains ordered by pairwise overlap.
pub fn select_efficient_image_order(graph: &TrackGraph, sequence: &ImageSequence) -> Vec<Vec<ImageId>> {
    let images = sequence.as_slice();
    partition_by_pairwise_scores(pairwise_match_matrix(graph, images), images)
}
