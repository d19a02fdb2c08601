use incremental_sfm::config::KeyframeConfig;
use incremental_sfm::feature::FeatureRef;
use incremental_sfm::keyframes::{
    pairwise_match_matrix, partition_by_pairwise_scores, select_efficient_image_order,
    select_keyframes,
};
use incremental_sfm::sequence::ImageSequence;
use incremental_sfm::track_graph::TrackGraph;
use nalgebra as na;

/// Image `i` observes the tracks `[i * step, i * step + width)`.
fn sliding_graph(num_images: u32, step: u32, width: u32) -> TrackGraph {
    let mut graph = TrackGraph::new();
    let mut index = 0;
    for image in 0..num_images {
        for track in image * step..image * step + width {
            graph.insert(image, track, FeatureRef::point(index));
            index += 1;
        }
    }
    graph
}

fn config(pct: f32, min: usize) -> KeyframeConfig {
    KeyframeConfig {
        min_matches_pct: pct,
        min_num_matches: min,
    }
}

#[test]
fn test_full_overlap_gives_single_keyframe() {
    let graph = sliding_graph(6, 0, 100);
    let sequence = ImageSequence::from_graph(&graph);
    assert_eq!(select_keyframes(&graph, &sequence, &config(0.15, 50)), vec![0]);
}

#[test]
fn test_drop_promotes_previous_image() {
    // shared tracks with image 0: 90, 80, 70, 60, 50
    let graph = sliding_graph(6, 10, 100);
    let sequence = ImageSequence::from_graph(&graph);
    assert_eq!(select_keyframes(&graph, &sequence, &config(0.0, 65)), vec![0, 3]);
    assert_eq!(select_keyframes(&graph, &sequence, &config(0.55, 0)), vec![0, 4]);
    assert_eq!(
        select_keyframes(&graph, &sequence, &config(0.0, 85)),
        vec![0, 1, 2, 3, 4]
    );
}

#[test]
fn test_immediate_failure_reemits_reference() {
    let mut graph = TrackGraph::new();
    for track in 0..100 {
        graph.insert(0, track, FeatureRef::point(track));
        graph.insert(1, 1000 + track, FeatureRef::point(100 + track));
        graph.insert(2, 1000 + track, FeatureRef::point(200 + track));
    }
    let sequence = ImageSequence::from_graph(&graph);
    assert_eq!(select_keyframes(&graph, &sequence, &config(0.0, 50)), vec![0, 0, 1]);
}

#[test]
fn test_follows_sequence_order() {
    let graph = sliding_graph(6, 10, 100);
    let reversed = ImageSequence::new(vec![5, 4, 3, 2, 1, 0]).unwrap();
    assert_eq!(select_keyframes(&graph, &reversed, &config(0.0, 65)), vec![5, 2]);
    assert!(select_keyframes(&graph, &ImageSequence::default(), &config(0.0, 1)).is_empty());
}

#[test]
fn test_pairwise_match_matrix() {
    let graph = sliding_graph(3, 10, 30);
    let m = pairwise_match_matrix(&graph, &[0, 1, 2]);
    assert_eq!(m[(0, 1)], 20.0);
    assert_eq!(m[(0, 2)], 10.0);
    assert_eq!(m[(1, 2)], 20.0);
    assert_eq!(m[(1, 0)], 0.0);
    assert_eq!(m[(2, 2)], 0.0);
}

#[test]
fn test_partition_grows_chain_from_best_pair() {
    let mut scores = na::DMatrix::zeros(3, 3);
    scores[(0, 1)] = 10.0;
    scores[(1, 2)] = 8.0;
    scores[(0, 2)] = 3.0;
    assert_eq!(
        partition_by_pairwise_scores(scores, &[10, 11, 12]),
        vec![vec![10, 11, 12]]
    );

    let mut scores = na::DMatrix::zeros(3, 3);
    scores[(0, 1)] = 10.0;
    scores[(1, 2)] = 5.0;
    assert_eq!(
        partition_by_pairwise_scores(scores, &[0, 1, 2]),
        vec![vec![0, 1], vec![1, 2]]
    );

    assert!(partition_by_pairwise_scores(na::DMatrix::zeros(2, 2), &[0, 1]).is_empty());
}

#[test]
fn test_efficient_image_order_covers_connected_images() {
    let graph = sliding_graph(4, 10, 100);
    let sequence = ImageSequence::from_graph(&graph);
    let partitions = select_efficient_image_order(&graph, &sequence);
    assert!(!partitions.is_empty());
    let mut seen: Vec<_> = partitions.iter().flatten().copied().collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen, vec![0, 1, 2, 3]);
}
