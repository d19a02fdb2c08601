use incremental_sfm::feature::{FeatureArena, FeatureKind, FeatureRef, LineFeature, Feature};
use incremental_sfm::track_graph::TrackGraph;
use glam::Vec2;

#[test]
fn test_insert_and_get() {
    let mut graph = TrackGraph::new();
    assert!(graph.is_empty());
    assert_eq!(graph.get(0, 0), None);

    graph.insert(0, 10, FeatureRef::point(0));
    graph.insert(1, 10, FeatureRef::point(1));
    graph.insert(1, 11, FeatureRef::point(2));
    assert_eq!(graph.get(0, 10), Some(FeatureRef::point(0)));
    assert_eq!(graph.get(1, 11), Some(FeatureRef::point(2)));
    assert_eq!(graph.get(0, 11), None);
    assert_eq!(graph.num_images(), 2);
    assert_eq!(graph.num_tracks(), 2);
    assert_eq!(graph.num_edges(), 3);
}

#[test]
fn test_insert_overwrites_pair() {
    let mut graph = TrackGraph::new();
    graph.insert(3, 7, FeatureRef::point(0));
    graph.insert(3, 7, FeatureRef::point(5));
    assert_eq!(graph.get(3, 7), Some(FeatureRef::point(5)));
    assert_eq!(graph.num_edges(), 1);
    // both directions see the overwrite
    let in_track: Vec<_> = graph.features_in_track(7).collect();
    assert_eq!(in_track, vec![(3, FeatureRef::point(5))]);
}

#[test]
fn test_num_images_counts_distinct_ids() {
    let mut graph = TrackGraph::new();
    let images = [5u32, 1, 5, 9, 1, 1, 42];
    for (track, image) in images.iter().enumerate() {
        graph.insert(*image, track as u32, FeatureRef::point(track as u32));
    }
    assert_eq!(graph.num_images(), 4);
    assert_eq!(graph.images().collect::<Vec<_>>(), vec![1, 5, 9, 42]);
    assert_eq!(graph.num_features_in_image(1), 3);
    assert_eq!(graph.num_features_in_image(100), 0);
}

#[test]
fn test_iteration_is_ordered_and_restartable() {
    let mut graph = TrackGraph::new();
    for track in [30u32, 10, 20] {
        graph.insert(0, track, FeatureRef::point(track));
    }
    let edges = graph.features_in_image(0);
    let first: Vec<_> = edges.clone().map(|(t, _)| t).collect();
    let second: Vec<_> = edges.map(|(t, _)| t).collect();
    assert_eq!(first, vec![10, 20, 30]);
    assert_eq!(first, second);
    assert_eq!(graph.features_in_image(99).count(), 0);
}

#[test]
fn test_kind_filter_skips_lines() {
    let mut arena = FeatureArena::new();
    let p0 = arena.push_point(1.0, 2.0);
    let l0 = arena.push(Feature::Line(LineFeature {
        start: Vec2::new(0.0, 0.0),
        end: Vec2::new(1.0, 1.0),
    }));
    let p1 = arena.push_point(3.0, 4.0);
    assert_eq!(l0.kind, FeatureKind::Line);

    let mut graph = TrackGraph::new();
    graph.insert(0, 0, p0);
    graph.insert(0, 1, l0);
    graph.insert(0, 2, p1);
    let points: Vec<_> = graph
        .features_in_image(0)
        .with_kind(FeatureKind::Point)
        .map(|(t, _)| t)
        .collect();
    assert_eq!(points, vec![0, 2]);
    let lines: Vec<_> = graph
        .features_in_image(0)
        .with_kind(FeatureKind::Line)
        .collect();
    assert_eq!(lines, vec![(1, l0)]);
}

#[test]
fn test_shared_tracks_and_match_matrices() {
    let mut arena = FeatureArena::new();
    let mut graph = TrackGraph::new();
    for track in 0..5u32 {
        graph.insert(0, track, arena.push_point(track as f32, 0.0));
    }
    for track in 2..8u32 {
        graph.insert(1, track, arena.push_point(track as f32, 1.0));
    }
    assert_eq!(graph.num_shared_tracks(0, 1), 3);
    assert_eq!(graph.num_shared_tracks(0, 2), 0);
    assert_eq!(graph.tracks_in_all_images(&[0, 1]), vec![2, 3, 4]);
    assert!(graph.tracks_in_all_images(&[]).is_empty());

    let (tracks, points) = graph.point_match_matrices(&[0, 1], &arena);
    assert_eq!(tracks, vec![2, 3, 4]);
    assert_eq!(points.len(), 2);
    assert_eq!(points[0][1], Vec2::new(3.0, 0.0));
    assert_eq!(points[1][1], Vec2::new(3.0, 1.0));
}

#[test]
fn test_merge_and_clear() {
    let mut a: TrackGraph = [(0, 0, FeatureRef::point(0)), (1, 0, FeatureRef::point(1))]
        .into_iter()
        .collect();
    let b: TrackGraph = [(1, 0, FeatureRef::point(9)), (2, 1, FeatureRef::point(2))]
        .into_iter()
        .collect();
    a.insert_all(&b);
    assert_eq!(a.num_edges(), 3);
    assert_eq!(a.get(1, 0), Some(FeatureRef::point(9)));
    assert_eq!(a.max_track(), Some(1));

    let mut c = TrackGraph::new();
    c.insert_track_from(&a, 0);
    assert_eq!(c.num_edges(), 2);
    assert_eq!(c.num_features_in_track(0), 2);

    a.clear();
    assert!(a.is_empty());
    assert_eq!(a.num_images(), 0);
    assert_eq!(a.num_tracks(), 0);
}
