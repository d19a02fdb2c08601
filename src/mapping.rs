//! Selection of 2D/3D correspondences and triangulation of tracks into a segment.

use log::trace;
use nalgebra as na;

use crate::feature::{FeatureArena, FeatureKind};
use crate::reconstruction::{PointStructure, Reconstruction};
use crate::solvers::{Observation, Triangulator};
use crate::track_graph::TrackGraph;
use crate::{ImageId, TrackId};

pub(crate) fn to_na(p: glam::Vec2) -> na::Vector2<f64> {
    na::Vector2::new(p.x as f64, p.y as f64)
}

/// Point observations of `image` whose track passes `keep`, in track order.
fn select_point_structures<F: Fn(TrackId) -> bool>(
    graph: &TrackGraph,
    arena: &FeatureArena,
    image: ImageId,
    keep: F,
) -> (Vec<TrackId>, Vec<na::Vector2<f64>>) {
    graph
        .features_in_image(image)
        .with_kind(FeatureKind::Point)
        .filter(|(track, _)| keep(*track))
        .filter_map(|(track, f)| arena.point(f).map(|p| (track, to_na(p.position))))
        .unzip()
}

/// Tracks observed in `image` that already have a structure, with their pixel positions.
pub fn select_existing_point_structures(
    graph: &TrackGraph,
    arena: &FeatureArena,
    image: ImageId,
    reconstruction: &Reconstruction,
) -> (Vec<TrackId>, Vec<na::Vector2<f64>>) {
    select_point_structures(graph, arena, image, |t| reconstruction.has_structure(t))
}

/// Tracks observed in `image` without a structure yet, with their pixel positions.
pub fn select_unexisting_point_structures(
    graph: &TrackGraph,
    arena: &FeatureArena,
    image: ImageId,
    reconstruction: &Reconstruction,
) -> (Vec<TrackId>, Vec<na::Vector2<f64>>) {
    select_point_structures(graph, arena, image, |t| !reconstruction.has_structure(t))
}

/// Translation to the centroid and scaling to a mean distance of sqrt(2).
pub fn isotropic_preconditioner(points: &[na::Vector2<f64>]) -> na::Matrix3<f64> {
    if points.is_empty() {
        return na::Matrix3::identity();
    }
    let n = points.len() as f64;
    let mean = points.iter().sum::<na::Vector2<f64>>() / n;
    let mean_dist = points.iter().map(|p| (p - mean).norm()).sum::<f64>() / n;
    let scale = if mean_dist > f64::EPSILON {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    na::Matrix3::new(
        scale,
        0.0,
        -scale * mean.x,
        0.0,
        scale,
        -scale * mean.y,
        0.0,
        0.0,
        1.0,
    )
}

fn apply(t: &na::Matrix3<f64>, p: &na::Vector2<f64>) -> na::Vector2<f64> {
    let q = t * p.push(1.0);
    na::Vector2::new(q.x / q.z, q.y / q.z)
}

/// Triangulates `track` from every posed camera observing it in `graph`, in the frame
/// defined by `precond`. `None` when fewer than `min_views` cameras see it or the result
/// is not finite or at infinity.
fn triangulate_track<T: Triangulator + ?Sized>(
    graph: &TrackGraph,
    arena: &FeatureArena,
    track: TrackId,
    min_views: usize,
    precond: &na::Matrix3<f64>,
    reconstruction: &Reconstruction,
    triangulator: &T,
) -> Option<na::Vector4<f64>> {
    let (xs, ps): (Vec<_>, Vec<_>) = graph
        .features_in_track(track)
        .with_kind(FeatureKind::Point)
        .filter_map(|(image, f)| {
            let camera = reconstruction.get_camera(image)?;
            let p = arena.point(f)?;
            Some((
                apply(precond, &to_na(p.position)),
                precond * camera.projection_matrix(),
            ))
        })
        .unzip();
    if ps.len() < min_views.max(2) {
        return None;
    }
    let x = triangulator.triangulate(&xs, &ps)?;
    if x.iter().any(|v| !v.is_finite()) || x.w == 0.0 {
        return None;
    }
    Some(x)
}

/// Creates structures for the unreconstructed tracks of `image` seen by at least
/// `min_views` posed cameras. Returns the new tracks. Nothing happens when `image` has no
/// camera.
pub fn point_structure_triangulation<T: Triangulator + ?Sized>(
    graph: &TrackGraph,
    arena: &FeatureArena,
    image: ImageId,
    min_views: usize,
    reconstruction: &mut Reconstruction,
    triangulator: &T,
) -> Vec<TrackId> {
    if !reconstruction.has_camera(image) {
        trace!("image {} has no camera", image);
        return Vec::new();
    }
    let (tracks, x_image) = select_unexisting_point_structures(graph, arena, image, reconstruction);
    trace!("point structures selected: {}", tracks.len());
    let precond = isotropic_preconditioner(&x_image);
    let mut created = Vec::new();
    for track in tracks {
        if let Some(x) = triangulate_track(
            graph,
            arena,
            track,
            min_views,
            &precond,
            reconstruction,
            triangulator,
        ) {
            reconstruction.insert_track(track, PointStructure::new(x));
            created.push(track);
        }
    }
    created
}

/// Re-triangulates the reconstructed tracks of `image` from all their posed observations.
/// Returns the number of updated structures.
pub fn point_structure_retriangulation<T: Triangulator + ?Sized>(
    graph: &TrackGraph,
    arena: &FeatureArena,
    image: ImageId,
    reconstruction: &mut Reconstruction,
    triangulator: &T,
) -> usize {
    if !reconstruction.has_camera(image) {
        return 0;
    }
    let (tracks, x_image) = select_existing_point_structures(graph, arena, image, reconstruction);
    let precond = isotropic_preconditioner(&x_image);
    let mut updated = 0;
    for track in tracks {
        let x = triangulate_track(graph, arena, track, 2, &precond, reconstruction, triangulator);
        if let (Some(x), Some(s)) = (x, reconstruction.get_structure_mut(track)) {
            s.coords = x;
            updated += 1;
        }
    }
    updated
}

/// Observations in `graph` whose image has a camera and whose track has a structure.
pub fn observations(
    graph: &TrackGraph,
    arena: &FeatureArena,
    reconstruction: &Reconstruction,
) -> Vec<Observation> {
    graph
        .edges()
        .filter(|(image, track, f)| {
            f.is(FeatureKind::Point)
                && reconstruction.has_camera(*image)
                && reconstruction.has_structure(*track)
        })
        .filter_map(|(image, track, f)| {
            arena.point(f).map(|p| Observation {
                image,
                track,
                point: to_na(p.position),
            })
        })
        .collect()
}

/// Root mean square reprojection error of `observations`, ignoring points that project
/// to infinity. 0 when nothing can be measured.
pub fn rms_reprojection_error(reconstruction: &Reconstruction, observations: &[Observation]) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for o in observations {
        let (Some(camera), Some(s)) = (
            reconstruction.get_camera(o.image),
            reconstruction.get_structure(o.track),
        ) else {
            continue;
        };
        if let Some(x) = camera.project(&s.coords) {
            sum += (x - o.point).norm_squared();
            n += 1;
        }
    }
    if n == 0 { 0.0 } else { (sum / n as f64).sqrt() }
}
