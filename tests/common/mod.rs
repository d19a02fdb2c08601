#![allow(dead_code)]

use std::cell::{Cell, RefCell};

use incremental_sfm::camera::{PinholeCamera, intrinsics_from_focal};
use incremental_sfm::feature::{FeatureArena, Keypoint, KeypointSet};
use incremental_sfm::mapping::{isotropic_preconditioner, rms_reprojection_error};
use incremental_sfm::reconstruction::Reconstruction;
use incremental_sfm::sequence::ImageSequence;
use incremental_sfm::solvers::{
    BundleAdjuster, DltTriangulator, EuclideanPose, FundamentalEstimate, Observation,
    ProjectivePose, RefinementKind, RelativeMotion, ResectionSolver, Triangulator, TwoViewSolver,
};
use incremental_sfm::track_graph::TrackGraph;
use incremental_sfm::{ImageId, TrackId};
use nalgebra as na;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;
pub const FOCAL: f64 = 500.0;

pub fn intrinsics() -> na::Matrix3<f64> {
    intrinsics_from_focal(FOCAL, WIDTH as f64 / 2.0 - 0.5, HEIGHT as f64 / 2.0 - 0.5)
}

/// Keypoints with the given 2D descriptors, features at the descriptor position.
pub fn keypoints_2d(arena: &mut FeatureArena, descriptors: &[(f32, f32)]) -> KeypointSet {
    KeypointSet::new(
        descriptors
            .iter()
            .map(|&(x, y)| Keypoint {
                feature: arena.push_point(x, y),
                descriptor: vec![x, y],
            })
            .collect(),
    )
}

pub struct Scene {
    pub arena: FeatureArena,
    pub graph: TrackGraph,
    pub sequence: ImageSequence,
    pub k: na::Matrix3<f64>,
    pub cameras: Vec<PinholeCamera>,
    pub points: Vec<na::Vector3<f64>>,
}

/// Camera moving sideways along a corridor of points.
///
/// Points come in groups of `points_per_step`, group `c` placed in front of camera `c`.
/// Image `i` observes the groups `c` with `|i - c| <= window`, so images far apart share
/// no track.
pub fn corridor_scene(num_images: usize, window: usize, points_per_step: usize, seed: u64) -> Scene {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let k = intrinsics();
    let cameras: Vec<_> = (0..num_images)
        .map(|i| {
            let r = na::Rotation3::from_euler_angles(0.01 * i as f64, 0.02 * i as f64, 0.0)
                .into_inner();
            let center = na::Vector3::new(0.5 * i as f64, 0.0, 0.0);
            PinholeCamera::new(k, r, -r * center).with_image_size(WIDTH, HEIGHT)
        })
        .collect();
    let mut points = Vec::new();
    let mut groups = Vec::new();
    for c in 0..num_images {
        for _ in 0..points_per_step {
            points.push(na::Vector3::new(
                0.5 * c as f64 + rng.random_range(-0.5..0.5),
                rng.random_range(-1.0..1.0),
                rng.random_range(4.0..8.0),
            ));
            groups.push(c);
        }
    }

    let mut arena = FeatureArena::new();
    let mut graph = TrackGraph::new();
    for (i, camera) in cameras.iter().enumerate() {
        for (track, (p, group)) in points.iter().zip(&groups).enumerate() {
            if i.abs_diff(*group) > window {
                continue;
            }
            let x = camera.projection_matrix() * p.push(1.0);
            let f = arena.push_point((x.x / x.z) as f32, (x.y / x.z) as f32);
            graph.insert(i as ImageId, track as TrackId, f);
        }
    }
    let sequence = ImageSequence::new((0..num_images as ImageId).collect()).unwrap();
    Scene {
        arena,
        graph,
        sequence,
        k,
        cameras,
        points,
    }
}

fn null_vector(a: na::DMatrix<f64>) -> Option<na::DVector<f64>> {
    let cols = a.ncols();
    // thin svd needs at least as many rows as columns
    let a = if a.nrows() < cols {
        a.resize_vertically(cols, 0.0)
    } else {
        a
    };
    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    Some(v_t.row(min_idx).transpose())
}

fn apply(t: &na::Matrix3<f64>, p: &na::Vector2<f64>) -> na::Vector2<f64> {
    let q = t * p.push(1.0);
    q.xy() / q.z
}

fn eight_point(x1: &[na::Vector2<f64>], x2: &[na::Vector2<f64>]) -> Option<na::Matrix3<f64>> {
    if x1.len() < 8 || x1.len() != x2.len() {
        return None;
    }
    let t1 = isotropic_preconditioner(x1);
    let t2 = isotropic_preconditioner(x2);
    let mut a = na::DMatrix::zeros(x1.len(), 9);
    for (r, (p1, p2)) in x1.iter().zip(x2).enumerate() {
        let p1 = apply(&t1, p1).push(1.0);
        let p2 = apply(&t2, p2).push(1.0);
        for i in 0..3 {
            for j in 0..3 {
                a[(r, 3 * i + j)] = p2[i] * p1[j];
            }
        }
    }
    let f = null_vector(a)?;
    let f = na::Matrix3::from_row_slice(f.as_slice());
    let mut svd = f.svd(true, true);
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    svd.singular_values[min_idx] = 0.0;
    let f = svd.recompose().ok()?;
    Some(t2.transpose() * f * t1)
}

fn epipolar_distance(f: &na::Matrix3<f64>, x1: &na::Vector2<f64>, x2: &na::Vector2<f64>) -> f64 {
    let l = f * x1.push(1.0);
    (x2.push(1.0).dot(&l)).abs() / (l.x * l.x + l.y * l.y).sqrt()
}

fn projection_dlt(x: &[na::Vector2<f64>], points: &[na::Vector4<f64>]) -> Option<na::Matrix3x4<f64>> {
    if x.len() < 6 || x.len() != points.len() {
        return None;
    }
    let t = isotropic_preconditioner(x);
    let mut a = na::DMatrix::zeros(2 * x.len(), 12);
    for (i, (p, w)) in x.iter().zip(points).enumerate() {
        let p = apply(&t, p);
        let w = w.normalize();
        for j in 0..4 {
            a[(2 * i, j)] = w[j];
            a[(2 * i, 8 + j)] = -p.x * w[j];
            a[(2 * i + 1, 4 + j)] = w[j];
            a[(2 * i + 1, 8 + j)] = -p.y * w[j];
        }
    }
    let v = null_vector(a)?;
    let p = na::Matrix3x4::from_row_slice(v.as_slice());
    Some(t.try_inverse()? * p)
}

fn reprojection_inliers(
    p: &na::Matrix3x4<f64>,
    x: &[na::Vector2<f64>],
    points: &[na::Vector4<f64>],
    max_error: f64,
) -> Vec<usize> {
    x.iter()
        .zip(points)
        .enumerate()
        .filter(|(_, (x, w))| {
            let q = p * *w;
            q.z.abs() > f64::EPSILON && (q.xy() / q.z - *x).norm() < max_error
        })
        .map(|(i, _)| i)
        .collect()
}

/// Linear solvers that are exact on noise free data, and a bundle adjuster that only
/// measures.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearSolver;

impl TwoViewSolver for LinearSolver {
    fn estimate_fundamental(
        &self,
        x1: &[na::Vector2<f64>],
        x2: &[na::Vector2<f64>],
        max_error: f64,
        _outlier_probability: f64,
    ) -> Option<FundamentalEstimate> {
        let fundamental = eight_point(x1, x2)?;
        let inliers = x1
            .iter()
            .zip(x2)
            .enumerate()
            .filter(|(_, (a, b))| epipolar_distance(&fundamental, a, b) < max_error)
            .map(|(i, _)| i)
            .collect();
        Some(FundamentalEstimate {
            fundamental,
            inliers,
        })
    }

    fn motion_from_essential(
        &self,
        essential: &na::Matrix3<f64>,
        k1: &na::Matrix3<f64>,
        x1: &na::Vector2<f64>,
        k2: &na::Matrix3<f64>,
        x2: &na::Vector2<f64>,
    ) -> Option<RelativeMotion> {
        let svd = essential.svd(true, true);
        let mut u = svd.u?;
        let mut v_t = svd.v_t?;
        if u.determinant() < 0.0 {
            u = -u;
        }
        if v_t.determinant() < 0.0 {
            v_t = -v_t;
        }
        let w = na::Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let t: na::Vector3<f64> = u.column(2).into_owned();
        let n1 = apply(&k1.try_inverse()?, x1);
        let n2 = apply(&k2.try_inverse()?, x2);
        let p1 = na::Matrix3x4::identity();
        for r in [u * w * v_t, u * w.transpose() * v_t] {
            for t in [t, -t] {
                let mut p2 = na::Matrix3x4::zeros();
                p2.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
                p2.set_column(3, &t);
                let Some(x) = DltTriangulator.triangulate(&[n1, n2], &[p1, p2]) else {
                    continue;
                };
                if x.w.abs() < f64::EPSILON {
                    continue;
                }
                let x = x.xyz() / x.w;
                if x.z > 0.0 && (r * x + t).z > 0.0 {
                    return Some(RelativeMotion {
                        rotation: r,
                        translation: t,
                    });
                }
            }
        }
        None
    }
}

impl ResectionSolver for LinearSolver {
    fn resect_euclidean(
        &self,
        points_2d: &[na::Vector2<f64>],
        points_3d: &[na::Vector3<f64>],
        intrinsics: &na::Matrix3<f64>,
        max_error: f64,
    ) -> Option<EuclideanPose> {
        let k_inv = intrinsics.try_inverse()?;
        let normalized: Vec<_> = points_2d.iter().map(|x| apply(&k_inv, x)).collect();
        let homogeneous: Vec<_> = points_3d.iter().map(|x| x.push(1.0)).collect();
        let mut p = projection_dlt(&normalized, &homogeneous)?;
        if p.fixed_view::<3, 3>(0, 0).determinant() < 0.0 {
            p = -p;
        }
        let m: na::Matrix3<f64> = p.fixed_view::<3, 3>(0, 0).into_owned();
        let svd = m.svd(true, true);
        let rotation = svd.u? * svd.v_t?;
        let scale = svd.singular_values.mean();
        let translation: na::Vector3<f64> = p.column(3) / scale;

        let mut rt = na::Matrix3x4::zeros();
        rt.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
        rt.set_column(3, &translation);
        let inliers = reprojection_inliers(&(intrinsics * rt), points_2d, &homogeneous, max_error);
        (!inliers.is_empty()).then_some(EuclideanPose {
            rotation,
            translation,
            inliers,
        })
    }

    fn resect_projective(
        &self,
        points_2d: &[na::Vector2<f64>],
        points_3d: &[na::Vector4<f64>],
        max_error: f64,
    ) -> Option<ProjectivePose> {
        let projection = projection_dlt(points_2d, points_3d)?;
        let inliers = reprojection_inliers(&projection, points_2d, points_3d, max_error);
        (!inliers.is_empty()).then_some(ProjectivePose {
            projection,
            inliers,
        })
    }
}

impl Triangulator for LinearSolver {
    fn triangulate(
        &self,
        points: &[na::Vector2<f64>],
        projections: &[na::Matrix3x4<f64>],
    ) -> Option<na::Vector4<f64>> {
        DltTriangulator.triangulate(points, projections)
    }
}

impl BundleAdjuster for LinearSolver {
    fn refine(
        &self,
        reconstruction: &mut Reconstruction,
        observations: &[Observation],
        _kind: RefinementKind,
    ) -> f64 {
        rms_reprojection_error(reconstruction, observations)
    }
}

/// [`LinearSolver`] whose resection never finds a pose.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResection;

impl TwoViewSolver for NoResection {
    fn estimate_fundamental(
        &self,
        x1: &[na::Vector2<f64>],
        x2: &[na::Vector2<f64>],
        max_error: f64,
        outlier_probability: f64,
    ) -> Option<FundamentalEstimate> {
        LinearSolver.estimate_fundamental(x1, x2, max_error, outlier_probability)
    }

    fn motion_from_essential(
        &self,
        essential: &na::Matrix3<f64>,
        k1: &na::Matrix3<f64>,
        x1: &na::Vector2<f64>,
        k2: &na::Matrix3<f64>,
        x2: &na::Vector2<f64>,
    ) -> Option<RelativeMotion> {
        LinearSolver.motion_from_essential(essential, k1, x1, k2, x2)
    }
}

impl ResectionSolver for NoResection {
    fn resect_euclidean(
        &self,
        _: &[na::Vector2<f64>],
        _: &[na::Vector3<f64>],
        _: &na::Matrix3<f64>,
        _: f64,
    ) -> Option<EuclideanPose> {
        None
    }

    fn resect_projective(
        &self,
        _: &[na::Vector2<f64>],
        _: &[na::Vector4<f64>],
        _: f64,
    ) -> Option<ProjectivePose> {
        None
    }
}

impl Triangulator for NoResection {
    fn triangulate(
        &self,
        points: &[na::Vector2<f64>],
        projections: &[na::Matrix3x4<f64>],
    ) -> Option<na::Vector4<f64>> {
        DltTriangulator.triangulate(points, projections)
    }
}

impl BundleAdjuster for NoResection {
    fn refine(
        &self,
        reconstruction: &mut Reconstruction,
        observations: &[Observation],
        kind: RefinementKind,
    ) -> f64 {
        LinearSolver.refine(reconstruction, observations, kind)
    }
}

/// [`LinearSolver`] that records every refinement pass it is asked for.
#[derive(Debug, Default)]
pub struct RefinementLog {
    pub calls: Cell<usize>,
    pub kinds: RefCell<Vec<RefinementKind>>,
}

impl RefinementLog {
    pub fn count(&self, kind: RefinementKind) -> usize {
        self.kinds.borrow().iter().filter(|k| **k == kind).count()
    }

    pub fn last(&self) -> Option<RefinementKind> {
        self.kinds.borrow().last().copied()
    }
}

impl TwoViewSolver for RefinementLog {
    fn estimate_fundamental(
        &self,
        x1: &[na::Vector2<f64>],
        x2: &[na::Vector2<f64>],
        max_error: f64,
        outlier_probability: f64,
    ) -> Option<FundamentalEstimate> {
        LinearSolver.estimate_fundamental(x1, x2, max_error, outlier_probability)
    }

    fn motion_from_essential(
        &self,
        essential: &na::Matrix3<f64>,
        k1: &na::Matrix3<f64>,
        x1: &na::Vector2<f64>,
        k2: &na::Matrix3<f64>,
        x2: &na::Vector2<f64>,
    ) -> Option<RelativeMotion> {
        LinearSolver.motion_from_essential(essential, k1, x1, k2, x2)
    }
}

impl ResectionSolver for RefinementLog {
    fn resect_euclidean(
        &self,
        points_2d: &[na::Vector2<f64>],
        points_3d: &[na::Vector3<f64>],
        intrinsics: &na::Matrix3<f64>,
        max_error: f64,
    ) -> Option<EuclideanPose> {
        LinearSolver.resect_euclidean(points_2d, points_3d, intrinsics, max_error)
    }

    fn resect_projective(
        &self,
        points_2d: &[na::Vector2<f64>],
        points_3d: &[na::Vector4<f64>],
        max_error: f64,
    ) -> Option<ProjectivePose> {
        LinearSolver.resect_projective(points_2d, points_3d, max_error)
    }
}

impl Triangulator for RefinementLog {
    fn triangulate(
        &self,
        points: &[na::Vector2<f64>],
        projections: &[na::Matrix3x4<f64>],
    ) -> Option<na::Vector4<f64>> {
        DltTriangulator.triangulate(points, projections)
    }
}

impl BundleAdjuster for RefinementLog {
    fn refine(
        &self,
        reconstruction: &mut Reconstruction,
        observations: &[Observation],
        kind: RefinementKind,
    ) -> f64 {
        self.calls.set(self.calls.get() + 1);
        self.kinds.borrow_mut().push(kind);
        LinearSolver.refine(reconstruction, observations, kind)
    }
}
