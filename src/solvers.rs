//! Contracts of the geometric solvers the reconstruction is driven with.
//!
//! Robust estimation, resection and bundle adjustment are provided by the caller. Only a
//! plain linear triangulator ships with the crate.

use nalgebra as na;

use crate::reconstruction::Reconstruction;
use crate::{ImageId, TrackId};

/// 2D observation of a track in an image, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub image: ImageId,
    pub track: TrackId,
    pub point: na::Vector2<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FundamentalEstimate {
    pub fundamental: na::Matrix3<f64>,
    /// Indices into the correspondence arrays that agree with `fundamental`.
    pub inliers: Vec<usize>,
}

/// Motion from camera 1 to camera 2: `X2 = rotation * X1 + translation`.
#[derive(Debug, Clone, PartialEq)]
pub struct RelativeMotion {
    pub rotation: na::Matrix3<f64>,
    pub translation: na::Vector3<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EuclideanPose {
    pub rotation: na::Matrix3<f64>,
    pub translation: na::Vector3<f64>,
    pub inliers: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectivePose {
    pub projection: na::Matrix3x4<f64>,
    pub inliers: Vec<usize>,
}

/// What a refinement pass may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementKind {
    /// Calibrated cameras and structures.
    MotionAndStructure,
    /// Projective cameras and structures.
    Projective,
    /// Cameras including their intrinsics, after a metric upgrade.
    Metric,
}

pub trait TwoViewSolver {
    /// Robust fundamental matrix from pixel correspondences. `None` when no model is found.
    fn estimate_fundamental(
        &self,
        x1: &[na::Vector2<f64>],
        x2: &[na::Vector2<f64>],
        max_error: f64,
        outlier_probability: f64,
    ) -> Option<FundamentalEstimate>;

    fn essential_from_fundamental(
        &self,
        fundamental: &na::Matrix3<f64>,
        k1: &na::Matrix3<f64>,
        k2: &na::Matrix3<f64>,
    ) -> na::Matrix3<f64> {
        k2.transpose() * fundamental * k1
    }

    /// Picks the decomposition of `essential` that puts the given correspondence in front of
    /// both cameras.
    fn motion_from_essential(
        &self,
        essential: &na::Matrix3<f64>,
        k1: &na::Matrix3<f64>,
        x1: &na::Vector2<f64>,
        k2: &na::Matrix3<f64>,
        x2: &na::Vector2<f64>,
    ) -> Option<RelativeMotion>;
}

pub trait ResectionSolver {
    fn resect_euclidean(
        &self,
        points_2d: &[na::Vector2<f64>],
        points_3d: &[na::Vector3<f64>],
        intrinsics: &na::Matrix3<f64>,
        max_error: f64,
    ) -> Option<EuclideanPose>;

    fn resect_projective(
        &self,
        points_2d: &[na::Vector2<f64>],
        points_3d: &[na::Vector4<f64>],
        max_error: f64,
    ) -> Option<ProjectivePose>;
}

pub trait Triangulator {
    /// Homogeneous point seen at `points[i]` through `projections[i]`.
    fn triangulate(
        &self,
        points: &[na::Vector2<f64>],
        projections: &[na::Matrix3x4<f64>],
    ) -> Option<na::Vector4<f64>>;
}

pub trait BundleAdjuster {
    /// Refines the segment in place and returns the final RMS reprojection error.
    fn refine(
        &self,
        reconstruction: &mut Reconstruction,
        observations: &[Observation],
        kind: RefinementKind,
    ) -> f64;
}

/// Everything the reconstruction controller needs.
pub trait GeometrySolver: TwoViewSolver + ResectionSolver + Triangulator + BundleAdjuster {}

impl<T: TwoViewSolver + ResectionSolver + Triangulator + BundleAdjuster> GeometrySolver for T {}

/// Linear N-view triangulation (DLT): the null vector of the stacked
/// `x P[2] - P[0]`, `y P[2] - P[1]` rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct DltTriangulator;

impl Triangulator for DltTriangulator {
    fn triangulate(
        &self,
        points: &[na::Vector2<f64>],
        projections: &[na::Matrix3x4<f64>],
    ) -> Option<na::Vector4<f64>> {
        if points.len() < 2 || points.len() != projections.len() {
            return None;
        }
        let mut a = na::DMatrix::<f64>::zeros(2 * points.len(), 4);
        for (i, (x, p)) in points.iter().zip(projections).enumerate() {
            for j in 0..4 {
                a[(2 * i, j)] = x.x * p[(2, j)] - p[(0, j)];
                a[(2 * i + 1, j)] = x.y * p[(2, j)] - p[(1, j)];
            }
        }
        let svd = a.svd(false, true);
        let v_t = svd.v_t?;
        let (min_idx, _) = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))?;
        let x = na::Vector4::new(
            v_t[(min_idx, 0)],
            v_t[(min_idx, 1)],
            v_t[(min_idx, 2)],
            v_t[(min_idx, 3)],
        );
        x.iter().all(|v| v.is_finite()).then_some(x)
    }
}
