use nalgebra as na;
use serde::{Deserialize, Serialize};

/// Calibrated camera: `x = K [R | t] X`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinholeCamera {
    pub intrinsics: na::Matrix3<f64>,
    pub rotation: na::Matrix3<f64>,
    pub translation: na::Vector3<f64>,
    pub image_size: Option<(u32, u32)>,
}

/// Uncalibrated camera known only up to a projective transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectiveCamera {
    pub projection: na::Matrix3x4<f64>,
    pub image_size: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Camera {
    Pinhole(PinholeCamera),
    Projective(ProjectiveCamera),
}

impl PinholeCamera {
    pub fn new(
        intrinsics: na::Matrix3<f64>,
        rotation: na::Matrix3<f64>,
        translation: na::Vector3<f64>,
    ) -> PinholeCamera {
        PinholeCamera {
            intrinsics,
            rotation,
            translation,
            image_size: None,
        }
    }

    /// Camera at the world origin looking down +z.
    pub fn at_origin(intrinsics: na::Matrix3<f64>) -> PinholeCamera {
        PinholeCamera::new(intrinsics, na::Matrix3::identity(), na::Vector3::zeros())
    }

    pub fn with_image_size(mut self, width: u32, height: u32) -> Self {
        self.image_size = Some((width, height));
        self
    }

    pub fn projection_matrix(&self) -> na::Matrix3x4<f64> {
        let mut rt = na::Matrix3x4::zeros();
        rt.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        rt.set_column(3, &self.translation);
        self.intrinsics * rt
    }

    /// Optical centre in world coordinates, `-R^T t`.
    pub fn center(&self) -> na::Vector3<f64> {
        -(self.rotation.transpose() * self.translation)
    }

    pub fn focal(&self) -> f64 {
        self.intrinsics[(0, 0)]
    }
}

impl ProjectiveCamera {
    pub fn new(projection: na::Matrix3x4<f64>) -> ProjectiveCamera {
        ProjectiveCamera {
            projection,
            image_size: None,
        }
    }

    /// Camera centre as the right null vector of `P`, `None` at infinity.
    pub fn center(&self) -> Option<na::Vector3<f64>> {
        let p: na::Matrix4<f64> = self.projection.insert_row(3, 0.0);
        let svd = p.svd(false, true);
        let v_t = svd.v_t?;
        let (min_idx, _) = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))?;
        let c = v_t.row(min_idx).transpose();
        homogeneous_to_euclidean(&c)
    }
}

impl Camera {
    pub fn projection_matrix(&self) -> na::Matrix3x4<f64> {
        match self {
            Camera::Pinhole(c) => c.projection_matrix(),
            Camera::Projective(c) => c.projection,
        }
    }

    pub fn is_calibrated(&self) -> bool {
        matches!(self, Camera::Pinhole(_))
    }

    pub fn image_size(&self) -> Option<(u32, u32)> {
        match self {
            Camera::Pinhole(c) => c.image_size,
            Camera::Projective(c) => c.image_size,
        }
    }

    pub fn as_pinhole(&self) -> Option<&PinholeCamera> {
        match self {
            Camera::Pinhole(c) => Some(c),
            Camera::Projective(_) => None,
        }
    }

    pub fn center(&self) -> Option<na::Vector3<f64>> {
        match self {
            Camera::Pinhole(c) => Some(c.center()),
            Camera::Projective(c) => c.center(),
        }
    }

    /// Pixel position of a homogeneous point, `None` when it projects to infinity.
    pub fn project(&self, point: &na::Vector4<f64>) -> Option<na::Vector2<f64>> {
        let x = self.projection_matrix() * point;
        if x.z.abs() < f64::EPSILON {
            None
        } else {
            Some(na::Vector2::new(x.x / x.z, x.y / x.z))
        }
    }
}

impl From<PinholeCamera> for Camera {
    fn from(c: PinholeCamera) -> Self {
        Camera::Pinhole(c)
    }
}

impl From<ProjectiveCamera> for Camera {
    fn from(c: ProjectiveCamera) -> Self {
        Camera::Projective(c)
    }
}

pub fn homogeneous_to_euclidean(x: &na::Vector4<f64>) -> Option<na::Vector3<f64>> {
    if x.w.abs() < 1e-12 {
        None
    } else {
        Some(x.xyz() / x.w)
    }
}

pub fn intrinsics_from_focal(focal: f64, cx: f64, cy: f64) -> na::Matrix3<f64> {
    na::Matrix3::new(focal, 0.0, cx, 0.0, focal, cy, 0.0, 0.0, 1.0)
}

/// Absolute pose of a second camera from the first camera's pose and the relative motion
/// `x2 = dR x1 + dt` between their camera frames.
pub fn compose_relative_motion(
    rotation: &na::Matrix3<f64>,
    translation: &na::Vector3<f64>,
    relative_rotation: &na::Matrix3<f64>,
    relative_translation: &na::Vector3<f64>,
) -> (na::Matrix3<f64>, na::Vector3<f64>) {
    (
        relative_rotation * rotation,
        relative_rotation * translation + relative_translation,
    )
}

pub fn cross_product_matrix(v: &na::Vector3<f64>) -> na::Matrix3<f64> {
    na::Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Canonical camera pair of a fundamental matrix: `P1 = [I | 0]`, `P2 = [[e']x F | e']` with
/// `e'` the epipole in the second image (`F^T e' = 0`).
pub fn projections_from_fundamental(
    fundamental: &na::Matrix3<f64>,
) -> Option<(na::Matrix3x4<f64>, na::Matrix3x4<f64>)> {
    let svd = fundamental.transpose().svd(false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let epipole: na::Vector3<f64> = v_t.row(min_idx).transpose();

    let mut p1 = na::Matrix3x4::zeros();
    p1.fixed_view_mut::<3, 3>(0, 0).copy_from(&na::Matrix3::identity());
    let mut p2 = na::Matrix3x4::zeros();
    p2.fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&(cross_product_matrix(&epipole) * fundamental));
    p2.set_column(3, &epipole);
    Some((p1, p2))
}

/// Splits `P = s K [R | t]` into an upper triangular `K` with positive diagonal and
/// `K[2,2] = 1`, a rotation `R` and a translation `t`.
pub fn krt_from_projection(
    projection: &na::Matrix3x4<f64>,
) -> Option<(na::Matrix3<f64>, na::Matrix3<f64>, na::Vector3<f64>)> {
    let mut p = *projection;
    let m: na::Matrix3<f64> = p.fixed_view::<3, 3>(0, 0).into_owned();
    if m.determinant() < 0.0 {
        p = -p;
    }
    let m: na::Matrix3<f64> = p.fixed_view::<3, 3>(0, 0).into_owned();

    // RQ through QR of the row-flipped transpose.
    let flip = na::Matrix3::new(0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0);
    let qr = (flip * m).transpose().qr();
    let mut k = flip * qr.r().transpose() * flip;
    let mut r = flip * qr.q().transpose();

    for i in 0..3 {
        if k[(i, i)] < 0.0 {
            let col = -k.column(i);
            k.set_column(i, &col);
            let row = -r.row(i);
            r.set_row(i, &row);
        }
    }
    let t = k.try_inverse()? * p.column(3);
    let scale = k[(2, 2)];
    if !scale.is_finite() || scale.abs() < f64::EPSILON {
        return None;
    }
    Some((k / scale, r, t))
}
