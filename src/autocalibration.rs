//! Linear autocalibration of a projective reconstruction.
//!
//! Every camera contributes weighted linear constraints on the dual absolute quadric `Q`
//! assuming a reasonable focal length, unit aspect ratio, zero skew and a principal point
//! near the image centre (Pollefeys et al., "Visual modeling with a hand-held camera",
//! IJCV 2004, eq. 26). Decomposing `Q = H diag(1, 1, 1, 0) H^T` gives the rectifying
//! transform `H` that takes the projective frame to a metric one.

use log::{debug, warn};
use nalgebra as na;

use crate::camera::{Camera, PinholeCamera, krt_from_projection};
use crate::error::{Result, SfmError};
use crate::reconstruction::Reconstruction;

type Vector10 = na::SVector<f64, 10>;

/// Entries of the symmetric `Q` in the order of its 10-vector parametrisation.
const QUADRIC_ENTRIES: [(usize, usize); 10] = [
    (0, 0),
    (0, 1),
    (0, 2),
    (0, 3),
    (1, 1),
    (1, 2),
    (1, 3),
    (2, 2),
    (2, 3),
    (3, 3),
];

/// Coefficients of `(P Q P^T)[i, j]` as a linear form in the entries of `Q`.
fn omega_coefficients(p: &na::Matrix3x4<f64>, i: usize, j: usize) -> Vector10 {
    let mut w = Vector10::zeros();
    for (k, &(a, b)) in QUADRIC_ENTRIES.iter().enumerate() {
        w[k] = if a == b {
            p[(i, a)] * p[(j, a)]
        } else {
            p[(i, a)] * p[(j, b)] + p[(i, b)] * p[(j, a)]
        };
    }
    w
}

fn quadric_from_vector(q: &Vector10) -> na::Matrix4<f64> {
    let mut m = na::Matrix4::zeros();
    for (k, &(a, b)) in QUADRIC_ENTRIES.iter().enumerate() {
        m[(a, b)] = q[k];
        m[(b, a)] = q[k];
    }
    m
}

/// Image normalisation used before adding constraints.
fn normalization(width: f64, height: f64) -> na::Matrix3<f64> {
    na::Matrix3::new(
        width + height,
        0.0,
        (width - 1.0) / 2.0,
        0.0,
        width + height,
        (height - 1.0) / 2.0,
        0.0,
        0.0,
        1.0,
    )
}

#[derive(Debug, Clone, Default)]
pub struct AutoCalibrationLinear {
    projections: Vec<na::Matrix3x4<f64>>,
    constraints: Vec<Vector10>,
}

impl AutoCalibrationLinear {
    pub fn new() -> AutoCalibrationLinear {
        AutoCalibrationLinear::default()
    }

    /// Adds a camera seen at `width` x `height` pixels. Returns its index.
    pub fn add_projection(&mut self, p: &na::Matrix3x4<f64>, width: f64, height: f64) -> Result<usize> {
        let t_inv = normalization(width, height).try_inverse().ok_or_else(|| {
            SfmError::InvalidInput(format!("invalid image size {} x {}", width, height))
        })?;
        let p = t_inv * p;
        let nu = 1.0;
        let w11 = omega_coefficients(&p, 0, 0);
        let w22 = omega_coefficients(&p, 1, 1);
        let w33 = omega_coefficients(&p, 2, 2);
        // focal length not extreme
        self.constraints.push((w11 - w33) / 9.0 / nu);
        self.constraints.push((w22 - w33) / 9.0 / nu);
        // aspect ratio near 1
        self.constraints.push((w11 - w22) / 0.2 / nu);
        // no skew, principal point near the centre
        self.constraints.push(omega_coefficients(&p, 0, 1) / 0.01 / nu);
        self.constraints.push(omega_coefficients(&p, 0, 2) / 0.1 / nu);
        self.constraints.push(omega_coefficients(&p, 1, 2) / 0.1 / nu);
        self.projections.push(p);
        Ok(self.projections.len() - 1)
    }

    pub fn num_projections(&self) -> usize {
        self.projections.len()
    }

    /// Dual absolute quadric as the least-squares null vector of the constraints.
    pub fn absolute_quadric(&self) -> Result<na::Matrix4<f64>> {
        if self.projections.len() < 2 {
            return Err(SfmError::insufficient(
                "autocalibration",
                2,
                self.projections.len(),
            ));
        }
        let rows = self.constraints.len().max(10);
        let mut a = na::DMatrix::<f64>::zeros(rows, 10);
        for (r, c) in self.constraints.iter().enumerate() {
            a.set_row(r, &c.transpose());
        }
        let svd = a.svd(false, true);
        let v_t = svd
            .v_t
            .ok_or_else(|| SfmError::GeometricDegeneracy("quadric svd failed".into()))?;
        let (min_idx, _) = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))
            .ok_or_else(|| SfmError::GeometricDegeneracy("no singular values".into()))?;
        let q = Vector10::from_iterator(v_t.row(min_idx).iter().copied());
        Ok(quadric_from_vector(&q))
    }

    /// Rectifying transform `H`: cameras map as `P H`, points as `H^-1 X`.
    pub fn metric_transformation(&self) -> Result<na::Matrix4<f64>> {
        let q = self.absolute_quadric()?;
        let eigen = na::SymmetricEigen::new(q);
        let mut values = eigen.eigenvalues;
        if values.sum() < 0.0 {
            values = -values;
        }
        let mut order = [0usize, 1, 2, 3];
        order.sort_by(|a, b| values[*b].total_cmp(&values[*a]));
        debug!("absolute quadric eigenvalues: {:?}", order.map(|i| values[i]));

        let mut h = na::Matrix4::zeros();
        for (col, &i) in order.iter().enumerate() {
            let scale = if col < 3 { values[i].sqrt() } else { 1.0 };
            h.set_column(col, &(eigen.eigenvectors.column(i) * scale));
        }
        if values[order[2]] <= 0.0 || h.iter().any(|v| !v.is_finite()) {
            return Err(SfmError::GeometricDegeneracy(
                "absolute quadric is not positive semi-definite of rank 3".into(),
            ));
        }
        if h.determinant().abs() < f64::EPSILON {
            return Err(SfmError::GeometricDegeneracy("singular rectifying transform".into()));
        }
        Ok(h)
    }
}

/// Recovers `K` from the image of the absolute conic `w = (K K^T)^-1`, positive diagonal.
pub fn k_from_absolute_conic(w: &na::Matrix3<f64>) -> Option<na::Matrix3<f64>> {
    let dual = w.try_inverse()?;
    // upper triangular Cholesky through index flipping
    let flipped = na::Matrix3::from_fn(|i, j| dual[(2 - i, 2 - j)]);
    let l = flipped.cholesky()?.l();
    let mut k = na::Matrix3::from_fn(|i, j| l[(2 - i, 2 - j)]);
    for j in 0..3 {
        if k[(j, j)] < 0.0 {
            let col = -k.column(j);
            k.set_column(j, &col);
        }
    }
    Some(k)
}

/// Upgrades a projective segment in place. Cameras without an image size use
/// `default_size`. The segment is left untouched on error.
pub fn upgrade_to_metric(
    reconstruction: &mut Reconstruction,
    default_size: (u32, u32),
) -> Result<na::Matrix4<f64>> {
    let mut calibration = AutoCalibrationLinear::new();
    for (_, camera) in reconstruction.cameras() {
        let (w, h) = camera.image_size().unwrap_or(default_size);
        calibration.add_projection(&camera.projection_matrix(), w as f64, h as f64)?;
    }
    let h = calibration.metric_transformation()?;
    let h_inv = h
        .try_inverse()
        .ok_or_else(|| SfmError::GeometricDegeneracy("rectifying transform not invertible".into()))?;

    let mut cameras = Vec::with_capacity(reconstruction.num_cameras());
    for (image, camera) in reconstruction.cameras() {
        let p = camera.projection_matrix() * h;
        let (k, r, t) = krt_from_projection(&p).ok_or_else(|| {
            SfmError::GeometricDegeneracy(format!("camera {} cannot be decomposed", image))
        })?;
        let mut pinhole = PinholeCamera::new(k, r, t);
        pinhole.image_size = camera.image_size();
        cameras.push((image, pinhole));
    }
    for (image, camera) in cameras {
        reconstruction.insert_camera(image, Camera::Pinhole(camera));
    }
    let mut at_infinity = 0;
    for (_, s) in reconstruction.structures_mut() {
        s.coords = h_inv * s.coords;
        if s.coords.w.abs() < f64::EPSILON {
            at_infinity += 1;
        }
    }
    if at_infinity > 0 {
        warn!("{} structures at infinity after metric upgrade", at_infinity);
    }
    reconstruction.set_metric(true);
    Ok(h)
}
