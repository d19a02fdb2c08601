//! Incremental reconstruction of image sequences: two-view initialisation, resection of
//! further keyframes, segment restart on tracking loss, backfill of the remaining images
//! and, without known intrinsics, a final metric upgrade.

use log::{debug, info, trace, warn};
use nalgebra as na;
use serde::Serialize;

use crate::autocalibration::upgrade_to_metric;
use crate::camera::{
    Camera, PinholeCamera, ProjectiveCamera, compose_relative_motion, intrinsics_from_focal,
    projections_from_fundamental,
};
use crate::config::{KeyframeConfig, ReconstructionConfig};
use crate::error::{Result, SfmError};
use crate::feature::FeatureArena;
use crate::keyframes::select_keyframes;
use crate::mapping;
use crate::reconstruction::Reconstruction;
use crate::sequence::ImageSequence;
use crate::solvers::{FundamentalEstimate, GeometrySolver, RefinementKind};
use crate::track_graph::TrackGraph;
use crate::{ImageId, TrackId};

pub const MIN_TWO_VIEW_CORRESPONDENCES: usize = 7;
pub const MIN_CALIBRATED_RESECTION_POINTS: usize = 5;
pub const MIN_PROJECTIVE_RESECTION_POINTS: usize = 6;

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationMode {
    /// Every image shares these intrinsics.
    Calibrated(na::Matrix3<f64>),
    /// Projective reconstruction followed by a metric upgrade.
    Uncalibrated,
}

impl CalibrationMode {
    /// Square pixels with the principal point at the image centre.
    pub fn from_focal(focal: f64, width: u32, height: u32) -> CalibrationMode {
        let cu = width as f64 / 2.0 - 0.5;
        let cv = height as f64 / 2.0 - 0.5;
        CalibrationMode::Calibrated(intrinsics_from_focal(focal, cu, cv))
    }

    pub fn from_config(config: &ReconstructionConfig) -> CalibrationMode {
        match config.focal {
            Some(f) => CalibrationMode::from_focal(f, config.image_width, config.image_height),
            None => CalibrationMode::Uncalibrated,
        }
    }

    fn refinement(&self, reconstruction: &Reconstruction) -> RefinementKind {
        match self {
            CalibrationMode::Calibrated(_) => RefinementKind::MotionAndStructure,
            CalibrationMode::Uncalibrated if reconstruction.is_metric() => RefinementKind::Metric,
            CalibrationMode::Uncalibrated => RefinementKind::Projective,
        }
    }
}

/// Outcome of localizing the non-keyframe images.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub localized: Vec<ImageId>,
    pub failed: Vec<ImageId>,
}

#[derive(Debug, Clone, Default)]
pub struct VideoReconstruction {
    pub keyframes: Vec<ImageId>,
    pub segments: Vec<Reconstruction>,
    pub backfill: BackfillReport,
}

pub struct ReconstructionController<'a, S: GeometrySolver + ?Sized> {
    graph: &'a TrackGraph,
    arena: &'a FeatureArena,
    solver: &'a S,
    config: ReconstructionConfig,
}

impl<'a, S: GeometrySolver + ?Sized> ReconstructionController<'a, S> {
    pub fn new(
        graph: &'a TrackGraph,
        arena: &'a FeatureArena,
        solver: &'a S,
        config: ReconstructionConfig,
    ) -> Self {
        ReconstructionController {
            graph,
            arena,
            solver,
            config,
        }
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    fn image_size(&self) -> (u32, u32) {
        (self.config.image_width, self.config.image_height)
    }

    /// Runs bundle adjustment over the observations recorded in the segment.
    fn refine(&self, reconstruction: &mut Reconstruction, kind: RefinementKind) -> f64 {
        let observations = mapping::observations(reconstruction.matches(), self.arena, reconstruction);
        debug!(" -- Bundle adjustment ({:?}, {} observations) -- ", kind, observations.len());
        let rms = self.solver.refine(reconstruction, &observations, kind);
        debug!("rms after refinement: {:.5} px", rms);
        rms
    }

    /// Common point tracks of the pair, robust fundamental matrix and the inlier graph.
    fn two_view_inliers(
        &self,
        image1: ImageId,
        image2: ImageId,
    ) -> Result<(FundamentalEstimate, Vec<na::Vector2<f64>>, Vec<na::Vector2<f64>>, TrackGraph)> {
        if image1 == image2 {
            return Err(SfmError::InvalidInput(format!(
                "two-view initialization needs two different images, got {} twice",
                image1
            )));
        }
        let (tracks, xs) = self.graph.point_match_matrices(&[image1, image2], self.arena);
        if tracks.len() < MIN_TWO_VIEW_CORRESPONDENCES {
            return Err(SfmError::insufficient(
                "two-view initialization",
                MIN_TWO_VIEW_CORRESPONDENCES,
                tracks.len(),
            ));
        }
        let x1: Vec<_> = xs[0].iter().map(|p| mapping::to_na(*p)).collect();
        let x2: Vec<_> = xs[1].iter().map(|p| mapping::to_na(*p)).collect();
        let estimate = self
            .solver
            .estimate_fundamental(
                &x1,
                &x2,
                self.config.epipolar_threshold,
                self.config.outlier_probability,
            )
            .filter(|e| !e.inliers.is_empty())
            .ok_or_else(|| {
                SfmError::GeometricDegeneracy(format!(
                    "no fundamental matrix between {} and {}",
                    image1, image2
                ))
            })?;

        let mut pair = TrackGraph::new();
        for track in estimate.inliers.iter().filter_map(|i| tracks.get(*i)) {
            for image in [image1, image2] {
                if let Some(f) = self.graph.get(image, *track) {
                    pair.insert(image, *track, f);
                }
            }
        }
        let (x1, x2): (Vec<_>, Vec<_>) = estimate
            .inliers
            .iter()
            .filter_map(|i| Some((*x1.get(*i)?, *x2.get(*i)?)))
            .unzip();
        Ok((estimate, x1, x2, pair))
    }

    /// Triangulates the inliers of a freshly initialised pair and refines.
    fn finish_initialization(
        &self,
        image2: ImageId,
        inliers: &TrackGraph,
        kind: RefinementKind,
        reconstruction: &mut Reconstruction,
    ) -> usize {
        reconstruction.matches_mut().insert_all(inliers);
        debug!(" -- Initial Intersection -- ");
        let created = mapping::point_structure_triangulation(
            inliers,
            self.arena,
            image2,
            self.config.min_views_initial,
            reconstruction,
            self.solver,
        );
        debug!("{} points reconstructed", created.len());
        if !created.is_empty() {
            self.refine(reconstruction, kind);
        }
        created.len()
    }

    /// Calibrated two-view initialisation. The first camera keeps its pose when the segment
    /// already has it, otherwise it is placed at the origin. Returns the number of
    /// triangulated points.
    pub fn initial_reconstruction_two_views(
        &self,
        image1: ImageId,
        image2: ImageId,
        k1: &na::Matrix3<f64>,
        k2: &na::Matrix3<f64>,
        reconstruction: &mut Reconstruction,
    ) -> Result<usize> {
        debug!(" -- Initial Motion Estimation -- ");
        let (estimate, x1, x2, inliers) = self.two_view_inliers(image1, image2)?;
        let essential = self
            .solver
            .essential_from_fundamental(&estimate.fundamental, k1, k2);
        let motion = x1
            .first()
            .zip(x2.first())
            .and_then(|(a, b)| self.solver.motion_from_essential(&essential, k1, a, k2, b))
            .ok_or_else(|| SfmError::GeometricDegeneracy("the motion cannot be estimated".into()))?;

        let first = match reconstruction.get_camera(image1) {
            Some(Camera::Pinhole(c)) => c.clone(),
            Some(Camera::Projective(_)) => {
                return Err(SfmError::InvalidInput(format!(
                    "image {} already has an uncalibrated camera",
                    image1
                )));
            }
            None => {
                let (w, h) = self.image_size();
                PinholeCamera::at_origin(*k1).with_image_size(w, h)
            }
        };
        let (rotation, translation) = compose_relative_motion(
            &first.rotation,
            &first.translation,
            &motion.rotation,
            &motion.translation,
        );
        let (w, h) = self.image_size();
        let second = PinholeCamera::new(*k2, rotation, translation).with_image_size(w, h);
        trace!("add camera [{}] R={} t={}", image2, rotation, translation.transpose());
        reconstruction.insert_camera(image1, first);
        reconstruction.insert_camera(image2, second);
        reconstruction.set_metric(true);

        Ok(self.finish_initialization(
            image2,
            &inliers,
            RefinementKind::MotionAndStructure,
            reconstruction,
        ))
    }

    /// Uncalibrated two-view initialisation with the canonical camera pair of the
    /// fundamental matrix. The segment must be empty.
    pub fn initial_reconstruction_projective(
        &self,
        image1: ImageId,
        image2: ImageId,
        reconstruction: &mut Reconstruction,
    ) -> Result<usize> {
        if reconstruction.num_cameras() > 0 {
            return Err(SfmError::InvalidInput(
                "projective initialization needs an empty segment".into(),
            ));
        }
        debug!(" -- Initial Motion Estimation (projective) -- ");
        let (estimate, _, _, inliers) = self.two_view_inliers(image1, image2)?;
        let (p1, p2) = projections_from_fundamental(&estimate.fundamental).ok_or_else(|| {
            SfmError::GeometricDegeneracy("no epipole for the fundamental matrix".into())
        })?;
        let size = Some(self.image_size());
        reconstruction.insert_camera(image1, ProjectiveCamera { projection: p1, image_size: size });
        reconstruction.insert_camera(image2, ProjectiveCamera { projection: p2, image_size: size });

        Ok(self.finish_initialization(image2, &inliers, RefinementKind::Projective, reconstruction))
    }

    pub fn initial_reconstruction(
        &self,
        image1: ImageId,
        image2: ImageId,
        mode: &CalibrationMode,
        reconstruction: &mut Reconstruction,
    ) -> Result<usize> {
        match mode {
            CalibrationMode::Calibrated(k) => {
                self.initial_reconstruction_two_views(image1, image2, k, k, reconstruction)
            }
            CalibrationMode::Uncalibrated => {
                self.initial_reconstruction_projective(image1, image2, reconstruction)
            }
        }
    }

    fn record_inliers(&self, image: ImageId, tracks: &[TrackId], inliers: &[usize], reconstruction: &mut Reconstruction) {
        for &i in inliers {
            let Some(&track) = tracks.get(i) else {
                continue;
            };
            if let Some(f) = self.graph.get(image, track) {
                reconstruction.matches_mut().insert(image, track, f);
            }
        }
    }

    /// Pose of `image` from its reconstructed tracks with known intrinsics. Needs at least
    /// five tracks; the segment is unchanged on failure. Returns the number of inliers.
    pub fn calibrated_camera_resection(
        &self,
        image: ImageId,
        k: &na::Matrix3<f64>,
        reconstruction: &mut Reconstruction,
    ) -> Result<usize> {
        let (tracks, x_image) =
            mapping::select_existing_point_structures(self.graph, self.arena, image, reconstruction);
        let (tracks, x_image, x_world): (Vec<_>, Vec<_>, Vec<_>) = {
            let mut ts = Vec::with_capacity(tracks.len());
            let mut xs = Vec::with_capacity(tracks.len());
            let mut ws = Vec::with_capacity(tracks.len());
            for (t, x) in tracks.into_iter().zip(x_image) {
                if let Some(w) = reconstruction.get_structure(t).and_then(|s| s.coords_affine()) {
                    ts.push(t);
                    xs.push(x);
                    ws.push(w);
                }
            }
            (ts, xs, ws)
        };
        if tracks.len() < MIN_CALIBRATED_RESECTION_POINTS {
            return Err(SfmError::insufficient(
                "calibrated resection",
                MIN_CALIBRATED_RESECTION_POINTS,
                tracks.len(),
            ));
        }
        let pose = self
            .solver
            .resect_euclidean(&x_image, &x_world, k, self.config.resection_threshold)
            .ok_or_else(|| {
                SfmError::GeometricDegeneracy(format!("resection of image {} failed", image))
            })?;
        let (w, h) = self.image_size();
        let camera = PinholeCamera::new(*k, pose.rotation, pose.translation).with_image_size(w, h);
        trace!("add camera [{}] R={} t={}", image, camera.rotation, camera.translation.transpose());
        reconstruction.insert_camera(image, camera);
        self.record_inliers(image, &tracks, &pose.inliers, reconstruction);
        debug!("image {} resected with {} inliers", image, pose.inliers.len());
        Ok(pose.inliers.len())
    }

    /// Projection matrix of `image` from its reconstructed tracks. Needs at least six tracks;
    /// the segment is unchanged on failure. Returns the number of inliers.
    pub fn projective_camera_resection(
        &self,
        image: ImageId,
        reconstruction: &mut Reconstruction,
    ) -> Result<usize> {
        let (tracks, x_image) =
            mapping::select_existing_point_structures(self.graph, self.arena, image, reconstruction);
        if tracks.len() < MIN_PROJECTIVE_RESECTION_POINTS {
            return Err(SfmError::insufficient(
                "projective resection",
                MIN_PROJECTIVE_RESECTION_POINTS,
                tracks.len(),
            ));
        }
        let x_world: Vec<_> = tracks
            .iter()
            .filter_map(|t| reconstruction.get_structure(*t).map(|s| s.coords))
            .collect();
        let pose = self
            .solver
            .resect_projective(&x_image, &x_world, self.config.resection_threshold)
            .ok_or_else(|| {
                SfmError::GeometricDegeneracy(format!("resection of image {} failed", image))
            })?;
        reconstruction.insert_camera(
            image,
            ProjectiveCamera {
                projection: pose.projection,
                image_size: Some(self.image_size()),
            },
        );
        self.record_inliers(image, &tracks, &pose.inliers, reconstruction);
        debug!("image {} resected with {} inliers", image, pose.inliers.len());
        Ok(pose.inliers.len())
    }

    /// Resection matching the segment: calibrated once the segment is metric, projective
    /// while it is not.
    pub fn resect(
        &self,
        image: ImageId,
        mode: &CalibrationMode,
        reconstruction: &mut Reconstruction,
    ) -> Result<usize> {
        match mode {
            CalibrationMode::Calibrated(k) => self.calibrated_camera_resection(image, k, reconstruction),
            CalibrationMode::Uncalibrated => self.projective_camera_resection(image, reconstruction),
        }
    }

    /// Extends a segment with `keyframes[first_index..]`. Each keyframe is resected,
    /// then its new tracks seen by enough posed cameras are triangulated, with periodic
    /// refinement. A keyframe that cannot be resected ends the segment with
    /// [`SfmError::TrackingLost`] carrying its index.
    pub fn incremental_reconstruction_keyframes(
        &self,
        keyframes: &[ImageId],
        first_index: usize,
        mode: &CalibrationMode,
        reconstruction: &mut Reconstruction,
    ) -> Result<()> {
        let interval = self.config.keyframe_refinement_interval.max(1);
        let mut added = 0usize;
        let mut pending_points = false;
        for (keyframe_index, &image) in keyframes.iter().enumerate().skip(first_index) {
            if reconstruction.has_camera(image) {
                continue;
            }
            debug!(" -- Incremental Resection -- ");
            match self.resect(image, mode, reconstruction) {
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {
                    warn!("tracking lost at keyframe {} (image {}): {}", keyframe_index, image, e);
                    return Err(SfmError::TrackingLost {
                        keyframe_index,
                        image,
                    });
                }
                Err(e) => return Err(e),
            }

            debug!(" -- Incremental Intersection -- ");
            let created = mapping::point_structure_triangulation(
                self.graph,
                self.arena,
                image,
                self.config.min_views_incremental,
                reconstruction,
                self.solver,
            );
            for track in &created {
                reconstruction.matches_mut().insert_track_from(self.graph, *track);
            }
            debug!("{} points reconstructed", created.len());

            added += 1;
            pending_points |= !created.is_empty();
            if pending_points && added % interval == 0 {
                let kind = mode.refinement(reconstruction);
                self.refine(reconstruction, kind);
                pending_points = false;
            }
        }
        if pending_points {
            let kind = mode.refinement(reconstruction);
            self.refine(reconstruction, kind);
        }
        Ok(())
    }

    /// Localizes every image of `sequence` that is not posed in any segment, against the
    /// segment it falls into. Segments must be in sequence order. Failures are reported,
    /// never fatal.
    pub fn reconstruction_non_keyframes(
        &self,
        sequence: &ImageSequence,
        mode: &CalibrationMode,
        segments: &mut [Reconstruction],
    ) -> BackfillReport {
        let mut report = BackfillReport::default();
        if segments.is_empty() {
            return report;
        }
        let interval = self.config.backfill_refinement_interval.max(1);
        let mut current = 0;
        let mut counter = 0;
        for image in sequence.iter() {
            let do_refinement = if counter + 1 < interval {
                counter += 1;
                false
            } else {
                counter = 0;
                true
            };
            let in_current = segments[current].has_camera(image);
            let in_next = segments
                .get(current + 1)
                .is_some_and(|s| s.has_camera(image));
            if in_next {
                // first keyframe of the next segment
                current += 1;
                continue;
            }
            if in_current {
                continue;
            }
            let segment = &mut segments[current];
            match self.resect(image, mode, segment) {
                Ok(_) => {
                    report.localized.push(image);
                    if do_refinement {
                        let kind = mode.refinement(segment);
                        self.refine(segment, kind);
                    }
                }
                Err(e) => {
                    warn!("image {} cannot be localized: {}", image, e);
                    report.failed.push(image);
                }
            }
        }
        report
    }

    /// Metric upgrade of a projective segment followed by retriangulation and a metric
    /// refinement pass. The segment stays projective when the upgrade fails.
    pub fn upgrade_segment(&self, reconstruction: &mut Reconstruction) -> Result<()> {
        if reconstruction.is_metric() {
            return Ok(());
        }
        upgrade_to_metric(reconstruction, self.image_size())?;
        for image in reconstruction.camera_ids() {
            mapping::point_structure_retriangulation(
                self.graph,
                self.arena,
                image,
                reconstruction,
                self.solver,
            );
        }
        self.refine(reconstruction, RefinementKind::Metric);
        Ok(())
    }

    /// Full pipeline over an ordered image sequence.
    pub fn reconstruct_video(
        &self,
        sequence: &ImageSequence,
        keyframe_config: &KeyframeConfig,
        mode: &CalibrationMode,
    ) -> Result<VideoReconstruction> {
        if sequence.len() < 2 {
            return Err(SfmError::insufficient("video reconstruction", 2, sequence.len()));
        }
        debug!("selecting keyframes");
        let keyframes = select_keyframes(self.graph, sequence, keyframe_config);
        info!("keyframes: {:?}", keyframes);
        if keyframes.len() < 2 {
            return Err(SfmError::insufficient("keyframes", 2, keyframes.len()));
        }

        let mut segments = Vec::new();
        let mut index = 0;
        while index + 1 < keyframes.len() {
            let (image1, image2) = (keyframes[index], keyframes[index + 1]);
            if image1 == image2 {
                debug!("single keyframe segment at {}", index);
                index += 1;
                continue;
            }
            let mut reconstruction = Reconstruction::new();
            match self.initial_reconstruction(image1, image2, mode, &mut reconstruction) {
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {
                    warn!("initialization {} / {} failed: {}", image1, image2, e);
                    index += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
            let extended =
                self.incremental_reconstruction_keyframes(&keyframes, index + 2, mode, &mut reconstruction);
            segments.push(reconstruction);
            match extended {
                Ok(()) => break,
                Err(SfmError::TrackingLost { keyframe_index, .. }) => index = keyframe_index,
                Err(e) => return Err(e),
            }
        }
        info!("{} segments reconstructed", segments.len());

        debug!(" Non-keyframe reconstruction ");
        let backfill = self.reconstruction_non_keyframes(sequence, mode, &mut segments);

        if *mode == CalibrationMode::Uncalibrated {
            for (i, segment) in segments.iter_mut().enumerate() {
                if let Err(e) = self.upgrade_segment(segment) {
                    warn!("segment {} stays projective: {}", i, e);
                }
            }
        }
        Ok(VideoReconstruction {
            keyframes,
            segments,
            backfill,
        })
    }
}
