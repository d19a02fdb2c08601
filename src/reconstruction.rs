use std::collections::BTreeMap;

use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::camera::{Camera, homogeneous_to_euclidean};
use crate::track_graph::TrackGraph;
use crate::{ImageId, TrackId};

/// Reconstructed 3D point in homogeneous coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointStructure {
    pub coords: na::Vector4<f64>,
}

impl PointStructure {
    pub fn new(coords: na::Vector4<f64>) -> PointStructure {
        PointStructure { coords }
    }

    pub fn from_affine(p: na::Vector3<f64>) -> PointStructure {
        PointStructure::new(p.push(1.0))
    }

    /// Euclidean coordinates, `None` for points at infinity.
    pub fn coords_affine(&self) -> Option<na::Vector3<f64>> {
        homogeneous_to_euclidean(&self.coords)
    }
}

/// One reconstruction segment: cameras by image, structures by track, and the matches
/// that were used to build them. Every segment has its own frame and scale.
#[derive(Debug, Clone, Default)]
pub struct Reconstruction {
    cameras: BTreeMap<ImageId, Camera>,
    structures: BTreeMap<TrackId, PointStructure>,
    matches: TrackGraph,
    metric: bool,
}

impl Reconstruction {
    pub fn new() -> Reconstruction {
        Reconstruction::default()
    }

    /// Stores `camera` for `image`, returning the camera it replaced.
    pub fn insert_camera(&mut self, image: ImageId, camera: impl Into<Camera>) -> Option<Camera> {
        self.cameras.insert(image, camera.into())
    }

    /// Stores `structure` for `track`, returning the structure it replaced.
    pub fn insert_track(&mut self, track: TrackId, structure: PointStructure) -> Option<PointStructure> {
        self.structures.insert(track, structure)
    }

    pub fn has_camera(&self, image: ImageId) -> bool {
        self.cameras.contains_key(&image)
    }

    pub fn has_structure(&self, track: TrackId) -> bool {
        self.structures.contains_key(&track)
    }

    pub fn get_camera(&self, image: ImageId) -> Option<&Camera> {
        self.cameras.get(&image)
    }

    pub fn get_camera_mut(&mut self, image: ImageId) -> Option<&mut Camera> {
        self.cameras.get_mut(&image)
    }

    pub fn get_structure(&self, track: TrackId) -> Option<&PointStructure> {
        self.structures.get(&track)
    }

    pub fn get_structure_mut(&mut self, track: TrackId) -> Option<&mut PointStructure> {
        self.structures.get_mut(&track)
    }

    pub fn clear_cameras(&mut self) {
        self.cameras.clear();
    }

    pub fn clear_structures(&mut self) {
        self.structures.clear();
    }

    pub fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    pub fn num_structures(&self) -> usize {
        self.structures.len()
    }

    pub fn cameras(&self) -> impl Iterator<Item = (ImageId, &Camera)> {
        self.cameras.iter().map(|(i, c)| (*i, c))
    }

    pub fn cameras_mut(&mut self) -> impl Iterator<Item = (ImageId, &mut Camera)> {
        self.cameras.iter_mut().map(|(i, c)| (*i, c))
    }

    pub fn structures(&self) -> impl Iterator<Item = (TrackId, &PointStructure)> {
        self.structures.iter().map(|(t, s)| (*t, s))
    }

    pub fn structures_mut(&mut self) -> impl Iterator<Item = (TrackId, &mut PointStructure)> {
        self.structures.iter_mut().map(|(t, s)| (*t, s))
    }

    pub fn camera_ids(&self) -> Vec<ImageId> {
        self.cameras.keys().copied().collect()
    }

    /// Matches used to build this segment.
    pub fn matches(&self) -> &TrackGraph {
        &self.matches
    }

    pub fn matches_mut(&mut self) -> &mut TrackGraph {
        &mut self.matches
    }

    /// True once the segment went through a metric upgrade or started calibrated.
    pub fn is_metric(&self) -> bool {
        self.metric
    }

    pub fn set_metric(&mut self, metric: bool) {
        self.metric = metric;
    }

    /// Projection matrices of the posed cameras observing `track` in `graph`, paired
    /// with the observing image.
    pub fn posed_observers(&self, graph: &TrackGraph, track: TrackId) -> Vec<(ImageId, na::Matrix3x4<f64>)> {
        graph
            .features_in_track(track)
            .filter_map(|(image, _)| self.get_camera(image).map(|c| (image, c.projection_matrix())))
            .collect()
    }
}
