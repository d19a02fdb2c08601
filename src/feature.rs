use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Capability tag of a feature, stored next to its handle so filtering never needs the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeatureKind {
    Point,
    Line,
}

/// Stable handle into a [`FeatureArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureRef {
    pub index: u32,
    pub kind: FeatureKind,
}

impl FeatureRef {
    pub fn new(index: u32, kind: FeatureKind) -> FeatureRef {
        FeatureRef { index, kind }
    }
    pub fn point(index: u32) -> FeatureRef {
        FeatureRef::new(index, FeatureKind::Point)
    }
    pub fn line(index: u32) -> FeatureRef {
        FeatureRef::new(index, FeatureKind::Line)
    }
    pub fn is(&self, kind: FeatureKind) -> bool {
        self.kind == kind
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointFeature {
    pub position: Vec2,
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default)]
    pub orientation: f32,
}

fn default_scale() -> f32 {
    1.0
}

impl PointFeature {
    pub fn new(x: f32, y: f32) -> PointFeature {
        PointFeature {
            position: Vec2::new(x, y),
            scale: 1.0,
            orientation: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineFeature {
    pub start: Vec2,
    pub end: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Feature {
    Point(PointFeature),
    Line(LineFeature),
}

impl Feature {
    pub fn kind(&self) -> FeatureKind {
        match self {
            Feature::Point(_) => FeatureKind::Point,
            Feature::Line(_) => FeatureKind::Line,
        }
    }

    /// Image position of the observation. Lines report their midpoint.
    pub fn position(&self) -> Vec2 {
        match self {
            Feature::Point(p) => p.position,
            Feature::Line(l) => (l.start + l.end) * 0.5,
        }
    }

    pub fn as_point(&self) -> Option<&PointFeature> {
        match self {
            Feature::Point(p) => Some(p),
            Feature::Line(_) => None,
        }
    }

    pub fn as_line(&self) -> Option<&LineFeature> {
        match self {
            Feature::Line(l) => Some(l),
            Feature::Point(_) => None,
        }
    }
}

/// Owner of every feature observation. The track graph only ever holds [`FeatureRef`]s into it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureArena {
    features: Vec<Feature>,
}

impl FeatureArena {
    pub fn new() -> FeatureArena {
        FeatureArena::default()
    }

    pub fn push(&mut self, feature: Feature) -> FeatureRef {
        let index = self.features.len() as u32;
        let kind = feature.kind();
        self.features.push(feature);
        FeatureRef::new(index, kind)
    }

    pub fn push_point(&mut self, x: f32, y: f32) -> FeatureRef {
        self.push(Feature::Point(PointFeature::new(x, y)))
    }

    pub fn get(&self, feature: FeatureRef) -> Option<&Feature> {
        self.features.get(feature.index as usize)
    }

    pub fn point(&self, feature: FeatureRef) -> Option<&PointFeature> {
        self.get(feature).and_then(Feature::as_point)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureRef, &Feature)> {
        self.features
            .iter()
            .enumerate()
            .map(|(i, f)| (FeatureRef::new(i as u32, f.kind()), f))
    }
}

/// A detected feature together with its descriptor vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub feature: FeatureRef,
    pub descriptor: Vec<f32>,
}

/// The keypoints of one image, in detector order. The position in this list is the
/// "local feature index" used by matching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeypointSet {
    pub keypoints: Vec<Keypoint>,
}

impl KeypointSet {
    pub fn new(keypoints: Vec<Keypoint>) -> KeypointSet {
        KeypointSet { keypoints }
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn descriptor_dim(&self) -> Option<usize> {
        self.keypoints.first().map(|k| k.descriptor.len())
    }

    /// Packs all descriptors row-major. Returns `None` when the set is empty or the
    /// descriptors do not share one dimension.
    pub fn to_contiguous_array(&self) -> Option<(Vec<f32>, usize)> {
        let dim = self.descriptor_dim()?;
        if dim == 0 || self.keypoints.iter().any(|k| k.descriptor.len() != dim) {
            return None;
        }
        let mut data = Vec::with_capacity(dim * self.keypoints.len());
        for k in &self.keypoints {
            data.extend_from_slice(&k.descriptor);
        }
        Some((data, dim))
    }
}

/// Serialized form of one image's detector output, as read by the `sfm-tracks` binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageFeatures {
    pub image: crate::ImageId,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    pub features: Vec<DescribedFeature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribedFeature {
    pub feature: Feature,
    pub descriptor: Vec<f32>,
}

impl ImageFeatures {
    /// Moves the features into the arena and returns the matching keypoint set.
    pub fn register(&self, arena: &mut FeatureArena) -> KeypointSet {
        KeypointSet::new(
            self.features
                .iter()
                .map(|f| Keypoint {
                    feature: arena.push(f.feature),
                    descriptor: f.descriptor.clone(),
                })
                .collect(),
        )
    }
}
