use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ImageId;
use crate::error::{Result, SfmError};
use crate::track_graph::TrackGraph;

/// Images in acquisition order. Never contains the same id twice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ImageId>", into = "Vec<ImageId>")]
pub struct ImageSequence {
    images: Vec<ImageId>,
}

impl ImageSequence {
    pub fn new(images: Vec<ImageId>) -> Result<ImageSequence> {
        let mut seen = HashSet::with_capacity(images.len());
        if let Some(dup) = images.iter().find(|i| !seen.insert(**i)) {
            return Err(SfmError::InvalidInput(format!(
                "image {} appears twice in the sequence",
                dup
            )));
        }
        Ok(ImageSequence { images })
    }

    /// All images of the graph, ordered by id.
    pub fn from_graph(graph: &TrackGraph) -> ImageSequence {
        ImageSequence {
            images: graph.images().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<ImageId> {
        self.images.get(index).copied()
    }

    pub fn first(&self) -> Option<ImageId> {
        self.images.first().copied()
    }

    pub fn as_slice(&self) -> &[ImageId] {
        &self.images
    }

    pub fn iter(&self) -> impl Iterator<Item = ImageId> + '_ {
        self.images.iter().copied()
    }

    pub fn position(&self, image: ImageId) -> Option<usize> {
        self.images.iter().position(|i| *i == image)
    }

    pub fn contains(&self, image: ImageId) -> bool {
        self.position(image).is_some()
    }
}

impl TryFrom<Vec<ImageId>> for ImageSequence {
    type Error = SfmError;

    fn try_from(images: Vec<ImageId>) -> Result<Self> {
        ImageSequence::new(images)
    }
}

impl From<ImageSequence> for Vec<ImageId> {
    fn from(sequence: ImageSequence) -> Self {
        sequence.images
    }
}
