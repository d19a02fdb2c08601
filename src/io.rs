use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::controller::VideoReconstruction;
use crate::error::{Result, SfmError};
use crate::feature::{FeatureArena, FeatureRef, ImageFeatures};
use crate::track_graph::TrackGraph;
use crate::{ImageId, TrackId};

/// Serializes an object to a JSON file.
pub fn object_to_json<T: Serialize>(output_path: impl AsRef<Path>, object: &T) -> Result<()> {
    let j = serde_json::to_string_pretty(object)?;
    std::fs::write(output_path, j)?;
    Ok(())
}

/// Deserializes an object from a JSON file.
pub fn object_from_json<T: DeserializeOwned>(file_path: impl AsRef<Path>) -> Result<T> {
    let contents = std::fs::read_to_string(file_path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Loads every `*.json` feature file of `folder`, sorted by image id.
pub fn load_image_features(folder: impl AsRef<Path>) -> Result<Vec<ImageFeatures>> {
    let pattern = folder.as_ref().join("*.json");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| SfmError::InvalidInput(format!("non utf-8 path {}", pattern.display())))?;
    let paths = glob::glob(pattern).map_err(|e| SfmError::InvalidInput(e.to_string()))?;
    let mut images = Vec::new();
    for path in paths {
        let path = path.map_err(|e| SfmError::Io(e.into_error()))?;
        images.push(object_from_json::<ImageFeatures>(&path)?);
    }
    images.sort_by_key(|f| f.image);
    for w in images.windows(2) {
        if w[0].image == w[1].image {
            return Err(SfmError::InvalidInput(format!(
                "image {} appears in two feature files",
                w[0].image
            )));
        }
    }
    info!("loaded features of {} images", images.len());
    Ok(images)
}

/// On-disk form of a track graph together with the features it points into.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TracksFile {
    pub features: FeatureArena,
    pub edges: Vec<(ImageId, TrackId, FeatureRef)>,
}

impl TracksFile {
    pub fn new(graph: &TrackGraph, features: FeatureArena) -> TracksFile {
        TracksFile {
            features,
            edges: graph.edges().collect(),
        }
    }

    /// Rebuilds the graph. Edges pointing outside the arena are rejected.
    pub fn into_parts(self) -> Result<(TrackGraph, FeatureArena)> {
        for (image, track, f) in &self.edges {
            match self.features.get(*f) {
                Some(feature) if feature.kind() == f.kind => {}
                _ => {
                    return Err(SfmError::InvalidInput(format!(
                        "edge ({}, {}) has no feature {}",
                        image, track, f.index
                    )));
                }
            }
        }
        let graph = self.edges.into_iter().collect();
        Ok((graph, self.features))
    }
}

pub fn save_tracks(path: impl AsRef<Path>, graph: &TrackGraph, features: &FeatureArena) -> Result<()> {
    object_to_json(path, &TracksFile::new(graph, features.clone()))
}

pub fn load_tracks(path: impl AsRef<Path>) -> Result<(TrackGraph, FeatureArena)> {
    object_from_json::<TracksFile>(path)?.into_parts()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub timestamp: String,
    pub keyframes: Vec<ImageId>,
    pub segments: Vec<SegmentReport>,
    pub localized: Vec<ImageId>,
    pub unlocalized: Vec<ImageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentReport {
    pub id: usize,
    pub metric: bool,
    pub cameras: Vec<ImageId>,
    pub num_structures: usize,
}

impl RunReport {
    pub fn new(run: &VideoReconstruction) -> RunReport {
        let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
        let timestamp = now
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| now.unix_timestamp().to_string());
        RunReport {
            timestamp,
            keyframes: run.keyframes.clone(),
            segments: run
                .segments
                .iter()
                .enumerate()
                .map(|(id, s)| SegmentReport {
                    id,
                    metric: s.is_metric(),
                    cameras: s.camera_ids(),
                    num_structures: s.num_structures(),
                })
                .collect(),
            localized: run.backfill.localized.clone(),
            unlocalized: run.backfill.failed.clone(),
        }
    }
}

/// Writes a JSON summary of a reconstruction run.
pub fn write_report(output_path: impl AsRef<Path>, run: &VideoReconstruction) -> Result<()> {
    object_to_json(output_path, &RunReport::new(run))
}
