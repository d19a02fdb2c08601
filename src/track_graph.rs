use std::collections::BTreeMap;
use std::collections::btree_map;

use glam::Vec2;

use crate::feature::{FeatureArena, FeatureKind, FeatureRef};
use crate::{ImageId, TrackId};

/// Bipartite (image, track) -> feature ledger.
///
/// Every edge is stored twice, once keyed by image and once keyed by track, so both
/// directions iterate in id order without a scan. At most one feature exists per
/// (image, track) pair; inserting again overwrites it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackGraph {
    by_image: BTreeMap<ImageId, BTreeMap<TrackId, FeatureRef>>,
    by_track: BTreeMap<TrackId, BTreeMap<ImageId, FeatureRef>>,
    num_edges: usize,
}

/// Lazy `(other id, feature)` sequence over one row of the graph.
///
/// Cloning gives an independent restart from the beginning of the row.
#[derive(Debug, Clone)]
pub struct Edges<'a, K> {
    inner: Option<btree_map::Iter<'a, K, FeatureRef>>,
    filter: Option<FeatureKind>,
}

impl<'a, K: Copy> Iterator for Edges<'a, K> {
    type Item = (K, FeatureRef);

    fn next(&mut self) -> Option<Self::Item> {
        let inner = self.inner.as_mut()?;
        for (k, f) in inner.by_ref() {
            match self.filter {
                Some(kind) if !f.is(kind) => continue,
                _ => return Some((*k, *f)),
            }
        }
        None
    }
}

impl<'a, K> Edges<'a, K> {
    /// Restrict the sequence to one capability; other entries are skipped silently.
    pub fn with_kind(mut self, kind: FeatureKind) -> Self {
        self.filter = Some(kind);
        self
    }
}

impl TrackGraph {
    pub fn new() -> TrackGraph {
        TrackGraph::default()
    }

    /// Adds `(image, track) -> feature`, replacing the previous feature of that pair.
    pub fn insert(&mut self, image: ImageId, track: TrackId, feature: FeatureRef) {
        let previous = self
            .by_image
            .entry(image)
            .or_default()
            .insert(track, feature);
        self.by_track.entry(track).or_default().insert(image, feature);
        if previous.is_none() {
            self.num_edges += 1;
        }
    }

    pub fn get(&self, image: ImageId, track: TrackId) -> Option<FeatureRef> {
        self.by_image.get(&image)?.get(&track).copied()
    }

    pub fn contains(&self, image: ImageId, track: TrackId) -> bool {
        self.get(image, track).is_some()
    }

    /// All `(track, feature)` edges of one image, in track order.
    pub fn features_in_image(&self, image: ImageId) -> Edges<'_, TrackId> {
        Edges {
            inner: self.by_image.get(&image).map(|row| row.iter()),
            filter: None,
        }
    }

    /// All `(image, feature)` edges of one track, in image order.
    pub fn features_in_track(&self, track: TrackId) -> Edges<'_, ImageId> {
        Edges {
            inner: self.by_track.get(&track).map(|row| row.iter()),
            filter: None,
        }
    }

    pub fn num_images(&self) -> usize {
        self.by_image.len()
    }

    pub fn num_tracks(&self) -> usize {
        self.by_track.len()
    }

    pub fn num_edges(&self) -> usize {
        self.num_edges
    }

    pub fn is_empty(&self) -> bool {
        self.num_edges == 0
    }

    pub fn num_features_in_image(&self, image: ImageId) -> usize {
        self.by_image.get(&image).map_or(0, BTreeMap::len)
    }

    pub fn num_features_in_track(&self, track: TrackId) -> usize {
        self.by_track.get(&track).map_or(0, BTreeMap::len)
    }

    pub fn images(&self) -> impl Iterator<Item = ImageId> + Clone + '_ {
        self.by_image.keys().copied()
    }

    pub fn tracks(&self) -> impl Iterator<Item = TrackId> + Clone + '_ {
        self.by_track.keys().copied()
    }

    /// Every edge as `(image, track, feature)`, image-major.
    pub fn edges(&self) -> impl Iterator<Item = (ImageId, TrackId, FeatureRef)> + '_ {
        self.by_image
            .iter()
            .flat_map(|(i, row)| row.iter().map(move |(t, f)| (*i, *t, *f)))
    }

    pub fn max_track(&self) -> Option<TrackId> {
        self.by_track.keys().next_back().copied()
    }

    pub fn clear(&mut self) {
        self.by_image.clear();
        self.by_track.clear();
        self.num_edges = 0;
    }

    /// Copies every edge of `other` into `self`, overwriting on conflict.
    pub fn insert_all(&mut self, other: &TrackGraph) {
        for (image, track, feature) in other.edges() {
            self.insert(image, track, feature);
        }
    }

    /// Copies every edge of `track` from `other`.
    pub fn insert_track_from(&mut self, other: &TrackGraph, track: TrackId) {
        for (image, feature) in other.features_in_track(track) {
            self.insert(image, track, feature);
        }
    }

    /// Number of tracks observed in both images.
    pub fn num_shared_tracks(&self, a: ImageId, b: ImageId) -> usize {
        match (self.by_image.get(&a), self.by_image.get(&b)) {
            (Some(ra), Some(rb)) => {
                let (small, large) = if ra.len() <= rb.len() { (ra, rb) } else { (rb, ra) };
                small.keys().filter(|t| large.contains_key(t)).count()
            }
            _ => 0,
        }
    }

    /// Sorted tracks seen in every one of `images`. Empty when `images` is empty.
    pub fn tracks_in_all_images(&self, images: &[ImageId]) -> Vec<TrackId> {
        let Some((first, rest)) = images.split_first() else {
            return Vec::new();
        };
        let Some(row) = self.by_image.get(first) else {
            return Vec::new();
        };
        row.keys()
            .copied()
            .filter(|t| rest.iter().all(|i| self.contains(*i, *t)))
            .collect()
    }

    /// Point positions of the tracks shared by all `images`.
    ///
    /// Returns the tracks and, per image, the positions in the same order. Tracks whose
    /// feature in any of the images is not a point are left out.
    pub fn point_match_matrices(
        &self,
        images: &[ImageId],
        arena: &FeatureArena,
    ) -> (Vec<TrackId>, Vec<Vec<Vec2>>) {
        let mut tracks = Vec::new();
        let mut points = vec![Vec::new(); images.len()];
        'track: for track in self.tracks_in_all_images(images) {
            let mut row = Vec::with_capacity(images.len());
            for image in images {
                match self.get(*image, track).and_then(|f| arena.point(f)) {
                    Some(p) => row.push(p.position),
                    None => continue 'track,
                }
            }
            for (dst, p) in points.iter_mut().zip(row) {
                dst.push(p);
            }
            tracks.push(track);
        }
        (tracks, points)
    }
}

impl FromIterator<(ImageId, TrackId, FeatureRef)> for TrackGraph {
    fn from_iter<I: IntoIterator<Item = (ImageId, TrackId, FeatureRef)>>(iter: I) -> Self {
        let mut graph = TrackGraph::new();
        for (image, track, feature) in iter {
            graph.insert(image, track, feature);
        }
        graph
    }
}
