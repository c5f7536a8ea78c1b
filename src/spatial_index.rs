//! # Spatial Index
//!
//! Null-safe nearest-neighbor and radius queries over planar points.
//!
//! [`PointIndex`] wraps an rstar R-tree. Built from zero points it still answers
//! every query, always with an empty result, so callers never branch on an
//! empty input set.

use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::geo_utils::PlanarPoint;

/// A planar point remembering its position in the input slice.
#[derive(Debug, Clone, Copy)]
struct IndexedPoint {
    index: usize,
    x: f64,
    y: f64,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.x, self.y])
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.x - point[0];
        let dy = self.y - point[1];
        dx * dx + dy * dy
    }
}

/// A query hit: position of the point in the input slice and its distance in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f64,
}

/// R-tree over planar points.
#[derive(Debug, Clone, Default)]
pub struct PointIndex {
    tree: Option<RTree<IndexedPoint>>,
}

impl PointIndex {
    /// Bulk-load an index. Indices reported by queries refer to `points`.
    pub fn new(points: &[PlanarPoint]) -> Self {
        if points.is_empty() {
            return Self { tree: None };
        }

        let indexed: Vec<IndexedPoint> = points
            .iter()
            .enumerate()
            .map(|(index, p)| IndexedPoint {
                index,
                x: p.x,
                y: p.y,
            })
            .collect();

        Self {
            tree: Some(RTree::bulk_load(indexed)),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.as_ref().map_or(0, |t| t.size())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All points within `radius` meters, nearest first. Equal distances are
    /// ordered by input position.
    pub fn within_radius(&self, center: &PlanarPoint, radius: f64) -> Vec<Neighbor> {
        let Some(tree) = &self.tree else {
            return Vec::new();
        };

        let query = [center.x, center.y];
        let search_bounds = AABB::from_corners(
            [center.x - radius, center.y - radius],
            [center.x + radius, center.y + radius],
        );

        let mut hits: Vec<Neighbor> = tree
            .locate_in_envelope_intersecting(&search_bounds)
            .filter_map(|p| {
                let distance = p.distance_2(&query).sqrt();
                (distance <= radius).then_some(Neighbor {
                    index: p.index,
                    distance,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.index.cmp(&b.index))
        });
        hits
    }

    /// The nearest point within `radius` meters, if any.
    pub fn nearest_within(&self, center: &PlanarPoint, radius: f64) -> Option<Neighbor> {
        self.within_radius(center, radius).into_iter().next()
    }

    /// Up to `k` nearest points, nearest first.
    pub fn k_nearest(&self, center: &PlanarPoint, k: usize) -> Vec<Neighbor> {
        let Some(tree) = &self.tree else {
            return Vec::new();
        };

        let query = [center.x, center.y];
        tree.nearest_neighbor_iter(&query)
            .take(k)
            .map(|p| Neighbor {
                index: p.index,
                distance: p.distance_2(&query).sqrt(),
            })
            .collect()
    }
}
