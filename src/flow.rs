//! # Flow Matcher
//!
//! Binds directional road-speed samples to the nodes of a route's geometry.
//!
//! ## Algorithm
//!
//! 1. Index both endpoints of every flow segment in planar coordinates
//! 2. For each geometry node, gather the segments with an endpoint within 100m
//! 3. Derive the node's travel direction (towards the next node, or from the
//!    previous node for the last one)
//! 4. Keep segments whose heading agrees with the travel direction
//!    (dot product strictly above 0.8), which rejects the opposite carriageway
//!    and crossing streets
//! 5. Return the speed of the survivor with the smallest snap distance
//!
//! Every failure along the way is a `None` for that node, never an error.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::geo_utils::{project_onto_planar_segment, PlanarPoint, UtmProjection};
use crate::route::{GeometryNode, Route};
use crate::spatial_index::PointIndex;
use crate::{BoundingBox, GpsPoint};

/// A directed road-speed sample.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowSegment {
    pub start: GpsPoint,
    pub end: GpsPoint,
    /// Average speed, km/h by convention
    pub speed: f64,
}

impl FlowSegment {
    pub fn new(start: GpsPoint, end: GpsPoint, speed: f64) -> Self {
        Self { start, end, speed }
    }
}

/// Configuration for flow matching
#[derive(Debug, Clone)]
pub struct FlowMatchConfig {
    /// Radius around a geometry node searched for segment endpoints (meters).
    /// Default: 100m
    pub search_radius: f64,

    /// Fraction of the segment length added at both ends when computing the
    /// snap distance. Default: 0.2
    pub endpoint_extension: f64,

    /// Minimum dot product between travel direction and segment heading,
    /// exclusive. Default: 0.8
    pub min_agreement: f64,

    /// Travel vectors shorter than this are treated as duplicate points (meters).
    /// Default: 0.1
    pub min_travel_magnitude: f64,
}

impl Default for FlowMatchConfig {
    fn default() -> Self {
        Self {
            search_radius: 100.0,
            endpoint_extension: 0.2,
            min_agreement: 0.8,
            min_travel_magnitude: 0.1,
        }
    }
}

// ============================================================================
// Index
// ============================================================================

/// Flow segment with planar endpoints and unit heading computed once.
#[derive(Debug, Clone, Copy)]
struct PreparedSegment {
    start: PlanarPoint,
    end: PlanarPoint,
    heading: [f64; 2],
    speed: f64,
}

impl PreparedSegment {
    fn new(segment: &FlowSegment, projection: &UtmProjection) -> Self {
        let start = projection.project(&segment.start);
        let end = projection.project(&segment.end);
        let [dx, dy] = start.vector_to(&end);
        let length = dx.hypot(dy);

        // Zero-length samples get no heading and can never agree with travel
        let heading = if length > 0.0 {
            [dx / length, dy / length]
        } else {
            [0.0, 0.0]
        };

        Self {
            start,
            end,
            heading,
            speed: segment.speed,
        }
    }

    fn snap_distance(&self, point: &PlanarPoint, extension: f64) -> f64 {
        project_onto_planar_segment(&self.start, &self.end, point, -extension)
            .map_or(f64::INFINITY, |(_, distance)| distance)
    }
}

/// A segment considered for one geometry node.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    segment: usize,
    snap_distance: f64,
    agreement: f64,
}

/// Closest candidate among those agreeing with the travel direction.
/// The earliest candidate wins ties.
fn select_candidate(candidates: &[Candidate], min_agreement: f64) -> Option<usize> {
    candidates
        .iter()
        .filter(|c| c.agreement > min_agreement)
        .fold(None, |best: Option<&Candidate>, c| match best {
            Some(b) if b.snap_distance <= c.snap_distance => Some(b),
            _ => Some(c),
        })
        .map(|c| c.segment)
}

/// Spatial index over a set of flow segments sharing one projection.
#[derive(Debug, Clone)]
pub struct FlowIndex {
    projection: UtmProjection,
    segments: Vec<PreparedSegment>,
    endpoints: PointIndex,
}

impl FlowIndex {
    pub fn new(segments: &[FlowSegment], projection: UtmProjection) -> Self {
        let segments: Vec<PreparedSegment> = segments
            .iter()
            .map(|s| PreparedSegment::new(s, &projection))
            .collect();

        let endpoints: Vec<PlanarPoint> = segments.iter().flat_map(|s| [s.start, s.end]).collect();

        Self {
            projection,
            endpoints: PointIndex::new(&endpoints),
            segments,
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Speed per geometry node, `None` where no sample matches.
    pub fn match_geometry(&self, geometry: &[GeometryNode], config: &FlowMatchConfig) -> Vec<Option<f64>> {
        let planar: Vec<PlanarPoint> = geometry
            .iter()
            .map(|n| self.projection.project(n.position()))
            .collect();

        (0..planar.len())
            .map(|i| self.match_node(&planar, i, config))
            .collect()
    }

    fn match_node(&self, planar: &[PlanarPoint], i: usize, config: &FlowMatchConfig) -> Option<f64> {
        let point = &planar[i];

        let nearby: BTreeSet<usize> = self
            .endpoints
            .within_radius(point, config.search_radius)
            .into_iter()
            .map(|hit| hit.index / 2)
            .collect();

        if nearby.is_empty() {
            return None;
        }

        let [dx, dy] = travel_vector(planar, i)?;
        let magnitude = dx.hypot(dy);
        if magnitude < config.min_travel_magnitude {
            return None;
        }
        let direction = [dx / magnitude, dy / magnitude];

        let candidates: Vec<Candidate> = nearby
            .into_iter()
            .map(|k| {
                let segment = &self.segments[k];
                Candidate {
                    segment: k,
                    snap_distance: segment.snap_distance(point, config.endpoint_extension),
                    agreement: direction[0] * segment.heading[0] + direction[1] * segment.heading[1],
                }
            })
            .collect();

        select_candidate(&candidates, config.min_agreement).map(|k| self.segments[k].speed)
    }
}

/// Direction of travel at node `i`: towards the next node, or from the
/// previous one at the end of the geometry.
fn travel_vector(planar: &[PlanarPoint], i: usize) -> Option<[f64; 2]> {
    if i + 1 < planar.len() {
        Some(planar[i].vector_to(&planar[i + 1]))
    } else if i > 0 {
        Some(planar[i - 1].vector_to(&planar[i]))
    } else {
        None
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Match one route geometry against flow segments with the default configuration.
pub fn match_flow(geometry: &[GeometryNode], segments: &[FlowSegment]) -> Vec<Option<f64>> {
    match_flow_with_config(geometry, segments, &FlowMatchConfig::default())
}

/// Match one route geometry against flow segments, projecting in the zone of
/// the route's first node.
pub fn match_flow_with_config(
    geometry: &[GeometryNode],
    segments: &[FlowSegment],
    config: &FlowMatchConfig,
) -> Vec<Option<f64>> {
    let Some(first) = geometry.first() else {
        return Vec::new();
    };

    let index = FlowIndex::new(segments, UtmProjection::for_point(first.position()));
    index.match_geometry(geometry, config)
}

/// Match several routes against one set of flow segments sharing a single index.
///
/// Returns per-node speeds keyed by route id, or an empty map when there are
/// no segments.
pub fn match_routes(
    routes: &[Route],
    segments: &[FlowSegment],
    config: &FlowMatchConfig,
) -> BTreeMap<String, Vec<Option<f64>>> {
    if segments.is_empty() {
        return BTreeMap::new();
    }

    let points: Vec<GpsPoint> = routes.iter().flat_map(|r| r.geometry_points()).collect();
    let Some(bounds) = BoundingBox::from_points(&points) else {
        return BTreeMap::new();
    };

    let index = FlowIndex::new(segments, UtmProjection::for_point(&bounds.center()));
    debug!(
        "[FlowMatcher] Matching {} routes against {} flow segments",
        routes.len(),
        index.len()
    );

    routes
        .iter()
        .map(|route| (route.id.clone(), index.match_geometry(&route.geometry, config)))
        .collect()
}
