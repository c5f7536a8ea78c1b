//! # Route Model
//!
//! Reconciled routes: ordered stops, obstacle-annotated geometry and the
//! stop-to-stop segments derived from it.
//!
//! The StopPosition nodes of a route's geometry correspond one-to-one, in
//! order, to its stop list. Segments are never edited by hand; they are always
//! recomputed from the geometry with [`derive_segments`].

use crate::geo_utils::haversine_distance;
use crate::{BoundingBox, GpsPoint};

/// Where a stop or route record comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum StopSource {
    /// Already reconciled and stored by the caller
    Local,
    /// Raw record from the crowd-sourced map
    Osm,
}

/// A passenger stop.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Stop {
    pub id: String,
    pub source: StopSource,
    /// Id in the external source, for local stops that were imported from one
    pub external_id: Option<String>,
    pub name: String,
    pub position: GpsPoint,
}

impl Stop {
    /// A stop taken straight from the source graph.
    pub fn external(id: impl Into<String>, name: impl Into<String>, position: GpsPoint) -> Self {
        Self {
            id: id.into(),
            source: StopSource::Osm,
            external_id: None,
            name: name.into(),
            position,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ObstacleKind {
    Crossing,
    TrafficSignals,
    SpeedBump,
    /// Entry into a roundabout
    Roundabout,
}

/// One node of a route's geometry.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum GeometryNode {
    Plain {
        position: GpsPoint,
    },
    Obstacle {
        position: GpsPoint,
        kind: ObstacleKind,
    },
    StopPosition {
        position: GpsPoint,
        stop_id: String,
    },
}

impl GeometryNode {
    pub fn plain(position: GpsPoint) -> Self {
        Self::Plain { position }
    }

    pub fn obstacle(position: GpsPoint, kind: ObstacleKind) -> Self {
        Self::Obstacle { position, kind }
    }

    pub fn stop_position(position: GpsPoint, stop_id: impl Into<String>) -> Self {
        Self::StopPosition {
            position,
            stop_id: stop_id.into(),
        }
    }

    pub fn position(&self) -> &GpsPoint {
        match self {
            Self::Plain { position }
            | Self::Obstacle { position, .. }
            | Self::StopPosition { position, .. } => position,
        }
    }

    /// The referenced stop id for StopPosition nodes.
    pub fn stop_id(&self) -> Option<&str> {
        match self {
            Self::StopPosition { stop_id, .. } => Some(stop_id),
            Self::Plain { .. } | Self::Obstacle { .. } => None,
        }
    }
}

/// The span between two consecutive StopPosition nodes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Segment {
    pub stop_from_id: String,
    pub stop_to_id: String,
    /// Position in the route's segment list, starting at 0
    pub order: usize,
    /// Haversine length in meters
    pub distance: f64,
    pub crossings: u32,
    pub traffic_signals: u32,
    pub speed_bumps: u32,
    pub roundabouts: u32,
}

impl Segment {
    fn open(stop_from_id: &str, stop_to_id: &str, order: usize) -> Self {
        Self {
            stop_from_id: stop_from_id.to_string(),
            stop_to_id: stop_to_id.to_string(),
            order,
            distance: 0.0,
            crossings: 0,
            traffic_signals: 0,
            speed_bumps: 0,
            roundabouts: 0,
        }
    }

    fn count(&mut self, kind: ObstacleKind) {
        match kind {
            ObstacleKind::Crossing => self.crossings += 1,
            ObstacleKind::TrafficSignals => self.traffic_signals += 1,
            ObstacleKind::SpeedBump => self.speed_bumps += 1,
            ObstacleKind::Roundabout => self.roundabouts += 1,
        }
    }
}

/// A reconciled bus route.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Route {
    pub id: String,
    pub source: StopSource,
    pub name: String,
    pub stops: Vec<Stop>,
    /// Index in `stops` where the outbound leg ends; `None` for cyclic or unpaired routes
    pub final_stop_order: Option<usize>,
    pub geometry: Vec<GeometryNode>,
    pub segments: Vec<Segment>,
}

impl Route {
    /// Stop ids referenced by the geometry, in order.
    pub fn stop_position_ids(&self) -> Vec<&str> {
        self.geometry.iter().filter_map(GeometryNode::stop_id).collect()
    }

    pub fn geometry_points(&self) -> Vec<GpsPoint> {
        self.geometry.iter().map(|n| *n.position()).collect()
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(&self.geometry_points())
    }
}

/// Derive stop-to-stop segments from a geometry sequence.
///
/// Distance and obstacle counters accumulate between consecutive StopPosition
/// nodes and reset at each one. Nodes before the first StopPosition are not
/// part of any segment. Spans whose endpoints reference the same stop are
/// dropped without leaving a gap in `order`.
pub fn derive_segments(geometry: &[GeometryNode]) -> Vec<Segment> {
    let mut segments = Vec::new();

    let mut current: Option<(&str, Segment)> = None;
    let mut previous: Option<&GpsPoint> = None;

    for node in geometry {
        if let (Some((_, span)), Some(prev)) = (current.as_mut(), previous) {
            span.distance += haversine_distance(prev, node.position());
        }
        previous = Some(node.position());

        match node {
            GeometryNode::StopPosition { stop_id, .. } => {
                if let Some((from_id, mut span)) = current.take() {
                    if from_id != stop_id.as_str() {
                        span.stop_to_id = stop_id.clone();
                        span.order = segments.len();
                        segments.push(span);
                    }
                }
                current = Some((stop_id.as_str(), Segment::open(stop_id, stop_id, 0)));
            }
            GeometryNode::Obstacle { kind, .. } => {
                if let Some((_, span)) = current.as_mut() {
                    span.count(*kind);
                }
            }
            GeometryNode::Plain { .. } => {}
        }
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(lat: f64, lon: f64) -> GpsPoint {
        GpsPoint::new(lat, lon)
    }

    fn sample_geometry() -> Vec<GeometryNode> {
        vec![
            GeometryNode::stop_position(p(60.000, 30.0), "A"),
            GeometryNode::obstacle(p(60.001, 30.0), ObstacleKind::Crossing),
            GeometryNode::obstacle(p(60.002, 30.0), ObstacleKind::TrafficSignals),
            GeometryNode::stop_position(p(60.003, 30.0), "B"),
            GeometryNode::plain(p(60.004, 30.0)),
            GeometryNode::obstacle(p(60.005, 30.0), ObstacleKind::SpeedBump),
            GeometryNode::obstacle(p(60.006, 30.0), ObstacleKind::Roundabout),
            GeometryNode::stop_position(p(60.007, 30.0), "C"),
        ]
    }

    #[test]
    fn test_derive_segments_counts() {
        let segments = derive_segments(&sample_geometry());

        assert_eq!(segments.len(), 2);

        let first = &segments[0];
        assert_eq!((first.stop_from_id.as_str(), first.stop_to_id.as_str()), ("A", "B"));
        assert_eq!(first.order, 0);
        assert_eq!((first.crossings, first.traffic_signals), (1, 1));
        assert_eq!((first.speed_bumps, first.roundabouts), (0, 0));
        // Three hops of 0.001 degree latitude
        assert!((first.distance - 333.6).abs() < 1.0, "distance {}", first.distance);

        let second = &segments[1];
        assert_eq!((second.stop_from_id.as_str(), second.stop_to_id.as_str()), ("B", "C"));
        assert_eq!(second.order, 1);
        assert_eq!((second.crossings, second.traffic_signals), (0, 0));
        assert_eq!((second.speed_bumps, second.roundabouts), (1, 1));
        assert!((second.distance - 444.8).abs() < 1.0, "distance {}", second.distance);
    }

    #[test]
    fn test_derive_segments_skips_degenerate_span() {
        let geometry = vec![
            GeometryNode::stop_position(p(60.000, 30.0), "A"),
            GeometryNode::stop_position(p(60.001, 30.0), "A"),
            GeometryNode::obstacle(p(60.002, 30.0), ObstacleKind::Crossing),
            GeometryNode::stop_position(p(60.003, 30.0), "B"),
        ];

        let segments = derive_segments(&geometry);

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].order, 0);
        assert_eq!(segments[0].stop_from_id, "A");
        assert_eq!(segments[0].crossings, 1);
        assert!((segments[0].distance - 222.4).abs() < 1.0);
    }

    #[test]
    fn test_derive_segments_ignores_leading_nodes() {
        let mut geometry = vec![GeometryNode::obstacle(p(59.999, 30.0), ObstacleKind::Crossing)];
        geometry.extend(sample_geometry());

        let segments = derive_segments(&geometry);
        assert_eq!(segments, derive_segments(&sample_geometry()));
    }

    #[test]
    fn test_derive_segments_is_idempotent() {
        let geometry = sample_geometry();
        let route = Route {
            id: "1".into(),
            source: StopSource::Osm,
            name: "Line".into(),
            stops: Vec::new(),
            final_stop_order: None,
            segments: derive_segments(&geometry),
            geometry,
        };

        assert_eq!(derive_segments(&route.geometry), route.segments);
        assert_eq!(route.stop_position_ids(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_derive_segments_short_inputs() {
        assert!(derive_segments(&[]).is_empty());
        assert!(derive_segments(&[GeometryNode::stop_position(p(60.0, 30.0), "A")]).is_empty());
    }
}
