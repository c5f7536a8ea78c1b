//! # Transit Reconcile
//!
//! Reconciles fragmented public-transit source data into clean data products.
//!
//! This library provides:
//! - Route building: bi-directional bus routes with ordered stops and
//!   obstacle-annotated geometry, reconstructed from a raw road graph
//! - Flow matching: directional road-speed samples bound to route geometry
//! - Speed profiles: per-segment travel speeds for every weekday/hour bucket
//! - Stop clustering: density-based zones with a scored parameter grid search
//!
//! All engines are pure, synchronous computations over in-memory inputs. Nothing
//! is fetched or persisted here.
//!
//! ## Features
//!
//! - **`parallel`** - Enable parallel processing with rayon
//! - **`serde`** - Enable serde derives and the JSON dataset loaders
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use transit_reconcile::{GpsPoint, FlowSegment, match_flow};
//! use transit_reconcile::route::GeometryNode;
//!
//! let geometry = vec![
//!     GeometryNode::plain(GpsPoint::new(59.9300, 30.3000)),
//!     GeometryNode::plain(GpsPoint::new(59.9300, 30.3020)),
//! ];
//!
//! // A single eastbound sample along the same street
//! let flow = vec![FlowSegment::new(
//!     GpsPoint::new(59.9300, 30.2995),
//!     GpsPoint::new(59.9300, 30.3025),
//!     32.0,
//! )];
//!
//! let speeds = match_flow(&geometry, &flow);
//! assert_eq!(speeds, vec![Some(32.0), Some(32.0)]);
//! ```

use chrono::Datelike;

pub mod error;
pub use error::{Error, Result};

pub mod geo_utils;

pub mod spatial_index;
pub use spatial_index::{Neighbor, PointIndex};

// Raw road graph model (nodes, ways, relations with tags)
pub mod osm;
pub use osm::{RawNode, RawWay, Relation, RelationMember, RoadGraph, Tags};

// Reconciled route model
pub mod route;
pub use route::{derive_segments, GeometryNode, ObstacleKind, Route, Segment, Stop, StopSource};

// Route reconstruction from relations
pub mod route_builder;
pub use route_builder::{build_routes, collect_stops, LocalResolutions, RouteBuilderConfig};

// Road-speed samples bound to route geometry
pub mod flow;
pub use flow::{match_flow, match_routes, FlowIndex, FlowMatchConfig, FlowSegment};

// Per-segment speeds across time buckets
pub mod speed_profile;
pub use speed_profile::{
    build_speed_profile, segment_speeds, FlowBucket, SpeedKey, SpeedProfile, SpeedProfileConfig,
};

// Stop zones and correspondence matrices
pub mod clustering;
pub use clustering::{
    cluster, compute_score, grid_search, reaggregate, realize_profile, CandidateProfile,
    ClusteredCorrespondenceEntry, ClusteredNode, ClusteringAlgorithm, ClusteringParams,
    ClusteringScore, CorrespondenceEntry, GridSearchConfig, ReferenceNode,
};

// JSON dataset loaders
#[cfg(feature = "serde")]
pub mod dataset;

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use transit_reconcile::GpsPoint;
/// let point = GpsPoint::new(59.9386, 30.3141); // Saint Petersburg
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box used to filter the source data.
///
/// Field order follows the usual (min-lon, min-lat, max-lon, max-lat) convention.
/// `min <= max` on both axes is the caller's responsibility.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Create the smallest box containing all points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lon = f64::MAX;
        let mut max_lon = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lon = min_lon.min(p.longitude);
            max_lon = max_lon.max(p.longitude);
        }

        Some(Self::new(min_lon, min_lat, max_lon, max_lat))
    }

    /// Inclusive containment test.
    pub fn contains(&self, point: &GpsPoint) -> bool {
        point.longitude >= self.min_lon
            && point.longitude <= self.max_lon
            && point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
    }

    /// Get the center point of the box.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    /// Approximate area in square kilometers (used for logging).
    pub fn area_km2(&self) -> f64 {
        let south_west = GpsPoint::new(self.min_lat, self.min_lon);
        let north_west = GpsPoint::new(self.max_lat, self.min_lon);
        let south_east = GpsPoint::new(self.min_lat, self.max_lon);
        geo_utils::haversine_distance(&south_west, &north_west)
            * geo_utils::haversine_distance(&south_west, &south_east)
            / 1_000_000.0
    }
}

/// Day of the week, indexed Monday = 0 through Sunday = 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Weekday of a calendar date or timestamp.
    pub fn of<D: Datelike>(date: &D) -> Self {
        Self::ALL[date.weekday().num_days_from_monday() as usize]
    }
}

impl From<chrono::Weekday> for Weekday {
    fn from(day: chrono::Weekday) -> Self {
        Self::ALL[day.num_days_from_monday() as usize]
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_gps_point_validation() {
        assert!(GpsPoint::new(59.9386, 30.3141).is_valid());
        assert!(!GpsPoint::new(91.0, 0.0).is_valid());
        assert!(!GpsPoint::new(0.0, f64::NAN).is_valid());
    }

    #[test]
    fn test_bounding_box_contains_is_inclusive() {
        let bbox = BoundingBox::new(30.0, 59.0, 31.0, 60.0);
        assert!(bbox.contains(&GpsPoint::new(59.5, 30.5)));
        assert!(bbox.contains(&GpsPoint::new(59.0, 30.0)));
        assert!(bbox.contains(&GpsPoint::new(60.0, 31.0)));
        assert!(!bbox.contains(&GpsPoint::new(60.0001, 30.5)));
        assert!(!bbox.contains(&GpsPoint::new(59.5, 29.9999)));
    }

    #[test]
    fn test_bounding_box_from_points() {
        assert!(BoundingBox::from_points(&[]).is_none());

        let bbox = BoundingBox::from_points(&[
            GpsPoint::new(59.9, 30.4),
            GpsPoint::new(60.1, 30.2),
        ])
        .unwrap();
        assert_eq!(bbox, BoundingBox::new(30.2, 59.9, 30.4, 60.1));

        let center = bbox.center();
        assert!((center.latitude - 60.0).abs() < 1e-9);
        assert!((center.longitude - 30.3).abs() < 1e-9);
    }

    #[test]
    fn test_bounding_box_area() {
        // Roughly 11.1km x 5.6km at 60N
        let bbox = BoundingBox::new(30.0, 60.0, 30.1, 60.1);
        let area = bbox.area_km2();
        assert!(area > 55.0 && area < 70.0, "area was {}", area);
    }

    #[test]
    fn test_weekday_indexing() {
        assert_eq!(Weekday::Monday.index(), 0);
        assert_eq!(Weekday::Sunday.index(), 6);
        assert_eq!(Weekday::from_index(3), Some(Weekday::Thursday));
        assert_eq!(Weekday::from_index(7), None);

        // 2024-01-07 was a Sunday
        let date = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();
        assert_eq!(Weekday::of(&date), Weekday::Sunday);
        assert_eq!(Weekday::from(chrono::Weekday::Wed), Weekday::Wednesday);
    }
}
