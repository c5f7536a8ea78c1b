//! # Geographic Utilities
//!
//! Geometry primitives shared by the route builder, the flow matcher and the
//! stop clustering engine.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`polyline_length`] | Total length of a GPS polyline in meters |
//! | [`UtmProjection`] | WGS84 <-> UTM conversion pinned to a single zone |
//! | [`project_point_on_segment`] | Perpendicular projection of a point onto a segment |
//! | [`frechet_distance`] | Discrete Fréchet distance between two planar polylines |
//!
//! ## Example
//!
//! ```rust
//! use transit_reconcile::{GpsPoint, geo_utils};
//! use transit_reconcile::geo_utils::UtmProjection;
//!
//! let a = GpsPoint::new(59.9386, 30.3141);
//! let b = GpsPoint::new(59.9396, 30.3141);
//!
//! let meters = geo_utils::haversine_distance(&a, &b);
//! assert!((meters - 111.0).abs() < 1.0);
//!
//! // Planar math must use one projection for every point involved
//! let projection = UtmProjection::for_point(&a);
//! let pa = projection.project(&a);
//! let pb = projection.project(&b);
//! assert!((pa.distance(&pb) - meters).abs() < 1.0);
//! ```
//!
//! ## Algorithm Notes
//!
//! ### UTM
//!
//! The forward and inverse transverse-Mercator series are the usual
//! Krüger-style expansions on the WGS84 ellipsoid (accurate to well under a
//! meter inside a zone). Unlike a per-point conversion, a [`UtmProjection`] is
//! built once from a reference point and then forces every other point into the
//! same zone, so distances between points that straddle a zone boundary remain
//! meaningful.
//!
//! ### Discrete Fréchet distance
//!
//! Delegated to `geo`'s [`FrechetDistance`] on the projected polylines. `geo`
//! treats an empty line as distance zero, so empty input is mapped to infinity
//! before the call.

use geo::{Coord, Distance, FrechetDistance, Haversine, LineString, Point};

use crate::GpsPoint;

// =============================================================================
// Distance Functions
// =============================================================================

/// Great-circle distance in meters between two GPS points.
///
/// # Example
///
/// ```rust
/// use transit_reconcile::{GpsPoint, geo_utils};
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Total length of a polyline in meters. Empty or single-point input returns 0.0.
pub fn polyline_length(points: &[GpsPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

// =============================================================================
// Planar Projection
// =============================================================================

/// A point in projected (UTM) coordinates, meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanarPoint {
    /// Easting
    pub x: f64,
    /// Northing
    pub y: f64,
}

impl PlanarPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance in meters.
    #[inline]
    pub fn distance(&self, other: &PlanarPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Vector from `self` to `other`.
    #[inline]
    pub fn vector_to(&self, other: &PlanarPoint) -> [f64; 2] {
        [other.x - self.x, other.y - self.y]
    }
}

const K0: f64 = 0.9996;
const E: f64 = 0.00669438;
const E2: f64 = E * E;
const E3: f64 = E2 * E;
const E_P2: f64 = E / (1.0 - E);
const R: f64 = 6_378_137.0;

const M1: f64 = 1.0 - E / 4.0 - 3.0 * E2 / 64.0 - 5.0 * E3 / 256.0;
const M2: f64 = 3.0 * E / 8.0 + 3.0 * E2 / 32.0 + 45.0 * E3 / 1024.0;
const M3: f64 = 15.0 * E2 / 256.0 + 45.0 * E3 / 1024.0;
const M4: f64 = 35.0 * E3 / 3072.0;

const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING: f64 = 10_000_000.0;

/// Wrap an angle in radians into [-pi, pi).
fn mod_angle(value: f64) -> f64 {
    use std::f64::consts::PI;
    (value + PI).rem_euclid(2.0 * PI) - PI
}

/// UTM zone number for a point, including the Norway and Svalbard exceptions.
pub fn utm_zone_number(latitude: f64, longitude: f64) -> u8 {
    if (56.0..64.0).contains(&latitude) && (3.0..12.0).contains(&longitude) {
        return 32;
    }

    if (72.0..=84.0).contains(&latitude) && longitude >= 0.0 {
        if longitude < 9.0 {
            return 31;
        } else if longitude < 21.0 {
            return 33;
        } else if longitude < 33.0 {
            return 35;
        } else if longitude < 42.0 {
            return 37;
        }
    }

    if longitude >= 180.0 {
        return 60;
    }

    (((longitude + 180.0) / 6.0).floor() as i32 + 1).clamp(1, 60) as u8
}

/// A UTM projection pinned to one zone and hemisphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtmProjection {
    zone: u8,
    northern: bool,
}

impl UtmProjection {
    /// Projection whose zone and hemisphere are taken from `reference`.
    pub fn for_point(reference: &GpsPoint) -> Self {
        Self {
            zone: utm_zone_number(reference.latitude, reference.longitude),
            northern: reference.latitude >= 0.0,
        }
    }

    pub fn zone(&self) -> u8 {
        self.zone
    }

    pub fn is_northern(&self) -> bool {
        self.northern
    }

    fn central_longitude(&self) -> f64 {
        (self.zone as f64 - 1.0) * 6.0 - 180.0 + 3.0
    }

    /// Convert a WGS84 point into this zone's planar coordinates.
    pub fn project(&self, point: &GpsPoint) -> PlanarPoint {
        let lat_rad = point.latitude.to_radians();
        let lat_sin = lat_rad.sin();
        let lat_cos = lat_rad.cos();

        let lat_tan = lat_sin / lat_cos;
        let lat_tan2 = lat_tan * lat_tan;
        let lat_tan4 = lat_tan2 * lat_tan2;

        let lon_rad = point.longitude.to_radians();
        let central_lon_rad = self.central_longitude().to_radians();

        let n = R / (1.0 - E * lat_sin * lat_sin).sqrt();
        let c = E_P2 * lat_cos * lat_cos;

        let a = lat_cos * mod_angle(lon_rad - central_lon_rad);
        let a2 = a * a;
        let a3 = a2 * a;
        let a4 = a3 * a;
        let a5 = a4 * a;
        let a6 = a5 * a;

        let m = R
            * (M1 * lat_rad - M2 * (2.0 * lat_rad).sin() + M3 * (4.0 * lat_rad).sin()
                - M4 * (6.0 * lat_rad).sin());

        let easting = K0
            * n
            * (a + a3 / 6.0 * (1.0 - lat_tan2 + c)
                + a5 / 120.0 * (5.0 - 18.0 * lat_tan2 + lat_tan4 + 72.0 * c - 58.0 * E_P2))
            + FALSE_EASTING;

        let mut northing = K0
            * (m + n
                * lat_tan
                * (a2 / 2.0
                    + a4 / 24.0 * (5.0 - lat_tan2 + 9.0 * c + 4.0 * c * c)
                    + a6 / 720.0 * (61.0 - 58.0 * lat_tan2 + lat_tan4 + 600.0 * c - 330.0 * E_P2)));

        if !self.northern {
            northing += FALSE_NORTHING;
        }

        PlanarPoint::new(easting, northing)
    }

    /// Convert planar coordinates of this zone back to WGS84.
    pub fn unproject(&self, point: &PlanarPoint) -> GpsPoint {
        let sqrt_e = (1.0 - E).sqrt();
        let e1 = (1.0 - sqrt_e) / (1.0 + sqrt_e);
        let e1_2 = e1 * e1;
        let e1_3 = e1_2 * e1;
        let e1_4 = e1_3 * e1;
        let e1_5 = e1_4 * e1;

        let p2 = 3.0 / 2.0 * e1 - 27.0 / 32.0 * e1_3 + 269.0 / 512.0 * e1_5;
        let p3 = 21.0 / 16.0 * e1_2 - 55.0 / 32.0 * e1_4;
        let p4 = 151.0 / 96.0 * e1_3 - 417.0 / 128.0 * e1_5;
        let p5 = 1097.0 / 512.0 * e1_4;

        let x = point.x - FALSE_EASTING;
        let mut y = point.y;
        if !self.northern {
            y -= FALSE_NORTHING;
        }

        let m = y / K0;
        let mu = m / (R * M1);

        let p_rad = mu
            + p2 * (2.0 * mu).sin()
            + p3 * (4.0 * mu).sin()
            + p4 * (6.0 * mu).sin()
            + p5 * (8.0 * mu).sin();

        let p_sin = p_rad.sin();
        let p_sin2 = p_sin * p_sin;
        let p_cos = p_rad.cos();

        let p_tan = p_sin / p_cos;
        let p_tan2 = p_tan * p_tan;
        let p_tan4 = p_tan2 * p_tan2;

        let ep_sin = 1.0 - E * p_sin2;
        let ep_sin_sqrt = ep_sin.sqrt();

        let n = R / ep_sin_sqrt;
        let r = (1.0 - E) / ep_sin;

        let c = E_P2 * p_cos * p_cos;
        let c2 = c * c;

        let d = x / (n * K0);
        let d2 = d * d;
        let d3 = d2 * d;
        let d4 = d3 * d;
        let d5 = d4 * d;
        let d6 = d5 * d;

        let latitude = p_rad
            - (p_tan / r)
                * (d2 / 2.0 - d4 / 24.0 * (5.0 + 3.0 * p_tan2 + 10.0 * c - 4.0 * c2 - 9.0 * E_P2))
            + d6 / 720.0 * (61.0 + 90.0 * p_tan2 + 298.0 * c + 45.0 * p_tan4 - 252.0 * E_P2 - 3.0 * c2);

        let longitude = (d - d3 / 6.0 * (1.0 + 2.0 * p_tan2 + c)
            + d5 / 120.0 * (5.0 - 2.0 * c + 28.0 * p_tan2 - 3.0 * c2 + 8.0 * E_P2 + 24.0 * p_tan4))
            / p_cos;

        let longitude = mod_angle(longitude + self.central_longitude().to_radians());

        GpsPoint::new(latitude.to_degrees(), longitude.to_degrees())
    }
}

// =============================================================================
// Segment Projection
// =============================================================================

/// Project `point` onto the segment `start`-`end` in planar coordinates.
///
/// Returns the projected point and the perpendicular distance from `point` to the
/// segment's supporting line. The projection is rejected (`None`) when its offset
/// along the segment falls outside `[padding * l, (1 - padding) * l]`, where `l`
/// is the segment length. A positive padding shrinks the accepted range, a negative
/// padding extends the segment past both endpoints. Zero-length segments never
/// accept a projection.
pub fn project_onto_planar_segment(
    start: &PlanarPoint,
    end: &PlanarPoint,
    point: &PlanarPoint,
    padding: f64,
) -> Option<(PlanarPoint, f64)> {
    let [sx, sy] = start.vector_to(end);
    let [px, py] = start.vector_to(point);

    let length = sx.hypot(sy);
    if length == 0.0 {
        return None;
    }

    let offset = (px * sx + py * sy) / length;
    let snap_distance = (px * sy - py * sx).abs() / length;

    if offset < padding * length || offset > (1.0 - padding) * length {
        return None;
    }

    let projected = PlanarPoint::new(
        start.x + offset * sx / length,
        start.y + offset * sy / length,
    );

    Some((projected, snap_distance))
}

/// Result of projecting a GPS point onto a GPS segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentProjection {
    /// Projected point on the segment
    pub point: GpsPoint,
    /// Perpendicular distance in meters
    pub distance: f64,
}

/// Project a GPS point onto a GPS segment, working in the UTM zone of `point`.
///
/// See [`project_onto_planar_segment`] for the meaning of `padding`.
pub fn project_point_on_segment(
    start: &GpsPoint,
    end: &GpsPoint,
    point: &GpsPoint,
    padding: f64,
) -> Option<SegmentProjection> {
    let projection = UtmProjection::for_point(point);
    let (projected, distance) = project_onto_planar_segment(
        &projection.project(start),
        &projection.project(end),
        &projection.project(point),
        padding,
    )?;

    Some(SegmentProjection {
        point: projection.unproject(&projected),
        distance,
    })
}

// =============================================================================
// Curve Similarity
// =============================================================================

/// Discrete Fréchet distance between two planar polylines, in meters.
///
/// Returns `f64::INFINITY` if either polyline is empty.
pub fn frechet_distance(first: &[PlanarPoint], second: &[PlanarPoint]) -> f64 {
    if first.is_empty() || second.is_empty() {
        return f64::INFINITY;
    }

    planar_line(first).frechet_distance(&planar_line(second))
}

fn planar_line(points: &[PlanarPoint]) -> LineString<f64> {
    points.iter().map(|p| Coord { x: p.x, y: p.y }).collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
