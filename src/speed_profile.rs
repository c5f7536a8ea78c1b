//! # Speed Profile
//!
//! Runs the flow matcher across time buckets and collapses per-node speeds
//! into one travel speed per route segment.
//!
//! Within a segment, each geometry hop with a matched speed contributes its
//! length and the time needed to cover it at that speed, so the segment speed
//! is the distance-weighted harmonic mean of its hops. Hops without a match are
//! left out; a segment with no matched hop has no speed.

use std::collections::BTreeMap;
use std::time::Instant;

use log::info;

use crate::flow::{match_routes, FlowMatchConfig, FlowSegment};
use crate::geo_utils::haversine_distance;
use crate::route::{GeometryNode, Route};
use crate::{BoundingBox, Weekday};

/// Configuration for speed profile computation
#[derive(Debug, Clone)]
pub struct SpeedProfileConfig {
    /// Flow matching parameters
    pub flow: FlowMatchConfig,

    /// Speed substituted when a matched sample reports 0 (km/h).
    /// Default: 40
    pub fallback_speed: f64,
}

impl Default for SpeedProfileConfig {
    fn default() -> Self {
        Self {
            flow: FlowMatchConfig::default(),
            fallback_speed: 40.0,
        }
    }
}

/// Flow samples observed in one weekday/hour bucket.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowBucket {
    pub weekday: Weekday,
    /// Hour of day, 0-23
    pub hour: u8,
    pub segments: Vec<FlowSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpeedKey {
    pub route_id: String,
    pub weekday: Weekday,
    pub hour: u8,
}

/// Segment speeds keyed by (route, weekday, hour), iterated in key order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeedProfile {
    entries: BTreeMap<SpeedKey, Vec<Option<f64>>>,
}

impl SpeedProfile {
    /// Speeds aligned with the route's segments, if the bucket was computed.
    pub fn get(&self, route_id: &str, weekday: Weekday, hour: u8) -> Option<&[Option<f64>]> {
        let key = SpeedKey {
            route_id: route_id.to_string(),
            weekday,
            hour,
        };
        self.entries.get(&key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SpeedKey, &Vec<Option<f64>>)> {
        self.entries.iter()
    }
}

impl FromIterator<(SpeedKey, Vec<Option<f64>>)> for SpeedProfile {
    fn from_iter<I: IntoIterator<Item = (SpeedKey, Vec<Option<f64>>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

// JSON object keys must be strings, so the profile travels as a list of pairs
#[cfg(feature = "serde")]
impl serde::Serialize for SpeedProfile {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for SpeedProfile {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let entries = Vec::<(SpeedKey, Vec<Option<f64>>)>::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

// ============================================================================
// Segment collapse
// ============================================================================

#[derive(Debug, Default)]
struct Span {
    /// km
    distance: f64,
    /// hours
    time: f64,
}

impl Span {
    fn add(&mut self, distance_km: f64, speed: f64) {
        self.distance += distance_km;
        self.time += distance_km / speed;
    }

    fn speed(&self) -> Option<f64> {
        (self.time > 0.0).then(|| self.distance / self.time)
    }
}

/// Collapse per-node speeds into one speed per segment of `route`.
///
/// `node_speeds[i]` is the speed of the hop from geometry node `i` to `i + 1`.
/// The result lines up with `route.segments`.
pub fn segment_speeds(route: &Route, node_speeds: &[Option<f64>], fallback_speed: f64) -> Vec<Option<f64>> {
    collapse(&route.geometry, node_speeds, fallback_speed)
}

fn collapse(geometry: &[GeometryNode], node_speeds: &[Option<f64>], fallback_speed: f64) -> Vec<Option<f64>> {
    let mut speeds = Vec::new();
    let mut from = geometry.first().and_then(GeometryNode::stop_id);
    let mut span = Span::default();

    for (hop, speed) in geometry.windows(2).zip(node_speeds) {
        let (a, b) = (&hop[0], &hop[1]);

        if let (Some(_), Some(speed)) = (from, *speed) {
            let speed = if speed == 0.0 { fallback_speed } else { speed };
            span.add(haversine_distance(a.position(), b.position()) / 1000.0, speed);
        }

        if let Some(to) = b.stop_id() {
            if from.is_some_and(|from| from != to) {
                speeds.push(span.speed());
            }
            span = Span::default();
            from = Some(to);
        }
    }

    speeds
}

// ============================================================================
// Buckets
// ============================================================================

fn compute_bucket(
    routes: &[Route],
    bounds: &BoundingBox,
    bucket: &FlowBucket,
    config: &SpeedProfileConfig,
) -> Vec<(SpeedKey, Vec<Option<f64>>)> {
    let segments: Vec<FlowSegment> = bucket
        .segments
        .iter()
        .filter(|s| bounds.contains(&s.start) && bounds.contains(&s.end))
        .copied()
        .collect();

    let matched = match_routes(routes, &segments, &config.flow);

    routes
        .iter()
        .map(|route| {
            let speeds = match matched.get(&route.id) {
                Some(node_speeds) => segment_speeds(route, node_speeds, config.fallback_speed),
                None => vec![None; route.segments.len()],
            };
            let key = SpeedKey {
                route_id: route.id.clone(),
                weekday: bucket.weekday,
                hour: bucket.hour,
            };
            (key, speeds)
        })
        .collect()
}

/// Compute segment speeds for every route in every bucket.
///
/// Flow samples are first restricted to the routes' joint bounding box.
pub fn build_speed_profile(routes: &[Route], buckets: &[FlowBucket], config: &SpeedProfileConfig) -> SpeedProfile {
    let start = Instant::now();

    let points: Vec<_> = routes.iter().flat_map(Route::geometry_points).collect();
    let Some(bounds) = BoundingBox::from_points(&points) else {
        return SpeedProfile::default();
    };

    #[cfg(feature = "parallel")]
    let profile: SpeedProfile = {
        use rayon::prelude::*;
        buckets
            .par_iter()
            .map(|bucket| compute_bucket(routes, &bounds, bucket, config))
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let profile: SpeedProfile = buckets
        .iter()
        .flat_map(|bucket| compute_bucket(routes, &bounds, bucket, config))
        .collect();

    info!(
        "[SpeedProfile] {} routes x {} buckets -> {} entries in {:?}",
        routes.len(),
        buckets.len(),
        profile.len(),
        start.elapsed()
    );

    profile
}
