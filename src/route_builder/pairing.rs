//! Round-trip pairing.
//!
//! Map data stores the two directions of a line as separate relations. A route
//! is joined with the unpaired route whose reversed stop sequence is closest
//! to its own by discrete Fréchet distance, within tolerance. Cyclic routes,
//! whose first and last stops nearly coincide, are left alone.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::geo_utils::{frechet_distance, haversine_distance, PlanarPoint, UtmProjection};
use crate::osm::RelationId;
use crate::route::{GeometryNode, Stop};

use super::RouteBuilderConfig;

/// A traced relation before pairing.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TracedRoute {
    pub(crate) relation_id: RelationId,
    pub(crate) name: String,
    pub(crate) stops: Vec<Stop>,
    pub(crate) geometry: Vec<GeometryNode>,
}

impl TracedRoute {
    fn first_stop(&self) -> Option<&Stop> {
        self.stops.first()
    }

    fn last_stop(&self) -> Option<&Stop> {
        self.stops.last()
    }
}

/// A route after pairing; `final_stop_order` is set when two legs were joined.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PairedRoute {
    pub(crate) route: TracedRoute,
    pub(crate) final_stop_order: Option<usize>,
}

/// True when the first and last stops are closer than `tolerance` meters.
pub fn is_cyclic(stops: &[Stop], tolerance: f64) -> bool {
    match (stops.first(), stops.last()) {
        (Some(first), Some(last)) => haversine_distance(&first.position, &last.position) < tolerance,
        _ => false,
    }
}

/// Memoized Fréchet distances between routes, keyed by unordered id pair.
///
/// Lives for a single `build_routes` call.
struct DistanceCache<'a> {
    projection: &'a UtmProjection,
    distances: HashMap<(RelationId, RelationId), f64>,
}

impl<'a> DistanceCache<'a> {
    fn new(projection: &'a UtmProjection) -> Self {
        Self {
            projection,
            distances: HashMap::new(),
        }
    }

    fn planar(&self, stops: &[Stop]) -> Vec<PlanarPoint> {
        stops.iter().map(|s| self.projection.project(&s.position)).collect()
    }

    /// Fréchet distance between `a`'s stops and `b`'s stops reversed.
    fn distance(&mut self, a: &TracedRoute, b: &TracedRoute) -> f64 {
        let key = if a.relation_id <= b.relation_id {
            (a.relation_id, b.relation_id)
        } else {
            (b.relation_id, a.relation_id)
        };

        if let Some(&cached) = self.distances.get(&key) {
            return cached;
        }

        let forward = self.planar(&a.stops);
        let mut backward = self.planar(&b.stops);
        backward.reverse();

        let distance = frechet_distance(&forward, &backward);
        self.distances.insert(key, distance);
        distance
    }
}

/// Join two legs, ordering them so the gap at the junction is smallest.
///
/// The joined route keeps `first`'s id and name. Returns the route and the
/// index of the leading leg's final stop.
fn join(first: &TracedRoute, second: &TracedRoute) -> (TracedRoute, usize) {
    let gap = |from: Option<&Stop>, to: Option<&Stop>| match (from, to) {
        (Some(from), Some(to)) => haversine_distance(&from.position, &to.position),
        _ => f64::INFINITY,
    };

    let first_then_second = gap(first.last_stop(), second.first_stop());
    let second_then_first = gap(second.last_stop(), first.first_stop());

    let (lead, trail) = if first_then_second < second_then_first {
        (first, second)
    } else {
        (second, first)
    };

    let joined = TracedRoute {
        relation_id: first.relation_id,
        name: first.name.clone(),
        stops: lead.stops.iter().chain(&trail.stops).cloned().collect(),
        geometry: lead.geometry.iter().chain(&trail.geometry).cloned().collect(),
    };

    (joined, lead.stops.len().saturating_sub(1))
}

/// Pair routes into round trips. Every input route appears in exactly one
/// output entry, either alone or joined with its counterpart.
///
/// Cyclic routes are never paired: they are neither joined themselves nor
/// offered as a counterpart to a non-cyclic route.
pub(crate) fn pair_routes(
    routes: Vec<TracedRoute>,
    projection: &UtmProjection,
    config: &RouteBuilderConfig,
) -> Vec<PairedRoute> {
    let cyclic: Vec<bool> = routes
        .iter()
        .map(|r| is_cyclic(&r.stops, config.cyclic_tolerance))
        .collect();

    let mut cache = DistanceCache::new(projection);
    let mut consumed: HashSet<usize> = HashSet::new();
    let mut paired = Vec::with_capacity(routes.len());

    for (i, route) in routes.iter().enumerate() {
        if !consumed.insert(i) {
            continue;
        }

        if cyclic[i] {
            paired.push(PairedRoute {
                route: route.clone(),
                final_stop_order: None,
            });
            continue;
        }

        let mut best: Option<(usize, f64)> = None;
        for (j, other) in routes.iter().enumerate() {
            if consumed.contains(&j) || cyclic[j] {
                continue;
            }
            let distance = cache.distance(route, other);
            if distance < config.pairing_tolerance && best.map_or(true, |(_, d)| distance < d) {
                best = Some((j, distance));
            }
        }

        match best {
            Some((j, distance)) => {
                consumed.insert(j);
                debug!(
                    "[RouteBuilder] Pairing relation {} with {} (Fréchet {:.0}m)",
                    route.relation_id, routes[j].relation_id, distance
                );
                let (joined, final_stop_order) = join(route, &routes[j]);
                paired.push(PairedRoute {
                    route: joined,
                    final_stop_order: Some(final_stop_order),
                });
            }
            None => paired.push(PairedRoute {
                route: route.clone(),
                final_stop_order: None,
            }),
        }
    }

    paired
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::at;
    use super::*;
    use crate::route::StopSource;
    use crate::GpsPoint;

    /// Meters per degree of latitude for the haversine radius used by geo.
    const METERS_PER_DEGREE: f64 = 6_371_008.8 * std::f64::consts::PI / 180.0;

    fn stop(id: &str, position: GpsPoint) -> Stop {
        Stop {
            id: id.to_string(),
            source: StopSource::Osm,
            external_id: None,
            name: id.to_string(),
            position,
        }
    }

    fn route(id: RelationId, stops: Vec<Stop>) -> TracedRoute {
        let geometry = stops
            .iter()
            .map(|s| GeometryNode::stop_position(s.position, s.id.clone()))
            .collect();
        TracedRoute {
            relation_id: id,
            name: format!("Route {}", id),
            stops,
            geometry,
        }
    }

    fn projection() -> UtmProjection {
        UtmProjection::for_point(&at(0.0, 0.0))
    }

    #[test]
    fn test_cyclic_threshold() {
        let start = GpsPoint::new(60.0, 30.0);
        let near = GpsPoint::new(60.0 + 999.0 / METERS_PER_DEGREE, 30.0);
        let far = GpsPoint::new(60.0 + 1001.0 / METERS_PER_DEGREE, 30.0);

        assert!(is_cyclic(&[stop("a", start), stop("b", near)], 1000.0));
        assert!(!is_cyclic(&[stop("a", start), stop("b", far)], 1000.0));
        assert!(!is_cyclic(&[], 1000.0));
    }

    #[test]
    fn test_mirror_routes_join_once() {
        // Outbound runs east along the street, inbound returns 20m north of it
        // and ends 100m short of the outbound start
        let outbound = route(1, vec![stop("a", at(0.0, 0.0)), stop("b", at(0.0, 1500.0)), stop("c", at(0.0, 3000.0))]);
        let inbound = route(2, vec![stop("d", at(20.0, 3000.0)), stop("e", at(20.0, 1500.0)), stop("f", at(20.0, 100.0))]);

        let paired = pair_routes(vec![outbound, inbound], &projection(), &RouteBuilderConfig::default());

        assert_eq!(paired.len(), 1);
        let joined = &paired[0];
        assert_eq!(joined.route.relation_id, 1);
        assert_eq!(joined.route.name, "Route 1");
        assert_eq!(joined.final_stop_order, Some(2));

        let ids: Vec<&str> = joined.route.stops.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d", "e", "f"]);
        assert_eq!(joined.route.geometry.len(), 6);
    }

    #[test]
    fn test_join_orients_by_gap() {
        // The inbound leg is listed first; its end meets the outbound start
        let inbound = route(2, vec![stop("d", at(20.0, 3000.0)), stop("e", at(20.0, 1500.0)), stop("f", at(20.0, 0.0))]);
        let outbound = route(
            1,
            vec![
                stop("a", at(0.0, 0.0)),
                stop("b", at(0.0, 1000.0)),
                stop("c", at(0.0, 2000.0)),
                stop("g", at(0.0, 3000.0)),
            ],
        );

        let paired = pair_routes(vec![inbound, outbound], &projection(), &RouteBuilderConfig::default());

        assert_eq!(paired.len(), 1);
        let joined = &paired[0];
        // Named after the route being processed. Both junction gaps are 20m and
        // a tie puts the candidate leg first
        assert_eq!(joined.route.relation_id, 2);
        let ids: Vec<&str> = joined.route.stops.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "g", "d", "e", "f"]);
        assert_eq!(joined.final_stop_order, Some(3));
    }

    #[test]
    fn test_join_leading_leg_by_strict_gap() {
        let first = route(1, vec![stop("a", at(0.0, 0.0)), stop("b", at(0.0, 3000.0))]);
        let second = route(2, vec![stop("c", at(10.0, 3000.0)), stop("d", at(300.0, 0.0))]);

        // first end -> second start is 10m, second end -> first start 300m
        let (joined, final_stop_order) = join(&first, &second);
        let ids: Vec<&str> = joined.stops.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(final_stop_order, 1);

        let (joined, final_stop_order) = join(&second, &first);
        let ids: Vec<&str> = joined.stops.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(joined.relation_id, 2);
        assert_eq!(final_stop_order, 1);
    }

    #[test]
    fn test_distant_routes_stay_single() {
        let a = route(1, vec![stop("a", at(0.0, 0.0)), stop("b", at(0.0, 3000.0))]);
        let b = route(2, vec![stop("c", at(20_000.0, 3000.0)), stop("d", at(20_000.0, 0.0))]);

        let paired = pair_routes(vec![a, b], &projection(), &RouteBuilderConfig::default());
        assert_eq!(paired.len(), 2);
        assert!(paired.iter().all(|p| p.final_stop_order.is_none()));
    }

    #[test]
    fn test_cyclic_route_is_not_paired() {
        let cyclic = route(1, vec![stop("a", at(0.0, 0.0)), stop("b", at(0.0, 2000.0)), stop("c", at(100.0, 0.0))]);
        let other = route(2, vec![stop("d", at(100.0, 0.0)), stop("e", at(0.0, 2000.0)), stop("f", at(0.0, 2500.0))]);

        let paired = pair_routes(vec![cyclic, other], &projection(), &RouteBuilderConfig::default());
        assert_eq!(paired.len(), 2);
        assert_eq!(paired[0].route.relation_id, 1);
        assert_eq!(paired[0].final_stop_order, None);
        assert_eq!(paired[1].route.relation_id, 2);
        assert_eq!(paired[1].final_stop_order, None);
    }

    #[test]
    fn test_cyclic_route_is_not_a_counterpart() {
        let other = route(2, vec![stop("d", at(100.0, 0.0)), stop("e", at(0.0, 2000.0)), stop("f", at(0.0, 2500.0))]);
        let cyclic = route(1, vec![stop("a", at(0.0, 0.0)), stop("b", at(0.0, 2000.0)), stop("c", at(100.0, 0.0))]);

        // The non-cyclic route comes first and must not claim the cyclic one
        let paired = pair_routes(vec![other, cyclic], &projection(), &RouteBuilderConfig::default());
        assert_eq!(paired.len(), 2);
        assert_eq!(paired[0].route.relation_id, 2);
        assert_eq!(paired[0].final_stop_order, None);
        assert_eq!(paired[1].route.relation_id, 1);
        assert_eq!(paired[1].final_stop_order, None);
    }

    #[test]
    fn test_closest_candidate_wins() {
        let outbound = route(1, vec![stop("a", at(0.0, 0.0)), stop("b", at(0.0, 3000.0))]);
        let far = route(2, vec![stop("c", at(500.0, 3000.0)), stop("d", at(500.0, 0.0))]);
        let near = route(3, vec![stop("e", at(20.0, 3000.0)), stop("f", at(20.0, 200.0))]);

        let paired = pair_routes(vec![outbound, far, near], &projection(), &RouteBuilderConfig::default());

        assert_eq!(paired.len(), 2);
        let ids: Vec<&str> = paired[0].route.stops.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "e", "f"]);
        assert_eq!(paired[1].route.relation_id, 2);
        assert_eq!(paired[1].final_stop_order, None);
    }
}
