//! # Route Builder
//!
//! Reconstructs canonical bus routes from a raw road graph.
//!
//! ## Pipeline
//!
//! For every route relation in the graph:
//!
//! 1. **Filtering** - relations with a node member outside the bounding box (or
//!    missing from the graph), fewer than two platforms or no ways are dropped.
//! 2. **Binding** - each platform is paired with a stop position through a
//!    pipeline of resolver stages (see [`binding`]). Unresolvable platforms
//!    reject the relation.
//! 3. **Tracing** - the relation's ways are walked in member order to emit the
//!    obstacle-annotated geometry (see [`trace`]).
//! 4. **Pairing** - opposite directions of the same line are joined into one
//!    round-trip route (see [`pairing`]).
//! 5. **Segments** - stop-to-stop segments are derived from the final geometry.
//!
//! A relation failing in steps 2-5 is logged and skipped; the batch carries on
//! with the remaining relations.
//!
//! ## Example
//!
//! ```rust
//! use transit_reconcile::{build_routes, BoundingBox, LocalResolutions, RoadGraph};
//!
//! let graph = RoadGraph::new();
//! let bbox = BoundingBox::new(30.0, 59.0, 31.0, 60.0);
//!
//! let routes = build_routes(&graph, &bbox, &LocalResolutions::default());
//! assert!(routes.is_empty());
//! ```

pub mod binding;
pub mod pairing;
pub mod trace;

use std::collections::HashMap;
use std::time::Instant;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::geo_utils::UtmProjection;
use crate::osm::{NodeId, RawNode, Relation, RoadGraph};
use crate::route::{derive_segments, Route, Stop, StopSource};
use crate::spatial_index::PointIndex;
use crate::BoundingBox;

use pairing::TracedRoute;

/// Configuration for route building
#[derive(Debug, Clone)]
pub struct RouteBuilderConfig {
    /// Radius for matching a platform to an existing stop position (meters).
    /// Default: 30m
    pub stop_position_radius: f64,

    /// Radius for snapping a platform onto the route's ways (meters).
    /// Default: 50m
    pub way_snap_radius: f64,

    /// Fraction of a way segment excluded at each end when synthesizing a
    /// stop position by projection. Default: 0.1
    pub projection_padding: f64,

    /// A route whose first and last stops are closer than this is cyclic (meters).
    /// Default: 1000m
    pub cyclic_tolerance: f64,

    /// Maximum Fréchet distance between a route and its reversed counterpart
    /// for the two to be joined (meters). Default: 3000m
    pub pairing_tolerance: f64,

    /// Name given to relations without a `name` tag
    pub unnamed_route: String,

    /// Name given to stops without a `name` tag
    pub unnamed_stop: String,
}

impl Default for RouteBuilderConfig {
    fn default() -> Self {
        Self {
            stop_position_radius: 30.0,
            way_snap_radius: 50.0,
            projection_padding: 0.1,
            cyclic_tolerance: 1000.0,
            pairing_tolerance: 3000.0,
            unnamed_route: "Unnamed route".to_string(),
            unnamed_stop: "Unnamed stop".to_string(),
        }
    }
}

/// Records the caller has already reconciled, keyed by raw source id.
///
/// A resolved stop replaces the raw one everywhere in the output. A resolved
/// route is returned as-is instead of the rebuilt one.
#[derive(Debug, Clone, Default)]
pub struct LocalResolutions {
    pub stops: HashMap<String, Stop>,
    pub routes: HashMap<String, Route>,
}

impl LocalResolutions {
    fn stop_for(&self, node: &RawNode, config: &RouteBuilderConfig) -> Stop {
        match self.stops.get(&node.id.to_string()) {
            Some(local) => local.clone(),
            None => Stop::external(
                node.id.to_string(),
                node.tags.name().unwrap_or(&config.unnamed_stop),
                node.position,
            ),
        }
    }

    fn stop_id_for(&self, node_id: NodeId) -> String {
        let raw = node_id.to_string();
        match self.stops.get(&raw) {
            Some(local) => local.id.clone(),
            None => raw,
        }
    }
}

// ============================================================================
// Build Context
// ============================================================================

/// State shared by every relation of one `build_routes` call.
///
/// Owns a working copy of the graph: stop positions synthesized or tagged while
/// binding one relation stay visible to the relations processed after it.
pub(crate) struct BuildContext<'a> {
    pub(crate) graph: RoadGraph,
    pub(crate) projection: UtmProjection,
    pub(crate) config: &'a RouteBuilderConfig,
    pub(crate) global_stop_positions: Vec<NodeId>,
    pub(crate) global_index: PointIndex,
    next_synthetic_id: NodeId,
}

impl<'a> BuildContext<'a> {
    pub(crate) fn new(graph: &RoadGraph, bbox: &BoundingBox, config: &'a RouteBuilderConfig) -> Self {
        let projection = UtmProjection::for_point(&bbox.center());

        let mut global_stop_positions: Vec<NodeId> = graph
            .nodes
            .values()
            .filter(|n| n.tags.is_stop_position())
            .map(|n| n.id)
            .collect();
        global_stop_positions.sort_unstable();

        let planar: Vec<_> = global_stop_positions
            .iter()
            .filter_map(|id| graph.nodes.get(id))
            .map(|n| projection.project(&n.position))
            .collect();

        Self {
            graph: graph.clone(),
            projection,
            config,
            global_index: PointIndex::new(&planar),
            global_stop_positions,
            next_synthetic_id: graph.min_node_id().min(0) - 1,
        }
    }

    pub(crate) fn node(&self, relation: &Relation, id: NodeId) -> Result<&RawNode> {
        self.graph.nodes.get(&id).ok_or(Error::MissingMember {
            relation_id: relation.id,
            member_id: id,
        })
    }

    /// A fresh negative id that collides with no source node.
    pub(crate) fn allocate_node_id(&mut self) -> NodeId {
        let id = self.next_synthetic_id;
        self.next_synthetic_id -= 1;
        id
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Build routes with the default configuration.
pub fn build_routes(
    graph: &RoadGraph,
    bbox: &BoundingBox,
    resolutions: &LocalResolutions,
) -> Vec<Route> {
    build_routes_with_config(graph, bbox, resolutions, &RouteBuilderConfig::default())
}

/// Build every route of the graph that lies inside `bbox`.
pub fn build_routes_with_config(
    graph: &RoadGraph,
    bbox: &BoundingBox,
    resolutions: &LocalResolutions,
    config: &RouteBuilderConfig,
) -> Vec<Route> {
    let start = Instant::now();
    info!(
        "[RouteBuilder] Building routes from {} relations, {} ways, {} nodes",
        graph.relations.len(),
        graph.ways.len(),
        graph.nodes.len()
    );

    let candidates: Vec<&Relation> = graph
        .relations
        .iter()
        .filter(|relation| {
            if !graph.relation_within(relation, bbox) {
                debug!("[RouteBuilder] Relation {} leaves the bounding box", relation.id);
                return false;
            }
            if relation.platform_ids().len() < 2 || relation.way_ids().is_empty() {
                debug!("[RouteBuilder] Relation {} lacks platforms or ways", relation.id);
                return false;
            }
            true
        })
        .collect();

    let mut ctx = BuildContext::new(graph, bbox, config);

    let mut traced = Vec::with_capacity(candidates.len());
    for relation in candidates {
        match build_relation(&mut ctx, relation, resolutions) {
            Ok(route) => traced.push(route),
            Err(e) => warn!("[RouteBuilder] Dropping relation {}: {}", relation.id, e),
        }
    }

    let paired = pairing::pair_routes(traced, &ctx.projection, config);

    let routes: Vec<Route> = paired
        .into_iter()
        .map(|paired| {
            let id = paired.route.relation_id.to_string();
            if let Some(local) = resolutions.routes.get(&id) {
                return local.clone();
            }
            Route {
                id,
                source: StopSource::Osm,
                name: paired.route.name,
                stops: paired.route.stops,
                final_stop_order: paired.final_stop_order,
                segments: derive_segments(&paired.route.geometry),
                geometry: paired.route.geometry,
            }
        })
        .collect();

    info!(
        "[RouteBuilder] Built {} routes over {:.2} km^2 in {:?}",
        routes.len(),
        bbox.area_km2(),
        start.elapsed()
    );

    routes
}

/// Bind, trace and collect the stops of a single relation.
fn build_relation(
    ctx: &mut BuildContext<'_>,
    relation: &Relation,
    resolutions: &LocalResolutions,
) -> Result<TracedRoute> {
    let stop_positions = binding::bind_platforms(ctx, relation)?;

    let platform_ids = relation.platform_ids();
    let stop_ids: Vec<String> = platform_ids
        .iter()
        .map(|&id| resolutions.stop_id_for(id))
        .collect();

    let geometry = trace::trace_geometry(&ctx.graph, relation, &stop_positions, &stop_ids)?;

    let stops = platform_ids
        .iter()
        .map(|&id| Ok(resolutions.stop_for(ctx.node(relation, id)?, ctx.config)))
        .collect::<Result<Vec<Stop>>>()?;

    Ok(TracedRoute {
        relation_id: relation.id,
        name: relation
            .tags
            .name()
            .unwrap_or(&ctx.config.unnamed_route)
            .to_string(),
        stops,
        geometry,
    })
}

/// Every bus stop of the graph inside `bbox`, ordered by source id.
pub fn collect_stops(
    graph: &RoadGraph,
    bbox: &BoundingBox,
    resolutions: &LocalResolutions,
) -> Vec<Stop> {
    collect_stops_with_config(graph, bbox, resolutions, &RouteBuilderConfig::default())
}

pub fn collect_stops_with_config(
    graph: &RoadGraph,
    bbox: &BoundingBox,
    resolutions: &LocalResolutions,
    config: &RouteBuilderConfig,
) -> Vec<Stop> {
    let mut nodes: Vec<&RawNode> = graph
        .nodes
        .values()
        .filter(|n| n.tags.is_bus_stop() && bbox.contains(&n.position))
        .collect();
    nodes.sort_unstable_by_key(|n| n.id);

    nodes
        .into_iter()
        .map(|n| resolutions.stop_for(n, config))
        .collect()
}

// ============================================================================
// Test Fixtures
// ============================================================================

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::osm::{NodeId, RawNode, RawWay, Relation, RelationMember, RoadGraph, Tags, WayId};
    use crate::GpsPoint;

    /// Degrees of latitude per meter.
    pub const LAT_M: f64 = 1.0 / 111_195.0;
    /// Degrees of longitude per meter at 60N.
    pub const LON_M: f64 = 1.0 / 55_597.0;

    /// A point `north` and `east` meters away from (60N, 30E).
    pub fn at(north: f64, east: f64) -> GpsPoint {
        GpsPoint::new(60.0 + north * LAT_M, 30.0 + east * LON_M)
    }

    pub fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs.iter().copied().collect()
    }

    pub fn add_node(graph: &mut RoadGraph, id: NodeId, north: f64, east: f64) {
        graph.add_node(RawNode::new(id, at(north, east)));
    }

    pub fn add_tagged(graph: &mut RoadGraph, id: NodeId, north: f64, east: f64, pairs: &[(&str, &str)]) {
        graph.add_node(RawNode::new(id, at(north, east)).with_tags(tags(pairs)));
    }

    pub fn add_way(graph: &mut RoadGraph, id: WayId, node_ids: &[NodeId]) {
        graph.add_way(RawWay::new(id, node_ids.to_vec()));
    }

    pub fn relation(id: i64, name: &str, nodes: &[(NodeId, &str)], ways: &[WayId]) -> Relation {
        let mut members: Vec<RelationMember> = nodes
            .iter()
            .map(|&(id, role)| RelationMember::node(id, role))
            .collect();
        members.extend(ways.iter().map(|&id| RelationMember::way(id)));
        Relation {
            id,
            tags: tags(&[("name", name), ("route", "bus")]),
            members,
        }
    }

    /// A straight eastbound street at north = 0 with three platforms 20m north
    /// of it and stop positions on the street below them.
    ///
    /// Street nodes: 1 (0m), 2 (300m), 3 (600m), 4 (900m), 5 (1200m), split into
    /// way 100 = [1, 2, 3] and way 101 = [3, 4, 5]. Stop positions are 1, 3
    /// and 5; platforms are 11, 13 and 15.
    pub fn eastbound_graph() -> RoadGraph {
        let mut graph = RoadGraph::new();
        add_tagged(&mut graph, 1, 0.0, 0.0, &[("public_transport", "stop_position")]);
        add_tagged(&mut graph, 2, 0.0, 300.0, &[("highway", "crossing")]);
        add_tagged(&mut graph, 3, 0.0, 600.0, &[("public_transport", "stop_position")]);
        add_tagged(&mut graph, 4, 0.0, 900.0, &[("highway", "traffic_signals")]);
        add_tagged(&mut graph, 5, 0.0, 1200.0, &[("public_transport", "stop_position")]);

        add_tagged(&mut graph, 11, 20.0, 0.0, &[("highway", "bus_stop"), ("name", "West")]);
        add_tagged(&mut graph, 13, 20.0, 600.0, &[("highway", "bus_stop"), ("name", "Middle")]);
        add_tagged(&mut graph, 15, 20.0, 1200.0, &[("highway", "bus_stop")]);

        add_way(&mut graph, 100, &[1, 2, 3]);
        add_way(&mut graph, 101, &[3, 4, 5]);

        graph.add_relation(relation(
            500,
            "7 East",
            &[(11, "platform"), (1, "stop"), (13, "platform"), (3, "stop"), (15, "platform"), (5, "stop")],
            &[100, 101],
        ));
        graph
    }
}
