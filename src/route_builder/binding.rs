//! Platform to stop-position binding.
//!
//! Every platform of a relation must be paired with the stop position where
//! the vehicle actually halts. Resolution runs as a pipeline of stages, most
//! authoritative first. Each stage only looks at platforms still unresolved and
//! the pipeline stops as soon as every platform has a stop position:
//!
//! | Stage | Source |
//! |-------|--------|
//! | [`ResolverStage::RelationMembers`] | The relation's own `stop` members within 30m |
//! | [`ResolverStage::GlobalIndex`] | Any stop position of the graph within 30m |
//! | [`ResolverStage::WayProjection`] | Snap onto the relation's ways within 50m |
//!
//! The last stage edits the working graph: it either tags an existing way node
//! as a stop position or splices a synthesized one into the way.

use std::collections::BTreeSet;

use log::debug;

use crate::error::{Error, Result};
use crate::geo_utils::{haversine_distance, project_onto_planar_segment, PlanarPoint};
use crate::osm::{NodeId, RawNode, Relation, Tags, WayId};
use crate::spatial_index::PointIndex;
use crate::GpsPoint;

use super::BuildContext;

/// Stop position chosen for each platform, by platform position in the relation.
pub(crate) type Assignment = Vec<Option<NodeId>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverStage {
    RelationMembers,
    GlobalIndex,
    WayProjection,
}

impl ResolverStage {
    pub const PIPELINE: [ResolverStage; 3] = [
        ResolverStage::RelationMembers,
        ResolverStage::GlobalIndex,
        ResolverStage::WayProjection,
    ];

    fn resolve(
        self,
        ctx: &mut BuildContext<'_>,
        relation: &Relation,
        platforms: &[Platform],
        assignment: &mut Assignment,
    ) -> Result<()> {
        match self {
            ResolverStage::RelationMembers => resolve_from_members(ctx, relation, platforms, assignment),
            ResolverStage::GlobalIndex => {
                resolve_from_global_index(ctx, platforms, assignment);
                Ok(())
            }
            ResolverStage::WayProjection => resolve_by_projection(ctx, relation, platforms, assignment),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Platform {
    id: NodeId,
    position: GpsPoint,
    planar: PlanarPoint,
}

fn unresolved(assignment: &Assignment) -> impl Iterator<Item = usize> + '_ {
    assignment
        .iter()
        .enumerate()
        .filter(|(_, a)| a.is_none())
        .map(|(i, _)| i)
}

/// Pair every platform of `relation` with a stop position, in platform order.
pub(crate) fn bind_platforms(ctx: &mut BuildContext<'_>, relation: &Relation) -> Result<Vec<NodeId>> {
    let platforms = relation
        .platform_ids()
        .into_iter()
        .map(|id| {
            let node = ctx.node(relation, id)?;
            Ok(Platform {
                id,
                position: node.position,
                planar: ctx.projection.project(&node.position),
            })
        })
        .collect::<Result<Vec<Platform>>>()?;

    let mut assignment: Assignment = vec![None; platforms.len()];

    for stage in ResolverStage::PIPELINE {
        if assignment.iter().all(Option::is_some) {
            break;
        }
        stage.resolve(ctx, relation, &platforms, &mut assignment)?;
        debug!(
            "[RouteBuilder] Relation {}: {:?} left {} platforms unresolved",
            relation.id,
            stage,
            unresolved(&assignment).count()
        );
    }

    platforms
        .iter()
        .zip(assignment)
        .map(|(platform, stop_position)| {
            stop_position.ok_or(Error::StopPositionUnresolved {
                relation_id: relation.id,
                platform_id: platform.id,
            })
        })
        .collect()
}

// ============================================================================
// Index Stages
// ============================================================================

fn resolve_from_members(
    ctx: &BuildContext<'_>,
    relation: &Relation,
    platforms: &[Platform],
    assignment: &mut Assignment,
) -> Result<()> {
    let members = relation.stop_position_ids();
    let planar = members
        .iter()
        .map(|&id| Ok(ctx.projection.project(&ctx.node(relation, id)?.position)))
        .collect::<Result<Vec<PlanarPoint>>>()?;
    let index = PointIndex::new(&planar);

    let radius = ctx.config.stop_position_radius;
    for (slot, platform) in assignment.iter_mut().zip(platforms) {
        if slot.is_none() {
            *slot = index
                .nearest_within(&platform.planar, radius)
                .map(|hit| members[hit.index]);
        }
    }
    Ok(())
}

fn resolve_from_global_index(ctx: &BuildContext<'_>, platforms: &[Platform], assignment: &mut Assignment) {
    let radius = ctx.config.stop_position_radius;
    for (slot, platform) in assignment.iter_mut().zip(platforms) {
        if slot.is_none() {
            *slot = ctx
                .global_index
                .nearest_within(&platform.planar, radius)
                .map(|hit| ctx.global_stop_positions[hit.index]);
        }
    }
}

// ============================================================================
// Way Projection Stage
// ============================================================================

/// A hop between consecutive nodes of one of the relation's ways.
#[derive(Debug, Clone, Copy)]
struct WaySegment {
    way_id: WayId,
    /// Index of `start` in the way's node list
    index: usize,
    start: NodeId,
    end: NodeId,
}

/// Where the platform lands on a way segment. Declaration order is the
/// preference order on equal distances.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Landing {
    Start,
    Projected(PlanarPoint),
    End,
}

#[derive(Debug, Clone, Copy)]
struct Snap {
    segment: WaySegment,
    landing: Landing,
    distance: f64,
}

fn way_segments(ctx: &BuildContext<'_>, relation: &Relation) -> Result<Vec<WaySegment>> {
    let mut segments = Vec::new();
    for way_id in relation.way_ids() {
        let way = ctx.graph.ways.get(&way_id).ok_or(Error::MissingMember {
            relation_id: relation.id,
            member_id: way_id,
        })?;
        for (index, pair) in way.node_ids.windows(2).enumerate() {
            segments.push(WaySegment {
                way_id,
                index,
                start: pair[0],
                end: pair[1],
            });
        }
    }
    Ok(segments)
}

/// Closest landing of the platform on one segment: start node, interior
/// projection or end node.
fn snap_to_segment(
    ctx: &BuildContext<'_>,
    relation: &Relation,
    platform: &Platform,
    segment: WaySegment,
) -> Result<Snap> {
    let start = ctx.node(relation, segment.start)?;
    let end = ctx.node(relation, segment.end)?;

    let mut best = Snap {
        segment,
        landing: Landing::Start,
        distance: haversine_distance(&start.position, &platform.position),
    };

    let projected = project_onto_planar_segment(
        &ctx.projection.project(&start.position),
        &ctx.projection.project(&end.position),
        &platform.planar,
        ctx.config.projection_padding,
    );
    if let Some((point, distance)) = projected {
        if distance < best.distance {
            best.landing = Landing::Projected(point);
            best.distance = distance;
        }
    }

    let end_distance = haversine_distance(&end.position, &platform.position);
    if end_distance < best.distance {
        best.landing = Landing::End;
        best.distance = end_distance;
    }

    Ok(best)
}

fn resolve_by_projection(
    ctx: &mut BuildContext<'_>,
    relation: &Relation,
    platforms: &[Platform],
    assignment: &mut Assignment,
) -> Result<()> {
    let pending: Vec<usize> = unresolved(assignment).collect();

    for i in pending {
        let platform = &platforms[i];

        // Rebuilt for every platform: a splice shifts the indices of later hops
        let segments = way_segments(ctx, relation)?;
        let endpoints = segments
            .iter()
            .flat_map(|s| [s.start, s.end])
            .map(|id| Ok(ctx.projection.project(&ctx.node(relation, id)?.position)))
            .collect::<Result<Vec<PlanarPoint>>>()?;
        let index = PointIndex::new(&endpoints);

        let nearby: BTreeSet<usize> = index
            .within_radius(&platform.planar, ctx.config.way_snap_radius)
            .into_iter()
            .map(|hit| hit.index / 2)
            .collect();

        let mut best: Option<Snap> = None;
        for &k in &nearby {
            let snap = snap_to_segment(ctx, relation, platform, segments[k])?;
            if best.map_or(true, |b| snap.distance < b.distance) {
                best = Some(snap);
            }
        }

        let Some(best) = best else {
            return Err(Error::StopPositionUnresolved {
                relation_id: relation.id,
                platform_id: platform.id,
            });
        };

        assignment[i] = Some(apply_snap(ctx, best));
    }

    Ok(())
}

/// Materialize a snap in the working graph and return the stop-position id.
fn apply_snap(ctx: &mut BuildContext<'_>, snap: Snap) -> NodeId {
    let mark = |tags: &mut Tags| tags.insert("public_transport", "stop_position");

    match snap.landing {
        Landing::Start | Landing::End => {
            let id = if snap.landing == Landing::Start {
                snap.segment.start
            } else {
                snap.segment.end
            };
            if let Some(node) = ctx.graph.nodes.get_mut(&id) {
                mark(&mut node.tags);
            }
            id
        }
        Landing::Projected(point) => {
            let id = ctx.allocate_node_id();
            let mut tags = Tags::new();
            mark(&mut tags);
            ctx.graph
                .add_node(RawNode::new(id, ctx.projection.unproject(&point)).with_tags(tags));

            if let Some(way) = ctx.graph.ways.get_mut(&snap.segment.way_id) {
                way.node_ids.insert(snap.segment.index + 1, id);
            }
            debug!(
                "[RouteBuilder] Spliced stop position {} into way {} after node {}",
                id, snap.segment.way_id, snap.segment.start
            );
            id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::super::RouteBuilderConfig;
    use super::*;
    use crate::osm::RoadGraph;
    use crate::BoundingBox;

    fn bbox() -> BoundingBox {
        BoundingBox::new(29.9, 59.9, 30.1, 60.1)
    }

    /// Street 1 (0m) - 2 (60m) - 3 (120m) without any stop positions.
    fn bare_street() -> RoadGraph {
        let mut graph = RoadGraph::new();
        add_node(&mut graph, 1, 0.0, 0.0);
        add_node(&mut graph, 2, 0.0, 60.0);
        add_node(&mut graph, 3, 0.0, 120.0);
        add_way(&mut graph, 100, &[1, 2, 3]);
        graph
    }

    #[test]
    fn test_relation_members_win() {
        let graph = eastbound_graph();
        let config = RouteBuilderConfig::default();
        let mut ctx = BuildContext::new(&graph, &bbox(), &config);

        let bound = bind_platforms(&mut ctx, &graph.relations[0]).unwrap();
        assert_eq!(bound, vec![1, 3, 5]);
    }

    #[test]
    fn test_global_index_fallback() {
        let mut graph = eastbound_graph();
        // Drop the relation's stop members; global stop positions remain tagged
        graph.relations[0] = relation(500, "7", &[(11, "platform"), (13, "platform"), (15, "platform")], &[100, 101]);
        let config = RouteBuilderConfig::default();
        let mut ctx = BuildContext::new(&graph, &bbox(), &config);

        let bound = bind_platforms(&mut ctx, &graph.relations[0]).unwrap();
        assert_eq!(bound, vec![1, 3, 5]);
    }

    #[test]
    fn test_projection_splices_new_node() {
        let mut graph = bare_street();
        add_node(&mut graph, 12, 20.0, 30.0);
        add_node(&mut graph, 13, 20.0, 118.0);
        graph.add_relation(relation(1, "7", &[(12, "platform"), (13, "platform")], &[100]));

        let config = RouteBuilderConfig::default();
        let mut ctx = BuildContext::new(&graph, &bbox(), &config);
        let relation = graph.relations[0].clone();

        let bound = bind_platforms(&mut ctx, &relation).unwrap();

        // Platform 12 is mid-way along 1-2: a synthesized node is spliced in
        assert!(bound[0] < 0);
        assert_eq!(ctx.graph.ways[&100].node_ids, vec![1, bound[0], 2, 3]);
        let spliced = &ctx.graph.nodes[&bound[0]];
        assert!(spliced.tags.is_stop_position());
        assert!(haversine_distance(&spliced.position, &at(0.0, 30.0)) < 1.0);

        // Platform 13 sits 20m from node 3, closer than any interior projection
        assert_eq!(bound[1], 3);
        assert!(ctx.graph.nodes[&3].tags.is_stop_position());
    }

    #[test]
    fn test_projection_respects_padding() {
        let mut graph = bare_street();
        // 5m along 1-2 is inside the excluded 10% at the start
        add_node(&mut graph, 12, 20.0, 5.0);
        add_node(&mut graph, 13, 20.0, 90.0);
        graph.add_relation(relation(1, "7", &[(12, "platform"), (13, "platform")], &[100]));

        let config = RouteBuilderConfig::default();
        let mut ctx = BuildContext::new(&graph, &bbox(), &config);
        let relation = graph.relations[0].clone();

        let bound = bind_platforms(&mut ctx, &relation).unwrap();
        assert_eq!(bound[0], 1);
        assert!(bound[1] < 0);
        assert_eq!(ctx.graph.ways[&100].node_ids, vec![1, 2, bound[1], 3]);
    }

    #[test]
    fn test_projection_uses_updated_way_after_splice() {
        let mut graph = bare_street();
        add_node(&mut graph, 12, 20.0, 20.0);
        add_node(&mut graph, 13, 20.0, 40.0);
        graph.add_relation(relation(1, "7", &[(12, "platform"), (13, "platform")], &[100]));

        let config = RouteBuilderConfig::default();
        let mut ctx = BuildContext::new(&graph, &bbox(), &config);
        let relation = graph.relations[0].clone();

        let bound = bind_platforms(&mut ctx, &relation).unwrap();
        assert!(bound[0] < 0 && bound[1] < 0 && bound[0] != bound[1]);
        assert_eq!(ctx.graph.ways[&100].node_ids, vec![1, bound[0], bound[1], 2, 3]);
    }

    #[test]
    fn test_unresolvable_platform() {
        let mut graph = bare_street();
        add_node(&mut graph, 12, 20.0, 0.0);
        add_node(&mut graph, 13, 200.0, 60.0);
        graph.add_relation(relation(1, "7", &[(12, "platform"), (13, "platform")], &[100]));

        let config = RouteBuilderConfig::default();
        let mut ctx = BuildContext::new(&graph, &bbox(), &config);
        let relation = graph.relations[0].clone();

        match bind_platforms(&mut ctx, &relation) {
            Err(Error::StopPositionUnresolved { relation_id, platform_id }) => {
                assert_eq!(relation_id, 1);
                assert_eq!(platform_id, 13);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
