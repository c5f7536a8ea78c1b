//! Geometry tracing along a relation's ways.
//!
//! The trace starts at the first stop position and walks the member ways in
//! order. Within each way it runs from the cursor node to the node shared with
//! the next way (or to the last stop position on the final way), choosing the
//! direction from the two indices. Roundabouts are only ever walked forward:
//! their node list is doubled so the exit can be reached past the wrap-around.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::osm::{NodeId, RawNode, RawWay, Relation, RoadGraph};
use crate::route::{GeometryNode, ObstacleKind};

/// Obstacle carried by a node, if any.
///
/// Only the first node emitted after entering a roundabout counts as a
/// roundabout obstacle.
fn classify(node: &RawNode, on_roundabout: bool, last_was_roundabout: bool) -> Option<ObstacleKind> {
    match node.tags.highway() {
        Some("crossing") => return Some(ObstacleKind::Crossing),
        Some("traffic_signals") => return Some(ObstacleKind::TrafficSignals),
        _ => {}
    }

    if matches!(node.tags.traffic_calming(), Some("bump" | "hump" | "table")) {
        return Some(ObstacleKind::SpeedBump);
    }

    if on_roundabout && !last_was_roundabout {
        return Some(ObstacleKind::Roundabout);
    }

    None
}

/// The node where `way` hands over to `next`.
///
/// Ways normally share exactly one node. Split roundabouts share two; the one
/// further along `way` wins.
fn handover_node(relation: &Relation, way: &RawWay, next: &RawWay) -> Result<NodeId> {
    let next_ids: HashSet<NodeId> = next.node_ids.iter().copied().collect();

    let mut common: Vec<NodeId> = Vec::new();
    for &id in &way.node_ids {
        if next_ids.contains(&id) && !common.contains(&id) {
            common.push(id);
        }
    }

    // `common` is in order of first occurrence along `way`
    match common.as_slice() {
        [single] => Ok(*single),
        [_, further] => Ok(*further),
        _ => Err(Error::AmbiguousSplice {
            relation_id: relation.id,
            way_id: way.id,
            next_way_id: next.id,
            count: common.len(),
        }),
    }
}

/// Node ids to walk on `way`, from `cursor` to `target` inclusive.
fn walk(relation: &Relation, way: &RawWay, cursor: NodeId, target: NodeId) -> Result<Vec<NodeId>> {
    let ids = &way.node_ids;
    let missing = |node_id| Error::DisconnectedWay {
        relation_id: relation.id,
        way_id: way.id,
        node_id,
    };

    let current = ids.iter().position(|&id| id == cursor).ok_or(missing(cursor))?;

    if way.tags.is_roundabout() {
        let doubled: Vec<NodeId> = ids.iter().chain(ids.iter()).copied().collect();
        let end = doubled
            .iter()
            .enumerate()
            .skip(current + 1)
            .find(|(_, &id)| id == target)
            .map(|(j, _)| j)
            .ok_or(missing(target))?;
        return Ok(doubled[current..=end].to_vec());
    }

    let end = ids.iter().position(|&id| id == target).ok_or(missing(target))?;
    if current <= end {
        Ok(ids[current..=end].to_vec())
    } else {
        Ok(ids[end..=current].iter().rev().copied().collect())
    }
}

/// Trace the geometry of `relation`.
///
/// `stop_positions[i]` is the halting node of the i-th stop, whose id in the
/// output is `stop_ids[i]`.
pub(crate) fn trace_geometry(
    graph: &RoadGraph,
    relation: &Relation,
    stop_positions: &[NodeId],
    stop_ids: &[String],
) -> Result<Vec<GeometryNode>> {
    let lookup_node = |id: NodeId| {
        graph.nodes.get(&id).ok_or(Error::MissingMember {
            relation_id: relation.id,
            member_id: id,
        })
    };

    let ways = relation
        .way_ids()
        .into_iter()
        .map(|id| {
            graph.ways.get(&id).ok_or(Error::MissingMember {
                relation_id: relation.id,
                member_id: id,
            })
        })
        .collect::<Result<Vec<&RawWay>>>()?;

    let (Some(&first), Some(&last)) = (stop_positions.first(), stop_positions.last()) else {
        return Ok(Vec::new());
    };

    let mut geometry = vec![GeometryNode::stop_position(
        lookup_node(first)?.position,
        stop_ids[0].clone(),
    )];
    let mut next_stop = 1;
    let mut last_node_id = first;
    let mut last_was_roundabout = false;

    for (i, way) in ways.iter().enumerate() {
        if next_stop == stop_positions.len() {
            break;
        }

        if !way.node_ids.contains(&last_node_id) {
            return Err(Error::DisconnectedWay {
                relation_id: relation.id,
                way_id: way.id,
                node_id: last_node_id,
            });
        }

        let target = match ways.get(i + 1) {
            None => last,
            // Duplicated way member
            Some(next) if next.id == way.id => continue,
            Some(next) => handover_node(relation, way, next)?,
        };

        let on_roundabout = way.tags.is_roundabout();

        for id in walk(relation, way, last_node_id, target)? {
            if id == last_node_id {
                continue;
            }

            let node = lookup_node(id)?;
            let entry = if id == stop_positions[next_stop] {
                next_stop += 1;
                GeometryNode::stop_position(node.position, stop_ids[next_stop - 1].clone())
            } else {
                match classify(node, on_roundabout, last_was_roundabout) {
                    Some(kind) => GeometryNode::obstacle(node.position, kind),
                    None => GeometryNode::plain(node.position),
                }
            };
            geometry.push(entry);

            last_node_id = id;
            last_was_roundabout = on_roundabout;

            // The final stop may sit in the middle of a way
            if next_stop == stop_positions.len() {
                break;
            }
        }
    }

    if next_stop < stop_positions.len() {
        return Err(Error::IncompleteTrace {
            relation_id: relation.id,
            traced: next_stop,
            expected: stop_positions.len(),
        });
    }

    Ok(geometry)
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::osm::RawWay;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn kinds(geometry: &[GeometryNode]) -> Vec<Option<ObstacleKind>> {
        geometry
            .iter()
            .map(|n| match n {
                GeometryNode::Obstacle { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_trace_straight_street() {
        let graph = eastbound_graph();
        let geometry = trace_geometry(&graph, &graph.relations[0], &[1, 3, 5], &ids(&["a", "b", "c"])).unwrap();

        let stops: Vec<Option<&str>> = geometry.iter().map(GeometryNode::stop_id).collect();
        assert_eq!(stops, vec![Some("a"), None, Some("b"), None, Some("c")]);
        assert_eq!(
            kinds(&geometry),
            vec![None, Some(ObstacleKind::Crossing), None, Some(ObstacleKind::TrafficSignals), None]
        );
    }

    #[test]
    fn test_trace_reversed_way_direction() {
        let mut graph = eastbound_graph();
        // Way 101 stored westbound; traversal must still run 3 -> 4 -> 5
        graph.ways.insert(101, RawWay::new(101, vec![5, 4, 3]));

        let geometry = trace_geometry(&graph, &graph.relations[0], &[1, 3, 5], &ids(&["a", "b", "c"])).unwrap();
        assert_eq!(geometry.len(), 5);
        assert_eq!(geometry[3], GeometryNode::obstacle(graph.nodes[&4].position, ObstacleKind::TrafficSignals));
        assert_eq!(geometry[4].stop_id(), Some("c"));
    }

    #[test]
    fn test_trace_ends_at_last_stop() {
        let graph = eastbound_graph();
        let geometry = trace_geometry(&graph, &graph.relations[0], &[1, 3], &ids(&["a", "b"])).unwrap();
        assert_eq!(geometry.len(), 3);
        assert_eq!(geometry[2].stop_id(), Some("b"));
    }

    #[test]
    fn test_trace_skips_duplicate_way_member() {
        let mut graph = eastbound_graph();
        graph.relations[0] = relation(500, "7", &[], &[100, 100, 101]);

        let geometry = trace_geometry(&graph, &graph.relations[0], &[1, 3, 5], &ids(&["a", "b", "c"])).unwrap();
        assert_eq!(geometry.len(), 5);
    }

    #[test]
    fn test_trace_disconnected_way() {
        let mut graph = eastbound_graph();
        add_node(&mut graph, 7, 50.0, 600.0);
        add_node(&mut graph, 8, 100.0, 600.0);
        add_way(&mut graph, 102, &[7, 8]);
        graph.relations[0] = relation(500, "7", &[], &[102, 100]);

        let result = trace_geometry(&graph, &graph.relations[0], &[1, 3], &ids(&["a", "b"]));
        assert!(matches!(result, Err(Error::DisconnectedWay { way_id: 102, node_id: 1, .. })));
    }

    #[test]
    fn test_trace_ambiguous_splice() {
        let mut graph = eastbound_graph();
        // Shares nodes 1, 2 and 3 with way 100
        add_way(&mut graph, 102, &[3, 2, 1]);
        graph.relations[0] = relation(500, "7", &[], &[100, 102]);

        let result = trace_geometry(&graph, &graph.relations[0], &[1, 3], &ids(&["a", "b"]));
        assert!(matches!(result, Err(Error::AmbiguousSplice { count: 3, .. })));
    }

    #[test]
    fn test_trace_incomplete() {
        let mut graph = eastbound_graph();
        graph.relations[0] = relation(500, "7", &[], &[100]);

        // Stop position 3 is never met before the trace reaches node 2
        let result = trace_geometry(&graph, &graph.relations[0], &[1, 3, 2], &ids(&["a", "b", "c"]));
        assert!(matches!(result, Err(Error::IncompleteTrace { traced: 1, expected: 3, .. })));
    }

    /// A -> roundabout B -> C.
    ///
    /// B is closed and stored as [r1, r2, r3, r4, r1] in its one-way driving
    /// order. A joins at r3 and C leaves from r2, so r2 sits before r3 in B's
    /// raw node order.
    fn roundabout_graph() -> RoadGraph {
        let mut graph = RoadGraph::new();
        // Approach from the south
        add_tagged(&mut graph, 1, -100.0, 0.0, &[("public_transport", "stop_position")]);
        add_node(&mut graph, 2, -50.0, 0.0);
        // Roundabout of radius 20m around the origin
        add_node(&mut graph, 21, 20.0, 0.0);
        add_node(&mut graph, 22, 0.0, 20.0);
        add_node(&mut graph, 23, -20.0, 0.0);
        add_node(&mut graph, 24, 0.0, -20.0);
        // Exit to the east
        add_node(&mut graph, 3, 0.0, 70.0);
        add_tagged(&mut graph, 4, 0.0, 120.0, &[("public_transport", "stop_position")]);

        add_way(&mut graph, 100, &[1, 2, 23]);
        graph.add_way(
            RawWay::new(101, vec![21, 22, 23, 24, 21]).with_tags(tags(&[("junction", "roundabout")])),
        );
        add_way(&mut graph, 102, &[22, 3, 4]);
        graph.add_relation(relation(600, "Loop", &[], &[100, 101, 102]));
        graph
    }

    #[test]
    fn test_trace_roundabout_forward_only() {
        let graph = roundabout_graph();
        let geometry = trace_geometry(&graph, &graph.relations[0], &[1, 4], &ids(&["a", "b"])).unwrap();

        let expected_positions: Vec<_> = [1, 2, 23, 24, 21, 22, 3, 4]
            .iter()
            .map(|id| graph.nodes[id].position)
            .collect();
        let positions: Vec<_> = geometry.iter().map(|n| *n.position()).collect();
        assert_eq!(positions, expected_positions);

        let mut expected_kinds = vec![None; 8];
        expected_kinds[3] = Some(ObstacleKind::Roundabout);
        assert_eq!(kinds(&geometry), expected_kinds);
    }
}
