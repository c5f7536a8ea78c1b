//! # Raw Road Graph
//!
//! The source graph as fetched from a crowd-sourced map: tagged nodes, ways as
//! ordered node lists, and route relations listing member nodes and ways.
//!
//! Only the handful of tags the engines consult get typed accessors; the rest of
//! the open-ended tag vocabulary is kept as plain strings.

use std::collections::HashMap;

use crate::{BoundingBox, GpsPoint};

pub type NodeId = i64;
pub type WayId = i64;
pub type RelationId = i64;

/// Key-value tags of a node, way or relation.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Tags(HashMap<String, String>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn highway(&self) -> Option<&str> {
        self.get("highway")
    }

    pub fn public_transport(&self) -> Option<&str> {
        self.get("public_transport")
    }

    pub fn junction(&self) -> Option<&str> {
        self.get("junction")
    }

    pub fn traffic_calming(&self) -> Option<&str> {
        self.get("traffic_calming")
    }

    pub fn name(&self) -> Option<&str> {
        self.get("name")
    }

    pub fn is_roundabout(&self) -> bool {
        self.junction() == Some("roundabout")
    }

    pub fn is_stop_position(&self) -> bool {
        self.public_transport() == Some("stop_position")
    }

    pub fn is_bus_stop(&self) -> bool {
        self.highway() == Some("bus_stop")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawNode {
    pub id: NodeId,
    pub position: GpsPoint,
    pub tags: Tags,
}

impl RawNode {
    pub fn new(id: NodeId, position: GpsPoint) -> Self {
        Self {
            id,
            position,
            tags: Tags::new(),
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawWay {
    pub id: WayId,
    pub node_ids: Vec<NodeId>,
    pub tags: Tags,
}

impl RawWay {
    pub fn new(id: WayId, node_ids: Vec<NodeId>) -> Self {
        Self {
            id,
            node_ids,
            tags: Tags::new(),
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }
}

/// A relation member with its role (`platform`, `stop`, `""`, ...).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "lowercase"))]
pub enum RelationMember {
    Node { id: NodeId, role: String },
    Way { id: WayId, role: String },
}

impl RelationMember {
    pub fn node(id: NodeId, role: impl Into<String>) -> Self {
        Self::Node {
            id,
            role: role.into(),
        }
    }

    pub fn way(id: WayId) -> Self {
        Self::Way {
            id,
            role: String::new(),
        }
    }
}

/// A route relation: member nodes in stop order, member ways in traversal order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Relation {
    pub id: RelationId,
    pub tags: Tags,
    pub members: Vec<RelationMember>,
}

impl Relation {
    fn node_ids_with_role<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = NodeId> + 'a {
        self.members.iter().filter_map(move |m| match m {
            RelationMember::Node { id, role } if role.starts_with(prefix) => Some(*id),
            _ => None,
        })
    }

    /// Platform members (`platform`, `platform_entry_only`, ...) in order.
    pub fn platform_ids(&self) -> Vec<NodeId> {
        self.node_ids_with_role("platform").collect()
    }

    /// Stop-position members (`stop`, `stop_exit_only`, ...) in order.
    pub fn stop_position_ids(&self) -> Vec<NodeId> {
        self.node_ids_with_role("stop").collect()
    }

    /// Every node member regardless of role.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.members
            .iter()
            .filter_map(|m| match m {
                RelationMember::Node { id, .. } => Some(*id),
                RelationMember::Way { .. } => None,
            })
            .collect()
    }

    pub fn way_ids(&self) -> Vec<WayId> {
        self.members
            .iter()
            .filter_map(|m| match m {
                RelationMember::Way { id, .. } => Some(*id),
                RelationMember::Node { .. } => None,
            })
            .collect()
    }
}

/// The raw graph handed to the route builder.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoadGraph {
    pub nodes: HashMap<NodeId, RawNode>,
    pub ways: HashMap<WayId, RawWay>,
    pub relations: Vec<Relation>,
}

impl RoadGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: RawNode) {
        self.nodes.insert(node.id, node);
    }

    pub fn add_way(&mut self, way: RawWay) {
        self.ways.insert(way.id, way);
    }

    pub fn add_relation(&mut self, relation: Relation) {
        self.relations.push(relation);
    }

    /// True when every node member exists and lies inside the box.
    pub fn relation_within(&self, relation: &Relation, bbox: &BoundingBox) -> bool {
        relation.node_ids().iter().all(|id| {
            self.nodes
                .get(id)
                .is_some_and(|node| bbox.contains(&node.position))
        })
    }

    /// Smallest id in the graph, used to allocate ids for synthesized nodes.
    pub fn min_node_id(&self) -> NodeId {
        self.nodes.keys().copied().min().unwrap_or(0)
    }
}
