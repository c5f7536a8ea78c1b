use thiserror::Error;

use crate::osm::{NodeId, RelationId, WayId};

#[derive(Error, Debug)]
pub enum Error {
    #[error("relation {relation_id}: no stop position within reach of platform {platform_id}")]
    StopPositionUnresolved {
        relation_id: RelationId,
        platform_id: NodeId,
    },
    #[error("relation {relation_id}: ways {way_id} and {next_way_id} share {count} nodes")]
    AmbiguousSplice {
        relation_id: RelationId,
        way_id: WayId,
        next_way_id: WayId,
        count: usize,
    },
    #[error("relation {relation_id}: way {way_id} does not contain node {node_id}")]
    DisconnectedWay {
        relation_id: RelationId,
        way_id: WayId,
        node_id: NodeId,
    },
    #[error("relation {relation_id}: member {member_id} is missing from the road graph")]
    MissingMember {
        relation_id: RelationId,
        member_id: i64,
    },
    #[error("relation {relation_id}: traced {traced} of {expected} stop positions")]
    IncompleteTrace {
        relation_id: RelationId,
        traced: usize,
        expected: usize,
    },
    #[error("Unknown clustering algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("Invalid clustering parameter: {0}")]
    InvalidParameter(String),
    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),
    #[error("Invalid timestamp {value:?}: {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serde")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
