//! JSON dataset loaders.
//!
//! Flow dataset, one file per weekday:
//!
//! ```json
//! { "8": [ { "first_point": [59.93, 30.30], "second_point": [59.93, 30.31], "speed": 32 } ] }
//! ```
//!
//! Clustering dataset:
//!
//! ```json
//! {
//!   "nodes": [ { "id": "17", "lon": 30.31, "lat": 59.93 } ],
//!   "correspondence": [
//!     { "timestamp": "31.01.2024 08:15", "node_from_id": "17", "node_to_id": "42", "transitions": 3 }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::io::Read;

use serde::Deserialize;

use crate::clustering::{CorrespondenceEntry, ReferenceNode};
use crate::error::{Error, Result};
use crate::flow::FlowSegment;
use crate::speed_profile::FlowBucket;
use crate::{GpsPoint, Weekday};

#[derive(Debug, Deserialize)]
struct RawFlowSegment {
    /// [lat, lon]
    first_point: [f64; 2],
    second_point: [f64; 2],
    speed: f64,
}

impl From<RawFlowSegment> for FlowSegment {
    fn from(raw: RawFlowSegment) -> Self {
        let [lat1, lon1] = raw.first_point;
        let [lat2, lon2] = raw.second_point;
        FlowSegment::new(GpsPoint::new(lat1, lon1), GpsPoint::new(lat2, lon2), raw.speed)
    }
}

/// Load one weekday of flow samples, one bucket per hour present in the file.
pub fn load_flow_buckets<R: Read>(reader: R, weekday: Weekday) -> Result<Vec<FlowBucket>> {
    let raw: BTreeMap<String, Vec<RawFlowSegment>> = serde_json::from_reader(reader)?;

    let mut buckets = Vec::with_capacity(raw.len());
    for (hour, segments) in raw {
        let hour: u8 = hour
            .trim()
            .parse()
            .ok()
            .filter(|h| *h < 24)
            .ok_or_else(|| Error::InvalidDataset(format!("flow hour {:?} is not in 0..24", hour)))?;

        buckets.push(FlowBucket {
            weekday,
            hour,
            segments: segments.into_iter().map(FlowSegment::from).collect(),
        });
    }

    buckets.sort_by_key(|b| b.hour);
    Ok(buckets)
}

#[derive(Debug, Deserialize)]
struct RawNode {
    id: String,
    lon: f64,
    lat: f64,
}

#[derive(Debug, Deserialize)]
struct RawCorrespondence {
    timestamp: String,
    node_from_id: String,
    node_to_id: String,
    transitions: f64,
}

#[derive(Debug, Deserialize)]
struct RawClusteringDataset {
    nodes: Vec<RawNode>,
    #[serde(default)]
    correspondence: Vec<RawCorrespondence>,
}

/// Reference nodes and correspondence log ready for clustering.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusteringDataset {
    pub nodes: Vec<ReferenceNode>,
    pub correspondence: Vec<CorrespondenceEntry>,
}

pub fn load_clustering_dataset<R: Read>(reader: R) -> Result<ClusteringDataset> {
    let raw: RawClusteringDataset = serde_json::from_reader(reader)?;

    let nodes = raw
        .nodes
        .into_iter()
        .map(|n| ReferenceNode::new(n.id, GpsPoint::new(n.lat, n.lon)))
        .collect();

    let correspondence = raw
        .correspondence
        .into_iter()
        .map(|c| {
            Ok(CorrespondenceEntry::new(
                CorrespondenceEntry::parse_timestamp(&c.timestamp)?,
                c.node_from_id,
                c.node_to_id,
                c.transitions,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ClusteringDataset { nodes, correspondence })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_load_flow_buckets() {
        let json = r#"{
            "9": [{"first_point": [59.93, 30.30], "second_point": [59.93, 30.31], "speed": 32}],
            "10": [],
            "8": [
                {"first_point": [59.93, 30.30], "second_point": [59.94, 30.30], "speed": 0},
                {"first_point": [59.94, 30.30], "second_point": [59.95, 30.30], "speed": 17.5}
            ]
        }"#;

        let buckets = load_flow_buckets(json.as_bytes(), Weekday::Tuesday).unwrap();
        let hours: Vec<u8> = buckets.iter().map(|b| b.hour).collect();
        assert_eq!(hours, vec![8, 9, 10]);
        assert!(buckets.iter().all(|b| b.weekday == Weekday::Tuesday));

        assert_eq!(buckets[0].segments.len(), 2);
        assert_eq!(buckets[0].segments[1].speed, 17.5);
        assert_eq!(buckets[1].segments[0].start, GpsPoint::new(59.93, 30.30));
        assert_eq!(buckets[1].segments[0].end, GpsPoint::new(59.93, 30.31));
        assert!(buckets[2].segments.is_empty());
    }

    #[test]
    fn test_load_flow_buckets_rejects_bad_hour() {
        let json = r#"{"24": []}"#;
        let err = load_flow_buckets(json.as_bytes(), Weekday::Monday).unwrap_err();
        assert!(matches!(err, Error::InvalidDataset(_)));
        assert_eq!(err.to_string(), "Invalid dataset: flow hour \"24\" is not in 0..24");
        assert!(matches!(
            load_flow_buckets(r#"{"eight": []}"#.as_bytes(), Weekday::Monday),
            Err(Error::InvalidDataset(_))
        ));
        assert!(matches!(load_flow_buckets("[]".as_bytes(), Weekday::Monday), Err(Error::Json(_))));
    }

    #[test]
    fn test_load_clustering_dataset() {
        let json = r#"{
            "nodes": [
                {"id": "17", "lon": 30.31, "lat": 59.93},
                {"id": "42", "lon": 30.35, "lat": 59.95}
            ],
            "correspondence": [
                {"timestamp": "31.01.2024 08:15", "node_from_id": "17", "node_to_id": "42", "transitions": 3}
            ]
        }"#;

        let dataset = load_clustering_dataset(json.as_bytes()).unwrap();
        assert_eq!(dataset.nodes[1], ReferenceNode::new("42", GpsPoint::new(59.95, 30.35)));

        let entry = &dataset.correspondence[0];
        assert_eq!((entry.node_from_id.as_str(), entry.node_to_id.as_str()), ("17", "42"));
        assert_eq!(Weekday::of(&entry.timestamp), Weekday::Wednesday);
        assert_eq!((entry.timestamp.hour(), entry.timestamp.minute()), (8, 15));
        assert_eq!(entry.transitions, 3.0);
    }

    #[test]
    fn test_load_clustering_dataset_bad_timestamp() {
        let json = r#"{
            "nodes": [],
            "correspondence": [
                {"timestamp": "2024-01-31 08:15", "node_from_id": "1", "node_to_id": "2", "transitions": 1}
            ]
        }"#;
        assert!(matches!(
            load_clustering_dataset(json.as_bytes()),
            Err(Error::InvalidTimestamp { .. })
        ));
    }
}
