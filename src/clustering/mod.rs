//! # Stop Clustering
//!
//! Groups reference stops into zones and rebuilds the trip matrix between them.
//!
//! ## Algorithm
//!
//! 1. Project every reference node into one planar zone
//! 2. HDBSCAN labels dense groups; those nodes become anchors
//! 3. Noise points (orphans) take the class of a distance-weighted k-NN vote
//!    over the anchors
//! 4. Correspondence entries are re-keyed by (zone from, zone to, weekday, hour)
//!    and their transitions summed
//!
//! ## Grid search
//!
//! [`grid_search`] scores every (min cluster size, min samples) pair by the
//! share of trips that cross a zone boundary, keeps the best parameters per
//! cluster count, and returns only the counts that improve on every smaller
//! count.
//!
//! | Score | Meaning |
//! |-------|---------|
//! | 0.0   | Every trip starts and ends in the same zone |
//! | 1.0   | No trip stays inside a zone |

mod hdbscan;
mod knn;

pub use hdbscan::SingleLinkage;
pub use knn::KnnClassifier;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use chrono::{NaiveDateTime, Timelike};
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::geo_utils::{PlanarPoint, UtmProjection};
use crate::{BoundingBox, GpsPoint, Weekday};

/// Timestamp layout of correspondence logs, e.g. `31.01.2024 08:15`.
pub const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M";

// ============================================================================
// Types
// ============================================================================

/// Raw clustering input.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReferenceNode {
    pub id: String,
    pub position: GpsPoint,
}

impl ReferenceNode {
    pub fn new(id: impl Into<String>, position: GpsPoint) -> Self {
        Self {
            id: id.into(),
            position,
        }
    }
}

/// A reference node with its zone.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusteredNode {
    pub id: String,
    pub position: GpsPoint,
    pub cluster_index: usize,
    /// Labelled by density clustering rather than by the k-NN fallback
    pub is_anchor: bool,
}

impl ClusteredNode {
    fn new(node: &ReferenceNode, cluster_index: usize, is_anchor: bool) -> Self {
        Self {
            id: node.id.clone(),
            position: node.position,
            cluster_index,
            is_anchor,
        }
    }
}

/// Observed trips between two reference nodes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CorrespondenceEntry {
    pub timestamp: NaiveDateTime,
    pub node_from_id: String,
    pub node_to_id: String,
    pub transitions: f64,
}

impl CorrespondenceEntry {
    pub fn new(
        timestamp: NaiveDateTime,
        node_from_id: impl Into<String>,
        node_to_id: impl Into<String>,
        transitions: f64,
    ) -> Self {
        Self {
            timestamp,
            node_from_id: node_from_id.into(),
            node_to_id: node_to_id.into(),
            transitions,
        }
    }

    /// Parse a timestamp in [`TIMESTAMP_FORMAT`].
    pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).map_err(|source| Error::InvalidTimestamp {
            value: value.to_string(),
            source,
        })
    }
}

/// Trips between two zones in one weekday/hour bucket.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusteredCorrespondenceEntry {
    pub cluster_from: usize,
    pub cluster_to: usize,
    pub weekday: Weekday,
    pub hour: u8,
    pub transitions: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "String", into = "String")
)]
pub enum ClusteringAlgorithm {
    /// HDBSCAN anchors with a k-NN fallback for noise points
    HdbscanKnn,
}

impl ClusteringAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            ClusteringAlgorithm::HdbscanKnn => "hdbscan_knn",
        }
    }
}

impl fmt::Display for ClusteringAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusteringAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hdbscan_knn" => Ok(ClusteringAlgorithm::HdbscanKnn),
            other => Err(Error::UnknownAlgorithm(other.to_string())),
        }
    }
}

impl TryFrom<String> for ClusteringAlgorithm {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ClusteringAlgorithm> for String {
    fn from(algorithm: ClusteringAlgorithm) -> Self {
        algorithm.as_str().to_string()
    }
}

/// Parameters for one clustering run
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusteringParams {
    pub algorithm: ClusteringAlgorithm,

    /// Smallest group HDBSCAN reports as a cluster.
    /// Default: 5
    pub min_cluster_size: usize,

    /// Neighbourhood size for core distances, the point itself included.
    /// Default: 5
    pub min_samples: usize,

    /// Clusters born below this distance merge into their parent (meters).
    /// Default: 0 (disabled)
    pub epsilon: f64,

    /// Neighbours consulted when labelling orphans.
    /// Default: 10
    pub k: usize,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            algorithm: ClusteringAlgorithm::HdbscanKnn,
            min_cluster_size: 5,
            min_samples: 5,
            epsilon: 0.0,
            k: 10,
        }
    }
}

impl ClusteringParams {
    pub fn validate(&self) -> Result<()> {
        if self.min_cluster_size < 2 {
            return Err(Error::InvalidParameter(format!(
                "min_cluster_size must be at least 2, got {}",
                self.min_cluster_size
            )));
        }
        if self.min_samples == 0 {
            return Err(Error::InvalidParameter("min_samples must be positive".into()));
        }
        if self.k == 0 {
            return Err(Error::InvalidParameter("k must be positive".into()));
        }
        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "epsilon must be a non-negative distance, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

/// Parameter grid for [`grid_search`]
#[derive(Debug, Clone)]
pub struct GridSearchConfig {
    pub algorithm: ClusteringAlgorithm,

    /// Default: 2, 4, .., 50
    pub min_cluster_sizes: Vec<usize>,

    /// Default: 2, 4, .., 20
    pub min_samples: Vec<usize>,

    /// Default: 0
    pub epsilon: f64,

    /// Default: 10
    pub k: usize,

    /// Grid points scoring below this are discarded
    pub min_score: Option<f64>,

    /// Grid points with more clusters than this are discarded
    pub max_clusters: Option<usize>,
}

impl Default for GridSearchConfig {
    fn default() -> Self {
        Self {
            algorithm: ClusteringAlgorithm::HdbscanKnn,
            min_cluster_sizes: (2..=50).step_by(2).collect(),
            min_samples: (2..=20).step_by(2).collect(),
            epsilon: 0.0,
            k: 10,
            min_score: None,
            max_clusters: None,
        }
    }
}

impl GridSearchConfig {
    /// Grid points, min cluster size varying slowest.
    fn points(&self) -> Vec<ClusteringParams> {
        self.min_cluster_sizes
            .iter()
            .flat_map(|&min_cluster_size| {
                self.min_samples.iter().map(move |&min_samples| ClusteringParams {
                    algorithm: self.algorithm,
                    min_cluster_size,
                    min_samples,
                    epsilon: self.epsilon,
                    k: self.k,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusteringScore {
    /// Share of transitions crossing a zone boundary, in [0, 1]
    pub score: f64,
    pub clusters_count: usize,
}

/// A grid-search result offered for the caller to choose from.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CandidateProfile {
    pub name: String,
    pub params: ClusteringParams,
    pub clusters_count: usize,
    pub score: f64,
}

// ============================================================================
// Clustering
// ============================================================================

fn project_nodes(nodes: &[ReferenceNode]) -> Vec<PlanarPoint> {
    let positions: Vec<GpsPoint> = nodes.iter().map(|n| n.position).collect();
    let Some(bounds) = BoundingBox::from_points(&positions) else {
        return Vec::new();
    };

    let projection = UtmProjection::for_point(&bounds.center());
    positions.iter().map(|p| projection.project(p)).collect()
}

/// Turn density labels into final zones, voting orphans in with k-NN.
fn assign(nodes: &[ReferenceNode], planar: &[PlanarPoint], labels: &[Option<usize>], k: usize) -> Vec<ClusteredNode> {
    let (anchors, anchor_labels): (Vec<PlanarPoint>, Vec<usize>) = planar
        .iter()
        .zip(labels)
        .filter_map(|(p, label)| label.map(|l| (*p, l)))
        .unzip();

    // Without anchors everything shares one zone
    if anchors.is_empty() {
        return nodes.iter().map(|n| ClusteredNode::new(n, 0, false)).collect();
    }

    let knn = KnnClassifier::fit(&anchors, anchor_labels);

    nodes
        .iter()
        .zip(planar)
        .zip(labels)
        .map(|((node, point), label)| match label {
            Some(l) => ClusteredNode::new(node, *l, true),
            None => ClusteredNode::new(node, knn.predict(point, k).unwrap_or(0), false),
        })
        .collect()
}

/// Assign every reference node a zone. Output order follows `nodes`.
pub fn cluster(nodes: &[ReferenceNode], params: &ClusteringParams) -> Result<Vec<ClusteredNode>> {
    params.validate()?;

    let planar = project_nodes(nodes);
    let labels = match params.algorithm {
        ClusteringAlgorithm::HdbscanKnn => {
            SingleLinkage::new(&planar, params.min_samples).labels(params.min_cluster_size, params.epsilon)
        }
    };

    Ok(assign(nodes, &planar, &labels, params.k))
}

/// Sum transitions per (zone from, zone to, weekday, hour), sorted by that key.
///
/// Entries naming a node missing from `clustered` are skipped.
pub fn reaggregate(
    clustered: &[ClusteredNode],
    correspondence: &[CorrespondenceEntry],
) -> Vec<ClusteredCorrespondenceEntry> {
    let zone_of: HashMap<&str, usize> = clustered.iter().map(|n| (n.id.as_str(), n.cluster_index)).collect();

    let mut totals: BTreeMap<(usize, usize, Weekday, u8), f64> = BTreeMap::new();
    for entry in correspondence {
        let (Some(&from), Some(&to)) = (
            zone_of.get(entry.node_from_id.as_str()),
            zone_of.get(entry.node_to_id.as_str()),
        ) else {
            warn!(
                "[StopClustering] Skipping correspondence {} -> {}: unknown node",
                entry.node_from_id, entry.node_to_id
            );
            continue;
        };

        let key = (from, to, Weekday::of(&entry.timestamp), entry.timestamp.hour() as u8);
        *totals.entry(key).or_default() += entry.transitions;
    }

    totals
        .into_iter()
        .map(|((cluster_from, cluster_to, weekday, hour), transitions)| ClusteredCorrespondenceEntry {
            cluster_from,
            cluster_to,
            weekday,
            hour,
            transitions,
        })
        .collect()
}

/// Share of transitions crossing a zone boundary, and the number of zones.
pub fn compute_score(clustered: &[ClusteredNode], correspondence: &[CorrespondenceEntry]) -> ClusteringScore {
    let zone_of: HashMap<&str, usize> = clustered.iter().map(|n| (n.id.as_str(), n.cluster_index)).collect();
    let clusters_count = clustered.iter().map(|n| n.cluster_index).collect::<HashSet<_>>().len();

    let mut total = 0.0;
    let mut external = 0.0;
    for entry in correspondence {
        let (Some(from), Some(to)) = (
            zone_of.get(entry.node_from_id.as_str()),
            zone_of.get(entry.node_to_id.as_str()),
        ) else {
            continue;
        };

        total += entry.transitions;
        if from != to {
            external += entry.transitions;
        }
    }

    ClusteringScore {
        score: if total > 0.0 { external / total } else { 0.0 },
        clusters_count,
    }
}

/// Cluster with chosen parameters and rebuild the trip matrix in one call.
pub fn realize_profile(
    nodes: &[ReferenceNode],
    correspondence: &[CorrespondenceEntry],
    params: &ClusteringParams,
) -> Result<(Vec<ClusteredNode>, Vec<ClusteredCorrespondenceEntry>)> {
    let clustered = cluster(nodes, params)?;
    let matrix = reaggregate(&clustered, correspondence);
    Ok((clustered, matrix))
}

// ============================================================================
// Grid search
// ============================================================================

/// Explore the parameter grid and return the profiles worth offering.
pub fn grid_search(
    nodes: &[ReferenceNode],
    correspondence: &[CorrespondenceEntry],
    config: &GridSearchConfig,
) -> Result<Vec<CandidateProfile>> {
    let start = Instant::now();

    let grid = config.points();
    for params in &grid {
        params.validate()?;
    }

    info!(
        "[StopClustering] Grid search over {} parameter sets for {} nodes",
        grid.len(),
        nodes.len()
    );

    let planar = project_nodes(nodes);

    let mut sample_sizes = config.min_samples.clone();
    sample_sizes.sort_unstable();
    sample_sizes.dedup();

    // One hierarchy per min_samples, shared by every cluster size
    #[cfg(feature = "parallel")]
    let linkages: HashMap<usize, SingleLinkage> = {
        use rayon::prelude::*;
        sample_sizes
            .par_iter()
            .map(|&ms| (ms, SingleLinkage::new(&planar, ms)))
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let linkages: HashMap<usize, SingleLinkage> = sample_sizes
        .iter()
        .map(|&ms| (ms, SingleLinkage::new(&planar, ms)))
        .collect();

    let evaluate = |params: &ClusteringParams| -> Option<ClusteringScore> {
        let linkage = linkages.get(&params.min_samples)?;
        let labels = linkage.labels(params.min_cluster_size, params.epsilon);
        let clustered = assign(nodes, &planar, &labels, params.k);
        Some(compute_score(&clustered, correspondence))
    };

    #[cfg(feature = "parallel")]
    let scores: Vec<Option<ClusteringScore>> = {
        use rayon::prelude::*;
        grid.par_iter().map(evaluate).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let scores: Vec<Option<ClusteringScore>> = grid.iter().map(evaluate).collect();

    // Best parameters per cluster count; earlier grid points win ties
    let mut best: BTreeMap<usize, (ClusteringParams, ClusteringScore)> = BTreeMap::new();
    for (params, score) in grid.into_iter().zip(scores) {
        let Some(score) = score else {
            continue;
        };
        debug!(
            "[StopClustering] min_cluster_size={} min_samples={} -> {} clusters, score {:.4}",
            params.min_cluster_size, params.min_samples, score.clusters_count, score.score
        );

        if config.min_score.is_some_and(|min| score.score < min) {
            continue;
        }
        if config.max_clusters.is_some_and(|max| score.clusters_count > max) {
            continue;
        }

        let improves = best
            .get(&score.clusters_count)
            .map_or(true, |(_, current)| score.score > current.score);
        if improves {
            best.insert(score.clusters_count, (params, score));
        }
    }

    let mut last_score = 0.0;
    let profiles: Vec<CandidateProfile> = best
        .into_values()
        .filter(|(_, score)| {
            let keep = score.score > last_score;
            if keep {
                last_score = score.score;
            }
            keep
        })
        .enumerate()
        .map(|(i, (params, score))| CandidateProfile {
            name: format!("Candidate profile #{}", i),
            params,
            clusters_count: score.clusters_count,
            score: score.score,
        })
        .collect();

    info!(
        "[StopClustering] Grid search kept {} profiles in {:?}",
        profiles.len(),
        start.elapsed()
    );

    Ok(profiles)
}
