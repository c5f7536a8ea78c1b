//! HDBSCAN over planar points.
//!
//! The single-linkage hierarchy over mutual reachability distances depends only
//! on `min_samples`; condensing and cluster selection depend on
//! `min_cluster_size` and `epsilon`. [`SingleLinkage`] keeps the two apart so a
//! parameter grid can reuse one hierarchy for many cluster sizes.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::geo_utils::PlanarPoint;
use crate::spatial_index::PointIndex;

/// Lambda assigned to merges at zero distance (coincident points).
const MAX_LAMBDA: f64 = 1e12;

#[derive(Debug, Clone, Copy)]
struct Merge {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

/// One row of the condensed tree. Ids below the point count are points,
/// everything else is a cluster; the root cluster id equals the point count.
#[derive(Debug, Clone, Copy)]
struct CondensedEdge {
    parent: usize,
    child: usize,
    lambda: f64,
    size: usize,
}

fn lambda_of(distance: f64) -> f64 {
    if distance > 0.0 {
        (1.0 / distance).min(MAX_LAMBDA)
    } else {
        MAX_LAMBDA
    }
}

/// Single-linkage hierarchy of mutual reachability distances.
#[derive(Debug, Clone)]
pub struct SingleLinkage {
    points: usize,
    /// Merge `i` creates node `points + i`
    merges: Vec<Merge>,
}

impl SingleLinkage {
    pub fn new(points: &[PlanarPoint], min_samples: usize) -> Self {
        let n = points.len();
        if n < 2 {
            return Self {
                points: n,
                merges: Vec::new(),
            };
        }

        let core = core_distances(points, min_samples);
        let mut edges = minimum_spanning_tree(points, &core);
        edges.sort_by(|a, b| a.2.total_cmp(&b.2));

        Self {
            points: n,
            merges: merge_components(n, &edges),
        }
    }

    /// Cluster label per point, `None` for noise. Labels run from 0 in order
    /// of cluster creation.
    pub fn labels(&self, min_cluster_size: usize, epsilon: f64) -> Vec<Option<usize>> {
        let n = self.points;
        if n < 2 {
            return vec![None; n];
        }

        let tree = self.condense(min_cluster_size.max(2));
        let clusters = ClusterTree::new(n, &tree);
        let selected = clusters.select(epsilon);

        let mut point_parent = vec![n; n];
        for edge in tree.iter().filter(|e| e.child < n) {
            point_parent[edge.child] = edge.parent;
        }

        point_parent
            .into_iter()
            .map(|parent| clusters.label_of(parent, &selected))
            .collect()
    }

    fn size(&self, node: usize) -> usize {
        if node < self.points {
            1
        } else {
            self.merges[node - self.points].size
        }
    }

    fn descendants(&self, root: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut queue = VecDeque::from([root]);
        while let Some(node) = queue.pop_front() {
            out.push(node);
            if node >= self.points {
                let merge = self.merges[node - self.points];
                queue.push_back(merge.left);
                queue.push_back(merge.right);
            }
        }
        out
    }

    fn condense(&self, min_cluster_size: usize) -> Vec<CondensedEdge> {
        let n = self.points;
        let root = 2 * n - 2;

        let mut relabel = vec![0usize; 2 * n - 1];
        let mut ignore = vec![false; 2 * n - 1];
        relabel[root] = n;
        let mut next_label = n + 1;
        let mut rows = Vec::new();

        for node in self.descendants(root) {
            if node < n || ignore[node] {
                continue;
            }

            let merge = self.merges[node - n];
            let lambda = lambda_of(merge.distance);
            let parent = relabel[node];
            let left_big = self.size(merge.left) >= min_cluster_size;
            let right_big = self.size(merge.right) >= min_cluster_size;

            let mut fall_out = |subtree: usize, rows: &mut Vec<CondensedEdge>| {
                for sub in self.descendants(subtree) {
                    if sub < n {
                        rows.push(CondensedEdge {
                            parent,
                            child: sub,
                            lambda,
                            size: 1,
                        });
                    }
                    ignore[sub] = true;
                }
            };

            match (left_big, right_big) {
                (true, true) => {
                    for child in [merge.left, merge.right] {
                        relabel[child] = next_label;
                        rows.push(CondensedEdge {
                            parent,
                            child: next_label,
                            lambda,
                            size: self.size(child),
                        });
                        next_label += 1;
                    }
                }
                (true, false) => {
                    relabel[merge.left] = parent;
                    fall_out(merge.right, &mut rows);
                }
                (false, true) => {
                    relabel[merge.right] = parent;
                    fall_out(merge.left, &mut rows);
                }
                (false, false) => {
                    fall_out(merge.left, &mut rows);
                    fall_out(merge.right, &mut rows);
                }
            }
        }

        rows
    }
}

/// Distance to the `min_samples`-th nearest point, the point itself included.
fn core_distances(points: &[PlanarPoint], min_samples: usize) -> Vec<f64> {
    let index = PointIndex::new(points);
    let k = min_samples.clamp(1, points.len());

    points
        .iter()
        .map(|p| index.k_nearest(p, k).last().map_or(0.0, |nb| nb.distance))
        .collect()
}

/// Prim's algorithm over the dense mutual reachability graph.
fn minimum_spanning_tree(points: &[PlanarPoint], core: &[f64]) -> Vec<(usize, usize, f64)> {
    let n = points.len();
    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut attach = vec![0usize; n];
    let mut edges = Vec::with_capacity(n.saturating_sub(1));

    let mut current = 0;
    in_tree[current] = true;

    for _ in 1..n {
        let mut next: Option<usize> = None;
        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            let reach = core[current]
                .max(core[j])
                .max(points[current].distance(&points[j]));
            if reach < best[j] {
                best[j] = reach;
                attach[j] = current;
            }
            if next.map_or(true, |k| best[j] < best[k]) {
                next = Some(j);
            }
        }

        let Some(j) = next else {
            break;
        };
        in_tree[j] = true;
        edges.push((attach[j], j, best[j]));
        current = j;
    }

    edges
}

/// Union-find pass turning sorted MST edges into a dendrogram.
fn merge_components(n: usize, edges: &[(usize, usize, f64)]) -> Vec<Merge> {
    let mut parent: Vec<usize> = (0..2 * n - 1).collect();
    let mut size = vec![1usize; 2 * n - 1];
    let mut merges = Vec::with_capacity(edges.len());

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        let mut root = x;
        while parent[root] != root {
            root = parent[root];
        }
        while parent[x] != root {
            let next = parent[x];
            parent[x] = root;
            x = next;
        }
        root
    }

    for (i, &(a, b, distance)) in edges.iter().enumerate() {
        let left = find(&mut parent, a);
        let right = find(&mut parent, b);
        let node = n + i;

        size[node] = size[left] + size[right];
        parent[left] = node;
        parent[right] = node;

        merges.push(Merge {
            left,
            right,
            distance,
            size: size[node],
        });
    }

    merges
}

// ============================================================================
// Cluster selection
// ============================================================================

/// Cluster-only view of the condensed tree, indexed by `cluster id - points`.
struct ClusterTree {
    points: usize,
    births: Vec<f64>,
    stability: Vec<f64>,
    parent: Vec<usize>,
    children: Vec<Vec<usize>>,
}

impl ClusterTree {
    fn new(points: usize, tree: &[CondensedEdge]) -> Self {
        let count = 1 + tree.iter().filter(|e| e.child >= points).count();

        let mut births = vec![0.0; count];
        let mut parent = vec![points; count];
        let mut children = vec![Vec::new(); count];
        for edge in tree.iter().filter(|e| e.child >= points) {
            births[edge.child - points] = edge.lambda;
            parent[edge.child - points] = edge.parent;
            children[edge.parent - points].push(edge.child);
        }

        let mut stability = vec![0.0; count];
        for edge in tree {
            let slot = edge.parent - points;
            stability[slot] += (edge.lambda - births[slot]) * edge.size as f64;
        }

        Self {
            points,
            births,
            stability,
            parent,
            children,
        }
    }

    fn root(&self) -> usize {
        self.points
    }

    fn subtree(&self, cluster: usize) -> Vec<usize> {
        let mut out = vec![cluster];
        let mut i = 0;
        while i < out.len() {
            out.extend(self.children[out[i] - self.points].iter().copied());
            i += 1;
        }
        out
    }

    /// Excess-of-mass selection, never choosing the root, followed by the
    /// epsilon merge when `epsilon > 0`.
    fn select(&self, epsilon: f64) -> BTreeSet<usize> {
        let mut stability = self.stability.clone();
        let mut selected = BTreeSet::new();

        // Children always carry larger ids than their parents
        for cluster in (self.root() + 1..self.points + stability.len()).rev() {
            let slot = cluster - self.points;
            let subtree: f64 = self.children[slot]
                .iter()
                .map(|c| stability[c - self.points])
                .sum();

            if subtree > stability[slot] {
                stability[slot] = subtree;
            } else {
                for descendant in self.subtree(cluster) {
                    selected.remove(&descendant);
                }
                selected.insert(cluster);
            }
        }

        if epsilon > 0.0 && !selected.is_empty() {
            selected = self.epsilon_merge(&selected, epsilon);
        }

        selected
    }

    fn epsilon_merge(&self, selected: &BTreeSet<usize>, epsilon: f64) -> BTreeSet<usize> {
        let mut merged = BTreeSet::new();
        let mut absorbed: HashSet<usize> = HashSet::new();

        for &cluster in selected {
            if 1.0 / self.births[cluster - self.points] >= epsilon {
                merged.insert(cluster);
                continue;
            }
            if absorbed.contains(&cluster) {
                continue;
            }

            let ancestor = self.climb(cluster, epsilon);
            merged.insert(ancestor);
            absorbed.extend(self.subtree(ancestor).into_iter().filter(|&c| c != ancestor));
        }

        merged.retain(|c| !absorbed.contains(c));
        merged
    }

    /// First ancestor born at a distance above `epsilon`, stopping below the root.
    fn climb(&self, mut cluster: usize, epsilon: f64) -> usize {
        loop {
            let parent = self.parent[cluster - self.points];
            if parent == self.root() {
                return cluster;
            }
            if 1.0 / self.births[parent - self.points] > epsilon {
                return parent;
            }
            cluster = parent;
        }
    }

    /// Label of the first selected cluster at or above `cluster`.
    fn label_of(&self, mut cluster: usize, selected: &BTreeSet<usize>) -> Option<usize> {
        loop {
            if selected.contains(&cluster) {
                return selected.iter().position(|&c| c == cluster);
            }
            if cluster == self.root() {
                return None;
            }
            cluster = self.parent[cluster - self.points];
        }
    }
}
