//! HDBSCAN* clustering of 2-D point sets with leaf cluster selection.
//!
//! The implementation follows the classic pipeline:
//! 1. **Core distances**: distance to the k-th nearest neighbour, using a
//!    `kiddo` KD-tree over the distinct points queried in parallel with `rayon`
//! 2. **Minimum spanning tree** of the mutual reachability graph (Prim)
//! 3. **Single linkage** hierarchy built with a union-find
//! 4. **Condensed tree**: splits smaller than `min_cluster_size` become points
//!    falling out of their parent cluster
//! 5. **Leaf selection**: every cluster without child clusters is kept
//! 6. **Probabilities** and the **relative validity** score
//!
//! Everything is deterministic: ties are broken by index order and edges are
//! sorted stably.

use std::collections::{HashMap, HashSet};

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use rayon::prelude::*;
use thiserror::Error;

/// Errors raised by HDBSCAN parameter or input validation.
#[derive(Debug, Error)]
pub enum HdbscanError {
    #[error("{name} must be at least 1, got {value}")]
    InvalidParameter { name: &'static str, value: usize },

    #[error("point {0} has a non-finite coordinate")]
    NonFinitePoint(usize),
}

/// Result type for HDBSCAN operations.
pub type Result<T> = std::result::Result<T, HdbscanError>;

/// Smallest slice of candidates handed to one rayon task during Prim relaxation.
const MST_CHUNK: usize = 2048;

/// Rotation (radians) between the data axes and the KD-tree axes.
const TREE_ROTATION: f64 = 0.5;

/// Extra neighbours fetched beyond the core rank, re-ranked on exact distances.
const NEIGHBOUR_SLACK: usize = 4;

/// Clustering controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HdbscanParams {
    pub min_cluster_size: usize,
    /// Defaults to `min_cluster_size`
    pub min_samples: Option<usize>,
}

impl HdbscanParams {
    pub fn new(min_cluster_size: usize, min_samples: Option<usize>) -> Self {
        Self {
            min_cluster_size,
            min_samples,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.min_cluster_size == 0 {
            return Err(HdbscanError::InvalidParameter {
                name: "min_cluster_size",
                value: 0,
            });
        }
        if self.min_samples == Some(0) {
            return Err(HdbscanError::InvalidParameter {
                name: "min_samples",
                value: 0,
            });
        }
        Ok(())
    }

    /// Neighbour rank used for core distances on `n` points.
    fn neighbour_rank(&self, n: usize) -> usize {
        self.min_samples
            .unwrap_or(self.min_cluster_size)
            .min(n.saturating_sub(1))
            .max(1)
    }
}

/// An edge of the mutual reachability minimum spanning tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MstEdge {
    pub from: usize,
    pub to: usize,
    pub distance: f64,
}

/// One merge of the single linkage hierarchy.
///
/// Nodes below `n` are points; merge `i` creates node `n + i`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkageRow {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
    pub size: usize,
}

/// One row of the condensed tree.
///
/// `child` is a point when below `n`, otherwise a cluster label. `lambda`
/// is the inverse distance at which the child leaves `parent`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CondensedRow {
    pub parent: usize,
    pub child: usize,
    pub lambda: f64,
    pub size: usize,
}

/// Output of a clustering run.
#[derive(Debug, Clone)]
pub struct HdbscanResult {
    /// Cluster label per point, `-1` for noise
    pub labels: Vec<i32>,
    /// Membership strength per point in `[0, 1]`, `0` for noise
    pub probabilities: Vec<f64>,
    /// Density-based relative validity, `0.0` when there are no clusters
    pub relative_validity: f64,
    pub n_clusters: usize,
    pub mst: Vec<MstEdge>,
}

impl HdbscanResult {
    fn all_noise(n: usize) -> Self {
        Self {
            labels: vec![-1; n],
            probabilities: vec![0.0; n],
            relative_validity: 0.0,
            n_clusters: 0,
            mst: Vec::new(),
        }
    }

    pub fn n_noise(&self) -> usize {
        self.labels.iter().filter(|&&l| l < 0).count()
    }
}

/// Union-find over the nodes of a single linkage hierarchy.
///
/// Every union creates a fresh node, so roots are never re-parented onto
/// existing nodes and the merge order is preserved in the labels.
struct LinkageUnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
    next_label: usize,
}

impl LinkageUnionFind {
    fn new(n: usize) -> Self {
        let total = (2 * n).saturating_sub(1);
        let size = (0..total).map(|i| usize::from(i < n)).collect();
        Self {
            parent: (0..total).collect(),
            size,
            next_label: n,
        }
    }

    /// Find the current root of `x`, compressing the path on the way.
    #[inline]
    fn find(&mut self, mut x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[x] != root {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }

    /// Merge two roots under a new node and return the merged size.
    #[inline]
    fn union(&mut self, a: usize, b: usize) -> usize {
        let node = self.next_label;
        self.parent[a] = node;
        self.parent[b] = node;
        self.size[node] = self.size[a] + self.size[b];
        self.next_label += 1;
        self.size[node]
    }
}

#[inline]
fn euclidean(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    (dx * dx + dy * dy).sqrt()
}

/// Collapse exact duplicates, returning the unique coordinates, their
/// multiplicities and the unique index of every input point.
fn dedup_points(points: &[[f64; 2]]) -> (Vec<[f64; 2]>, Vec<usize>, Vec<usize>) {
    let mut index: HashMap<(u64, u64), usize> = HashMap::with_capacity(points.len());
    let mut unique = Vec::new();
    let mut counts = Vec::new();
    let owner = points
        .iter()
        .map(|p| {
            // `+ 0.0` folds -0.0 onto 0.0
            let key = ((p[0] + 0.0).to_bits(), (p[1] + 0.0).to_bits());
            *index.entry(key).or_insert_with(|| {
                unique.push(*p);
                counts.push(0);
                unique.len() - 1
            })
        })
        .collect::<Vec<_>>();
    for &u in &owner {
        counts[u] += 1;
    }
    (unique, counts, owner)
}

/// Map a point into the frame the KD-tree is built in.
///
/// The frame is a fixed rotation of the data axes, so points on a regular
/// grid never share a coordinate on either tree axis.
#[inline]
fn tree_frame(p: &[f64; 2]) -> [f64; 2] {
    let (sin, cos) = TREE_ROTATION.sin_cos();
    [cos * p[0] - sin * p[1], sin * p[0] + cos * p[1]]
}

/// Distance from each point to its `k`-th nearest neighbour, itself excluded.
///
/// Coincident points are collapsed before the KD-tree is built and counted
/// back in through their multiplicities, so a point repeated more than `k`
/// times has a core distance of zero. Distances are measured on the input
/// coordinates.
pub fn core_distances(points: &[[f64; 2]], k: usize) -> Vec<f64> {
    if points.len() < 2 || k == 0 {
        return vec![0.0; points.len()];
    }
    let (unique, counts, owner) = dedup_points(points);
    if unique.len() == 1 {
        return vec![0.0; points.len()];
    }

    let needed = (k + 1).min(points.len());
    let qty = (needed + NEIGHBOUR_SLACK).min(unique.len());
    let framed: Vec<[f64; 2]> = unique.iter().map(tree_frame).collect();
    let tree: ImmutableKdTree<f64, 2> = ImmutableKdTree::new_from_slice(&framed);

    let per_unique: Vec<f64> = unique
        .par_iter()
        .zip(framed.par_iter())
        .map(|(p, q)| {
            let mut candidates: Vec<(f64, usize)> = tree
                .nearest_n::<SquaredEuclidean>(q, qty)
                .into_iter()
                .map(|nn| {
                    let u = nn.item as usize;
                    (euclidean(p, &unique[u]), u)
                })
                .collect();
            candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

            let mut seen = 0usize;
            let mut distance = 0.0;
            for (d, u) in candidates {
                seen += counts[u];
                distance = d;
                if seen >= needed {
                    break;
                }
            }
            distance
        })
        .collect();

    owner.iter().map(|&u| per_unique[u]).collect()
}

/// Prim's algorithm over the dense mutual reachability graph.
///
/// The mutual reachability distance of two points is the largest of their
/// two core distances and their Euclidean distance. Edges are returned in
/// the order they join the tree, starting from point 0. Each relaxation
/// pass runs in parallel; among equal distances the lowest index is taken.
pub fn mutual_reachability_mst(points: &[[f64; 2]], core: &[f64]) -> Vec<MstEdge> {
    let n = points.len();
    if n < 2 {
        return Vec::new();
    }

    let mut in_tree = vec![false; n];
    let mut best = vec![f64::INFINITY; n];
    let mut source = vec![0usize; n];
    let mut edges = Vec::with_capacity(n - 1);
    let mut current = 0usize;

    for _ in 1..n {
        in_tree[current] = true;
        let origin = points[current];
        let origin_core = core[current];

        let pick = best
            .par_iter_mut()
            .zip(source.par_iter_mut())
            .zip(in_tree.par_iter())
            .zip(points.par_iter().zip(core.par_iter()))
            .enumerate()
            .with_min_len(MST_CHUNK)
            .filter_map(|(j, (((best_j, source_j), &done), (point, &core_j)))| {
                if done {
                    return None;
                }
                let reach = euclidean(&origin, point).max(origin_core).max(core_j);
                if reach < *best_j {
                    *best_j = reach;
                    *source_j = current;
                }
                Some((j, *best_j))
            })
            .reduce_with(|a, b| if b.1 < a.1 || (b.1 == a.1 && b.0 < a.0) { b } else { a });

        let Some((next, distance)) = pick else { break };
        edges.push(MstEdge {
            from: source[next],
            to: next,
            distance,
        });
        current = next;
    }

    edges
}

/// Build the single linkage hierarchy from edges sorted by distance.
pub fn single_linkage(sorted_edges: &[MstEdge], n: usize) -> Vec<LinkageRow> {
    let mut uf = LinkageUnionFind::new(n);
    sorted_edges
        .iter()
        .map(|edge| {
            let left = uf.find(edge.from);
            let right = uf.find(edge.to);
            let size = uf.union(left, right);
            LinkageRow {
                left,
                right,
                distance: edge.distance,
                size,
            }
        })
        .collect()
}

/// Nodes of the subtree under `root`, level by level.
fn bfs_from_hierarchy(linkage: &[LinkageRow], root: usize, n: usize) -> Vec<usize> {
    let mut out = Vec::new();
    let mut frontier = vec![root];
    while !frontier.is_empty() {
        out.extend_from_slice(&frontier);
        frontier = frontier
            .iter()
            .filter(|&&node| node >= n)
            .flat_map(|&node| {
                let row = &linkage[node - n];
                [row.left, row.right]
            })
            .collect();
    }
    out
}

/// Emit every point under `sub_root` as falling out of `parent` at `lambda`.
fn drop_subtree(
    linkage: &[LinkageRow],
    n: usize,
    sub_root: usize,
    parent: usize,
    lambda: f64,
    rows: &mut Vec<CondensedRow>,
    ignore: &mut [bool],
) {
    for node in bfs_from_hierarchy(linkage, sub_root, n) {
        if node < n {
            rows.push(CondensedRow {
                parent,
                child: node,
                lambda,
                size: 1,
            });
        }
        ignore[node] = true;
    }
}

/// Condense the single linkage hierarchy.
///
/// The root cluster is labelled `n`; new clusters are numbered upward from
/// `n + 1` in breadth-first order. When only one side of a split is large
/// enough, that side keeps its parent's label.
pub fn condense_tree(linkage: &[LinkageRow], n: usize, min_cluster_size: usize) -> Vec<CondensedRow> {
    if n < 2 || linkage.len() != n - 1 {
        return Vec::new();
    }

    let root = 2 * n - 2;
    let size_of = |node: usize| if node >= n { linkage[node - n].size } else { 1 };

    let mut relabel = vec![0usize; root + 1];
    relabel[root] = n;
    let mut next_label = n + 1;
    let mut ignore = vec![false; root + 1];
    let mut rows = Vec::with_capacity(2 * n);

    for node in bfs_from_hierarchy(linkage, root, n) {
        if ignore[node] || node < n {
            continue;
        }

        let LinkageRow {
            left,
            right,
            distance,
            ..
        } = linkage[node - n];
        let lambda = if distance > 0.0 {
            1.0 / distance
        } else {
            f64::INFINITY
        };
        let parent = relabel[node];
        let left_count = size_of(left);
        let right_count = size_of(right);

        match (left_count >= min_cluster_size, right_count >= min_cluster_size) {
            (true, true) => {
                for (child, count) in [(left, left_count), (right, right_count)] {
                    relabel[child] = next_label;
                    rows.push(CondensedRow {
                        parent,
                        child: next_label,
                        lambda,
                        size: count,
                    });
                    // A single point promoted to a cluster stays in it forever.
                    if child < n {
                        rows.push(CondensedRow {
                            parent: next_label,
                            child,
                            lambda: f64::INFINITY,
                            size: 1,
                        });
                    }
                    next_label += 1;
                }
            }
            (false, false) => {
                for child in [left, right] {
                    drop_subtree(linkage, n, child, parent, lambda, &mut rows, &mut ignore);
                }
            }
            (false, true) => {
                relabel[right] = parent;
                drop_subtree(linkage, n, left, parent, lambda, &mut rows, &mut ignore);
            }
            (true, false) => {
                relabel[left] = parent;
                drop_subtree(linkage, n, right, parent, lambda, &mut rows, &mut ignore);
            }
        }
    }

    rows
}

/// Clusters of the condensed tree that have no child clusters, ascending.
pub fn select_leaf_clusters(tree: &[CondensedRow], n: usize) -> Vec<usize> {
    let with_children: HashSet<usize> = tree
        .iter()
        .filter(|row| row.child >= n)
        .map(|row| row.parent)
        .collect();

    let mut leaves: Vec<usize> = tree
        .iter()
        .filter(|row| row.child >= n && !with_children.contains(&row.child))
        .map(|row| row.child)
        .collect();
    leaves.sort_unstable();
    leaves.dedup();
    leaves
}

/// Label points by the selected cluster they fall out of.
fn label_points(tree: &[CondensedRow], selected: &HashMap<usize, i32>, n: usize) -> Vec<i32> {
    let mut labels = vec![-1i32; n];
    for row in tree.iter().filter(|row| row.child < n) {
        if let Some(&id) = selected.get(&row.parent) {
            labels[row.child] = id;
        }
    }
    labels
}

/// Membership strength: a point's lambda relative to its cluster's death.
fn membership_probabilities(
    tree: &[CondensedRow],
    selected: &HashMap<usize, i32>,
    n: usize,
) -> Vec<f64> {
    let mut deaths: HashMap<usize, f64> = HashMap::new();
    for row in tree {
        let death = deaths.entry(row.parent).or_insert(0.0);
        if row.lambda > *death {
            *death = row.lambda;
        }
    }

    let mut probabilities = vec![0.0f64; n];
    for row in tree.iter().filter(|row| row.child < n) {
        if !selected.contains_key(&row.parent) {
            continue;
        }
        let max_lambda = deaths.get(&row.parent).copied().unwrap_or(0.0);
        probabilities[row.child] = if max_lambda == 0.0 || !row.lambda.is_finite() {
            1.0
        } else {
            row.lambda.min(max_lambda) / max_lambda
        };
    }
    probabilities
}

/// Density-based relative validity over the MST edges.
///
/// For each cluster, the sparseness `DSC` is its longest internal edge and
/// the separation `DSPC` its shortest edge to another cluster. The score is
/// the size-weighted mean of `(DSPC - DSC) / max(DSPC, DSC)` over all
/// points, noise included in the total. Clusters without an edge to another
/// cluster get twice the longest edge (or twice the shortest noise edge when
/// there is a single cluster) as separation.
pub fn relative_validity(mst: &[MstEdge], labels: &[i32]) -> f64 {
    let n_clusters = crate::core::table::count_clusters(labels);
    if n_clusters == 0 {
        return 0.0;
    }

    let mut sizes = vec![0usize; n_clusters];
    for &l in labels.iter().filter(|&&l| l >= 0) {
        sizes[l as usize] += 1;
    }
    let total = labels.len() as f64;

    let mut sparseness = vec![0.0f64; n_clusters];
    let mut separation = vec![f64::INFINITY; n_clusters];
    let mut min_outlier_sep = f64::INFINITY;
    let mut max_distance = 0.0f64;

    for edge in mst {
        let a = labels[edge.from];
        let b = labels[edge.to];
        max_distance = max_distance.max(edge.distance);

        match (a < 0, b < 0) {
            (true, true) => {}
            (true, false) | (false, true) => {
                min_outlier_sep = min_outlier_sep.min(edge.distance);
            }
            (false, false) if a == b => {
                let s = &mut sparseness[a as usize];
                *s = s.max(edge.distance);
            }
            (false, false) => {
                for c in [a as usize, b as usize] {
                    separation[c] = separation[c].min(edge.distance);
                }
            }
        }
    }

    if min_outlier_sep.is_infinite() {
        min_outlier_sep = max_distance;
    }
    let correction = 2.0
        * if n_clusters > 1 {
            max_distance
        } else {
            min_outlier_sep
        };

    (0..n_clusters)
        .map(|c| {
            let dspc = if separation[c].is_infinite() {
                correction
            } else {
                separation[c]
            };
            let dsc = sparseness[c];
            let denom = dspc.max(dsc);
            let v = if denom > 0.0 { (dspc - dsc) / denom } else { 0.0 };
            sizes[c] as f64 * v / total
        })
        .sum()
}

/// Run HDBSCAN* with leaf cluster selection.
///
/// # Arguments
///
/// * `points` - 2-D feature vectors, all finite
/// * `params` - Minimum cluster size and optional minimum samples
///
/// # Returns
///
/// Labels (contiguous from 0, `-1` for noise), membership probabilities, the
/// relative validity score and the spanning tree it was computed from. Fewer
/// than two points, or a minimum cluster size above the point count, give
/// all noise and a score of `0.0`.
///
/// # Errors
///
/// Fails when `min_cluster_size` or `min_samples` is zero, or a coordinate is
/// not finite.
pub fn hdbscan(points: &[[f64; 2]], params: &HdbscanParams) -> Result<HdbscanResult> {
    params.validate()?;
    if let Some(i) = points
        .iter()
        .position(|p| !p[0].is_finite() || !p[1].is_finite())
    {
        return Err(HdbscanError::NonFinitePoint(i));
    }

    let n = points.len();
    if n < 2 {
        return Ok(HdbscanResult::all_noise(n));
    }

    let k = params.neighbour_rank(n);
    let core = core_distances(points, k);
    let mst = mutual_reachability_mst(points, &core);

    let mut sorted = mst.clone();
    sorted.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    let linkage = single_linkage(&sorted, n);
    let tree = condense_tree(&linkage, n, params.min_cluster_size);

    let selected: HashMap<usize, i32> = select_leaf_clusters(&tree, n)
        .into_iter()
        .enumerate()
        .map(|(id, cluster)| (cluster, id as i32))
        .collect();

    let labels = label_points(&tree, &selected, n);
    let probabilities = membership_probabilities(&tree, &selected, n);
    let relative_validity = relative_validity(&mst, &labels);

    log::debug!(
        "HDBSCAN on {} points (min_cluster_size={}, k={}): {} clusters",
        n,
        params.min_cluster_size,
        k,
        selected.len()
    );

    Ok(HdbscanResult {
        labels,
        probabilities,
        relative_validity,
        n_clusters: selected.len(),
        mst,
    })
}
