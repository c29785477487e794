//! Matching and fusing per-clique trees
//!
//! Per-clique solutions overlap wherever cliques share primitives.  To fuse
//! them, trees are flattened to a canonical pre-order serialization and
//! compared for their largest common run of nodes; the pair with the
//! largest common subgraph is merged first.
use crate::csg::CsgNode;

/// Canonical linear form of a CSG tree
///
/// `labels[i]` identifies the node at pre-order position `i` (operator kind
/// or leaf primitive); `sizes[i]` is the node's subtree size, so a common
/// run starting at `i` with length `sizes[i]` covers a whole subtree.
pub struct SerializedTree {
    pub labels: Vec<u64>,
    pub sizes: Vec<usize>,
}

impl SerializedTree {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Flattens a tree into its canonical serialized form
pub fn serialize_tree(node: &CsgNode) -> SerializedTree {
    let mut out = SerializedTree {
        labels: vec![],
        sizes: vec![],
    };
    serialize_into(node, &mut out);
    out
}

fn serialize_into(node: &CsgNode, out: &mut SerializedTree) {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut h = DefaultHasher::new();
    match node {
        CsgNode::Op { op, .. } => op.hash(&mut h),
        CsgNode::Leaf(p) => p.name.hash(&mut h),
    }
    out.labels.push(h.finish());
    out.sizes.push(node.num_nodes());
    if let CsgNode::Op { children, .. } = node {
        for c in children {
            serialize_into(c, out);
        }
    }
}

/// A common run between two serialized trees
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CommonSubgraph {
    /// Pre-order index of the run's first node in the first tree
    pub a_root: usize,
    /// Pre-order index of the run's first node in the second tree
    pub b_root: usize,
    /// Number of serialized nodes in the run
    pub size: usize,
}

/// Finds the largest common run between two serialized trees, or `None` if
/// the trees share nothing
pub fn largest_common_subgraph(
    a: &SerializedTree,
    b: &SerializedTree,
) -> Option<CommonSubgraph> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    // Longest common substring over the label sequences
    let mut best: Option<CommonSubgraph> = None;
    let mut prev = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        let mut row = vec![0usize; b.len() + 1];
        for j in 1..=b.len() {
            if a.labels[i - 1] == b.labels[j - 1] {
                let run = prev[j - 1] + 1;
                row[j] = run;
                if best.map(|l| run > l.size).unwrap_or(true) {
                    best = Some(CommonSubgraph {
                        a_root: i - run,
                        b_root: j - run,
                        size: run,
                    });
                }
            }
        }
        prev = row;
    }
    best
}

/// Outcome of merging two per-clique trees
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MergeChoice {
    /// Keep the first tree
    First,
    /// Keep the second tree
    Second,
}

/// Decides which of two overlapping trees survives a merge
///
/// When the common run covers one tree entirely, the other tree already
/// contains it and wins.  The substitution rule for partial overlaps is
/// unresolved; the deterministic fallback keeps the higher-ranked input.
pub fn merge_nodes(
    a: &SerializedTree,
    b: &SerializedTree,
    lcs: &CommonSubgraph,
    rank_a: f64,
    rank_b: f64,
) -> MergeChoice {
    let covers_b = lcs.b_root == 0 && lcs.size == b.len();
    let covers_a = lcs.a_root == 0 && lcs.size == a.len();
    if covers_b && !covers_a {
        MergeChoice::First
    } else if covers_a && !covers_b {
        MergeChoice::Second
    } else if rank_b > rank_a {
        MergeChoice::Second
    } else {
        MergeChoice::First
    }
}
