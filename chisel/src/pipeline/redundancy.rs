//! Sampling-based redundancy removal
//!
//! Simplifies a tree without changing which sample points it contains:
//! structural identities first (double complements, unary unions), then a
//! bottom-up pass that replaces an operator with one of its operands
//! whenever the samples can't tell the difference.
use crate::{csg::CsgNode, geometry::Aabb};
use log::debug;
use nalgebra::Vector3;

/// Grid sample points over the node's bounding box, grown by one cell so
/// strictly-outside space is represented
pub fn grid_samples(node: &CsgNode, grid_size: f64) -> Vec<Vector3<f64>> {
    let Some(aabb) = node
        .to_implicit()
        .and_then(|f| f.aabb())
        .map(|b| b.grown(grid_size))
    else {
        return vec![];
    };
    sample_aabb(&aabb, grid_size)
}

/// Uniform grid over a box, cell centres
pub fn sample_aabb(aabb: &Aabb, grid_size: f64) -> Vec<Vector3<f64>> {
    let counts = (aabb.max - aabb.min) / grid_size;
    let counts = counts.map(|c| (c.ceil() as usize).max(1));
    let mut out = vec![];
    for i in 0..counts.x {
        for j in 0..counts.y {
            for k in 0..counts.z {
                out.push(
                    aabb.min
                        + Vector3::new(
                            (i as f64 + 0.5) * grid_size,
                            (j as f64 + 0.5) * grid_size,
                            (k as f64 + 0.5) * grid_size,
                        ),
                );
            }
        }
    }
    out
}

fn classify(node: &CsgNode, samples: &[Vector3<f64>]) -> Vec<bool> {
    samples
        .iter()
        .map(|x| node.signed_distance(x) <= 0.0)
        .collect()
}

/// Removes redundant structure from a tree
///
/// `samples` are the probe points; when empty, a grid of `grid_size` cells
/// over the tree's bounding box is used instead.
pub fn remove_redundancies(
    node: CsgNode,
    grid_size: f64,
    samples: &[Vector3<f64>],
) -> CsgNode {
    let owned;
    let samples = if samples.is_empty() {
        owned = grid_samples(&node, grid_size);
        &owned
    } else {
        samples
    };
    let node = simplify_structure(node);
    if samples.is_empty() {
        return node;
    }
    let before = node.num_nodes();
    let out = prune(node, samples);
    if out.num_nodes() < before {
        debug!(
            "redundancy removal: {} nodes -> {}",
            before,
            out.num_nodes()
        );
    }
    out
}

/// Structural identities that need no sampling
fn simplify_structure(node: CsgNode) -> CsgNode {
    let CsgNode::Op { op, children } = node else {
        return node;
    };
    let mut children: Vec<CsgNode> = children
        .into_iter()
        .map(simplify_structure)
        .filter(|c| !c.is_noop())
        .collect();
    use crate::csg::CsgOp::*;
    match (op, children.len()) {
        (_, 0) => CsgNode::noop(),
        // An operand lost to a no-op leaves the survivor behind
        (Union | Intersection | Difference, 1) => children.pop().unwrap(),
        (Complement, 1) => {
            // Double complement cancels
            match children.pop().unwrap() {
                CsgNode::Op {
                    op: Complement,
                    children: mut inner,
                } => inner.pop().unwrap(),
                other => CsgNode::Op {
                    op,
                    children: vec![other],
                },
            }
        }
        _ => CsgNode::Op { op, children },
    }
}

/// Bottom-up operand substitution: an operator node whose in/out
/// classification matches one of its operands on every sample collapses to
/// that operand
fn prune(node: CsgNode, samples: &[Vector3<f64>]) -> CsgNode {
    let CsgNode::Op { op, children } = node else {
        return node;
    };
    let children: Vec<CsgNode> =
        children.into_iter().map(|c| prune(c, samples)).collect();
    let node = CsgNode::Op { op, children };
    let own = classify(&node, samples);
    let CsgNode::Op { op, children } = node else {
        unreachable!()
    };
    for c in &children {
        if classify(c, samples) == own {
            return c.clone();
        }
    }
    CsgNode::Op { op, children }
}
