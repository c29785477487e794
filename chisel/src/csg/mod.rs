//! CSG expression trees
//!
//! A [`CsgNode`] owns its children by value; leaf primitives are shared via
//! reference-counted handles.  Mutation and crossover in the tree search
//! clone whole subtrees, which is cheap because leaves only bump a
//! refcount.
mod dot;
mod json;

pub use dot::write_dot;
pub use json::{node_from_json, node_from_json_file, node_to_json};

use crate::{implicit::ImplicitFn, primitive::PrimitiveRef};
use nalgebra::Vector3;
use std::hash::{Hash, Hasher};

/// Boolean operators for interior tree nodes
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CsgOp {
    Union,
    Intersection,
    Difference,
    Complement,

    /// A placeholder produced by failed loads and empty optimisations; it
    /// never evaluates and loading one is a fatal condition for the driver
    Noop,
}

impl CsgOp {
    /// Allowed child count range, inclusive
    pub fn allowed_children(&self) -> (usize, usize) {
        match self {
            CsgOp::Union | CsgOp::Intersection => (2, usize::MAX),
            CsgOp::Difference => (2, 2),
            CsgOp::Complement => (1, 1),
            CsgOp::Noop => (0, 0),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CsgOp::Union => "Union",
            CsgOp::Intersection => "Intersection",
            CsgOp::Difference => "Difference",
            CsgOp::Complement => "Complement",
            CsgOp::Noop => "Noop",
        }
    }
}

/// A CSG expression tree
#[derive(Clone, Debug)]
pub enum CsgNode {
    /// An interior boolean operator with its operands
    Op { op: CsgOp, children: Vec<CsgNode> },

    /// A leaf referencing a shared primitive
    Leaf(PrimitiveRef),
}

impl Hash for CsgNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            CsgNode::Op { op, children } => {
                0u8.hash(state);
                op.hash(state);
                children.hash(state);
            }
            CsgNode::Leaf(p) => {
                1u8.hash(state);
                p.hash(state);
            }
        }
    }
}

impl CsgNode {
    pub fn noop() -> Self {
        CsgNode::Op {
            op: CsgOp::Noop,
            children: vec![],
        }
    }

    pub fn leaf(p: PrimitiveRef) -> Self {
        CsgNode::Leaf(p)
    }

    pub fn op(op: CsgOp, children: Vec<CsgNode>) -> Self {
        CsgNode::Op { op, children }
    }

    pub fn union(a: CsgNode, b: CsgNode) -> Self {
        Self::op(CsgOp::Union, vec![a, b])
    }

    pub fn intersection(a: CsgNode, b: CsgNode) -> Self {
        Self::op(CsgOp::Intersection, vec![a, b])
    }

    pub fn difference(a: CsgNode, b: CsgNode) -> Self {
        Self::op(CsgOp::Difference, vec![a, b])
    }

    pub fn complement(a: CsgNode) -> Self {
        Self::op(CsgOp::Complement, vec![a])
    }

    pub fn is_noop(&self) -> bool {
        matches!(
            self,
            CsgNode::Op {
                op: CsgOp::Noop,
                ..
            }
        )
    }

    /// Total number of nodes, leaves included
    pub fn num_nodes(&self) -> usize {
        match self {
            CsgNode::Op { children, .. } => {
                1 + children.iter().map(|c| c.num_nodes()).sum::<usize>()
            }
            CsgNode::Leaf(_) => 1,
        }
    }

    /// Tree depth; a bare leaf has depth 0
    pub fn depth(&self) -> usize {
        match self {
            CsgNode::Op { children, .. } => {
                1 + children.iter().map(|c| c.depth()).max().unwrap_or(0)
            }
            CsgNode::Leaf(_) => 0,
        }
    }

    /// Borrows the subtree at the given pre-order index
    pub fn subtree_at(&self, index: usize) -> Option<&CsgNode> {
        if index == 0 {
            return Some(self);
        }
        let mut remaining = index - 1;
        if let CsgNode::Op { children, .. } = self {
            for c in children {
                let size = c.num_nodes();
                if remaining < size {
                    return c.subtree_at(remaining);
                }
                remaining -= size;
            }
        }
        None
    }

    /// Replaces the subtree at the given pre-order index
    ///
    /// Returns false (leaving the tree unchanged) if the index is out of
    /// range.
    pub fn replace_subtree_at(
        &mut self,
        index: usize,
        subtree: CsgNode,
    ) -> bool {
        if index == 0 {
            *self = subtree;
            return true;
        }
        let mut remaining = index - 1;
        if let CsgNode::Op { children, .. } = self {
            for c in children {
                let size = c.num_nodes();
                if remaining < size {
                    return c.replace_subtree_at(remaining, subtree);
                }
                remaining -= size;
            }
        }
        false
    }

    /// Checks operator arity over the whole tree
    pub fn arity_valid(&self) -> bool {
        match self {
            CsgNode::Op { op, children } => {
                let (lo, hi) = op.allowed_children();
                children.len() >= lo
                    && children.len() <= hi
                    && children.iter().all(|c| c.arity_valid())
            }
            CsgNode::Leaf(_) => true,
        }
    }

    /// Re-associates n-ary unions and intersections into left-deep binary
    /// form
    pub fn to_binary(self) -> CsgNode {
        match self {
            CsgNode::Op { op, children } => {
                let mut children: Vec<CsgNode> = children
                    .into_iter()
                    .map(|c| c.to_binary())
                    .collect();
                if matches!(op, CsgOp::Union | CsgOp::Intersection)
                    && children.len() > 2
                {
                    let mut acc = children.remove(0);
                    for c in children {
                        acc = CsgNode::Op {
                            op,
                            children: vec![acc, c],
                        };
                    }
                    acc
                } else {
                    CsgNode::Op { op, children }
                }
            }
            leaf => leaf,
        }
    }

    /// Signed distance of the whole expression
    pub fn signed_distance(&self, x: &Vector3<f64>) -> f64 {
        match self {
            CsgNode::Op { op, children } => match op {
                CsgOp::Union => children
                    .iter()
                    .map(|c| c.signed_distance(x))
                    .fold(f64::INFINITY, f64::min),
                CsgOp::Intersection => children
                    .iter()
                    .map(|c| c.signed_distance(x))
                    .fold(f64::NEG_INFINITY, f64::max),
                CsgOp::Difference => children[0]
                    .signed_distance(x)
                    .max(-children[1].signed_distance(x)),
                CsgOp::Complement => -children[0].signed_distance(x),
                CsgOp::Noop => f64::INFINITY,
            },
            CsgNode::Leaf(p) => p.implicit.signed_distance(x),
        }
    }

    /// Signed distance and gradient, propagated from the winning branch
    pub fn signed_distance_and_gradient(
        &self,
        x: &Vector3<f64>,
    ) -> (f64, Vector3<f64>) {
        match self {
            CsgNode::Op { op, children } => match op {
                CsgOp::Union => children
                    .iter()
                    .map(|c| c.signed_distance_and_gradient(x))
                    .min_by(|a, b| a.0.total_cmp(&b.0))
                    .unwrap_or((f64::INFINITY, Vector3::z())),
                CsgOp::Intersection => children
                    .iter()
                    .map(|c| c.signed_distance_and_gradient(x))
                    .max_by(|a, b| a.0.total_cmp(&b.0))
                    .unwrap_or((f64::NEG_INFINITY, Vector3::z())),
                CsgOp::Difference => {
                    let da = children[0].signed_distance_and_gradient(x);
                    let (db, gb) =
                        children[1].signed_distance_and_gradient(x);
                    if da.0 >= -db {
                        da
                    } else {
                        (-db, -gb)
                    }
                }
                CsgOp::Complement => {
                    let (d, g) =
                        children[0].signed_distance_and_gradient(x);
                    (-d, -g)
                }
                CsgOp::Noop => (f64::INFINITY, Vector3::z()),
            },
            CsgNode::Leaf(p) => p.implicit.signed_distance_and_gradient(x),
        }
    }

    /// All distinct leaf primitives, deduplicated by name, in first-seen
    /// order
    pub fn distinct_primitives(&self) -> Vec<PrimitiveRef> {
        let mut out: Vec<PrimitiveRef> = vec![];
        self.visit_leaves(&mut |p| {
            if !out.iter().any(|q| q.name == p.name) {
                out.push(p.clone());
            }
        });
        out
    }

    fn visit_leaves(&self, f: &mut impl FnMut(&PrimitiveRef)) {
        match self {
            CsgNode::Op { children, .. } => {
                for c in children {
                    c.visit_leaves(f);
                }
            }
            CsgNode::Leaf(p) => f(p),
        }
    }

    /// Rewrites same-named leaves to share a single primitive handle
    pub fn dedup_primitives_by_name(self) -> CsgNode {
        let distinct = self.distinct_primitives();
        let mut out = self;
        out.map_leaves(&|p| {
            distinct
                .iter()
                .find(|q| q.name == p.name)
                .cloned()
                .unwrap_or_else(|| p.clone())
        });
        out
    }

    fn map_leaves(&mut self, f: &impl Fn(&PrimitiveRef) -> PrimitiveRef) {
        match self {
            CsgNode::Op { children, .. } => {
                for c in children {
                    c.map_leaves(f);
                }
            }
            CsgNode::Leaf(p) => *p = f(p),
        }
    }

    /// Converts the tree into an equivalent [`ImplicitFn`], or `None` for
    /// Noop subtrees
    pub fn to_implicit(&self) -> Option<ImplicitFn> {
        match self {
            CsgNode::Op { op, children } => {
                let mut fields =
                    children.iter().map(|c| c.to_implicit());
                match op {
                    CsgOp::Union | CsgOp::Intersection => {
                        let mut acc = fields.next()??;
                        for f in fields {
                            let f = f?;
                            acc = if *op == CsgOp::Union {
                                ImplicitFn::Union(
                                    Box::new(acc),
                                    Box::new(f),
                                )
                            } else {
                                ImplicitFn::Intersection(
                                    Box::new(acc),
                                    Box::new(f),
                                )
                            };
                        }
                        Some(acc)
                    }
                    CsgOp::Difference => Some(ImplicitFn::Difference(
                        Box::new(fields.next()??),
                        Box::new(fields.next()??),
                    )),
                    CsgOp::Complement => Some(ImplicitFn::Complement(
                        Box::new(fields.next()??),
                    )),
                    CsgOp::Noop => None,
                }
            }
            CsgNode::Leaf(p) => Some(ImplicitFn::Geometry(p.clone())),
        }
    }
}

/// Interprets a primitive set as a CSG: the union of the non-cutouts minus
/// the union of the cutouts
pub fn set_as_csg(
    primitives: &[crate::primitive::Primitive],
) -> CsgNode {
    let mut keep: Vec<CsgNode> = vec![];
    let mut cut: Vec<CsgNode> = vec![];
    for p in primitives {
        let leaf = CsgNode::leaf(std::sync::Arc::new(p.clone()));
        if p.cutout {
            cut.push(leaf);
        } else {
            keep.push(leaf);
        }
    }
    let fold = |mut nodes: Vec<CsgNode>| -> Option<CsgNode> {
        let mut acc = if nodes.is_empty() {
            return None;
        } else {
            nodes.remove(0)
        };
        for n in nodes {
            acc = CsgNode::union(acc, n);
        }
        Some(acc)
    };
    match (fold(keep), fold(cut)) {
        (Some(k), Some(c)) => CsgNode::difference(k, c),
        (Some(k), None) => k,
        (None, Some(c)) => CsgNode::complement(c),
        (None, None) => CsgNode::noop(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        geometry::PointCloud, manifold::Manifold, primitive::create_sphere,
    };
    use std::sync::Arc;

    pub fn sphere_leaf(x: f64, r: f64) -> CsgNode {
        let m = Arc::new(Manifold::sphere(
            Vector3::new(x, 0.0, 0.0),
            r,
            PointCloud::default(),
        ));
        CsgNode::leaf(Arc::new(create_sphere(&m).unwrap()))
    }

    #[test]
    fn node_counts_and_depth() {
        let t = CsgNode::union(
            CsgNode::difference(sphere_leaf(0.0, 1.0), sphere_leaf(1.0, 1.0)),
            sphere_leaf(2.0, 1.0),
        );
        assert_eq!(t.num_nodes(), 5);
        assert_eq!(t.depth(), 2);
        assert!(t.arity_valid());
    }

    #[test]
    fn preorder_indexing() {
        let t = CsgNode::union(
            CsgNode::difference(sphere_leaf(0.0, 1.0), sphere_leaf(1.0, 1.0)),
            sphere_leaf(2.0, 1.0),
        );
        assert!(matches!(
            t.subtree_at(0),
            Some(CsgNode::Op {
                op: CsgOp::Union,
                ..
            })
        ));
        assert!(matches!(
            t.subtree_at(1),
            Some(CsgNode::Op {
                op: CsgOp::Difference,
                ..
            })
        ));
        assert!(matches!(t.subtree_at(2), Some(CsgNode::Leaf(_))));
        assert!(matches!(t.subtree_at(4), Some(CsgNode::Leaf(_))));
        assert!(t.subtree_at(5).is_none());

        let mut t = t;
        assert!(t.replace_subtree_at(1, sphere_leaf(9.0, 1.0)));
        assert_eq!(t.num_nodes(), 3);
    }

    #[test]
    fn binarise_left_deep() {
        let t = CsgNode::op(
            CsgOp::Union,
            vec![
                sphere_leaf(0.0, 1.0),
                sphere_leaf(1.0, 1.0),
                sphere_leaf(2.0, 1.0),
                sphere_leaf(3.0, 1.0),
            ],
        );
        let b = t.to_binary();
        assert_eq!(b.num_nodes(), 7);
        assert_eq!(b.depth(), 3);
        let CsgNode::Op { op, children } = &b else {
            panic!("expected operator root");
        };
        assert_eq!(*op, CsgOp::Union);
        assert_eq!(children.len(), 2);
        // Right child of every union is a leaf
        assert!(matches!(children[1], CsgNode::Leaf(_)));
    }

    #[test]
    fn difference_evaluation() {
        let t = CsgNode::difference(
            sphere_leaf(0.0, 1.0),
            sphere_leaf(0.5, 1.0),
        );
        // Inside the subtrahend: outside the result
        assert!(t.signed_distance(&Vector3::new(0.5, 0.0, 0.0)) > 0.0);
        // Left lobe survives
        assert!(t.signed_distance(&Vector3::new(-0.8, 0.0, 0.0)) < 0.0);
    }

    #[test]
    fn set_interpretation() {
        let CsgNode::Leaf(a) = sphere_leaf(0.0, 1.0) else {
            unreachable!()
        };
        let CsgNode::Leaf(b) = sphere_leaf(0.5, 1.0) else {
            unreachable!()
        };
        let set = vec![(*a).clone(), (*b).with_cutout(true)];
        let node = set_as_csg(&set);
        assert!(node.signed_distance(&Vector3::new(0.5, 0.0, 0.0)) > 0.0);
        assert!(node.signed_distance(&Vector3::new(-0.8, 0.0, 0.0)) < 0.0);
        assert!(set_as_csg(&[]).is_noop());
    }

    #[test]
    fn dedup_by_name_shares_handles() {
        let CsgNode::Leaf(a) = sphere_leaf(0.0, 1.0) else {
            unreachable!()
        };
        // A second, separately-allocated copy with the same name
        let b = Arc::new((*a).clone());
        let t = CsgNode::union(CsgNode::Leaf(a), CsgNode::Leaf(b))
            .dedup_primitives_by_name();
        assert_eq!(t.distinct_primitives().len(), 1);
        let CsgNode::Op { children, .. } = &t else {
            unreachable!()
        };
        let (CsgNode::Leaf(x), CsgNode::Leaf(y)) =
            (&children[0], &children[1])
        else {
            unreachable!()
        };
        assert!(Arc::ptr_eq(x, y));
    }
}
