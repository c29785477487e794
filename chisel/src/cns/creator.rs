//! Creator for the CSG-node search
//!
//! Genetic-programming operators over expression trees: random tree
//! growth bounded by a depth budget, subtree-replacement mutation, and
//! subtree-swap crossover that falls back per side when a swap would blow
//! the depth limit.
use crate::{
    csg::{CsgNode, CsgOp},
    evo::Creator,
    primitive::PrimitiveRef,
};
use rand::{rngs::StdRng, Rng};

/// Operators eligible for random growth (complement only ever appears via
/// cutout composition)
const GROW_OPS: [CsgOp; 3] =
    [CsgOp::Union, CsgOp::Intersection, CsgOp::Difference];

#[derive(Copy, Clone, Debug)]
pub struct CnsCreatorParams {
    /// Probability that mutation discards the tree and starts over
    pub create_new_prob: f64,

    /// Probability that a child slot grows an operator instead of a leaf
    pub subtree_prob: f64,

    pub max_depth: usize,
}

impl Default for CnsCreatorParams {
    fn default() -> Self {
        Self {
            create_new_prob: 0.5,
            subtree_prob: 0.7,
            max_depth: 10,
        }
    }
}

/// Creator over CSG trees with leaves drawn from a fixed primitive list
pub struct CsgNodeCreator {
    primitives: Vec<PrimitiveRef>,
    params: CnsCreatorParams,
}

impl CsgNodeCreator {
    pub fn new(
        primitives: Vec<PrimitiveRef>,
        params: CnsCreatorParams,
    ) -> Self {
        assert!(
            !primitives.is_empty(),
            "tree search needs at least one primitive"
        );
        Self { primitives, params }
    }

    fn random_leaf(&self, rng: &mut StdRng) -> CsgNode {
        let i = rng.gen_range(0..self.primitives.len());
        CsgNode::leaf(self.primitives[i].clone())
    }

    /// Grows a random tree of at most the given depth
    pub fn create_depth(&self, max_depth: usize, rng: &mut StdRng) -> CsgNode {
        if max_depth == 0 {
            return self.random_leaf(rng);
        }
        let op = GROW_OPS[rng.gen_range(0..GROW_OPS.len())];
        let mut node = CsgNode::op(op, vec![]);
        self.fill_children(&mut node, max_depth, 1, rng);
        node
    }

    fn fill_children(
        &self,
        node: &mut CsgNode,
        max_depth: usize,
        cur_depth: usize,
        rng: &mut StdRng,
    ) {
        let CsgNode::Op { op, children } = node else {
            return;
        };
        let (lo, hi) = op.allowed_children();
        // Growth always uses the smallest workable arity
        let num_children = hi.min(2).max(lo);
        for _ in 0..num_children {
            let child = if rng.gen_bool(self.params.subtree_prob)
                && cur_depth < max_depth
            {
                let op = GROW_OPS[rng.gen_range(0..GROW_OPS.len())];
                let mut child = CsgNode::op(op, vec![]);
                self.fill_children(&mut child, max_depth, cur_depth + 1, rng);
                child
            } else {
                self.random_leaf(rng)
            };
            children.push(child);
        }
    }
}

impl Creator for CsgNodeCreator {
    type Creature = CsgNode;

    fn create(&self, rng: &mut StdRng) -> CsgNode {
        self.create_depth(self.params.max_depth, rng)
    }

    /// Replaces a uniformly-chosen subtree with a fresh one that fits in
    /// the remaining depth budget; occasionally starts from scratch
    fn mutate(&self, node: &CsgNode, rng: &mut StdRng) -> CsgNode {
        if rng.gen_bool(self.params.create_new_prob) {
            return self.create(rng);
        }
        let index = rng.gen_range(0..node.num_nodes());
        let budget = self.params.max_depth.saturating_sub(node.depth());
        let mut out = node.clone();
        out.replace_subtree_at(index, self.create_depth(budget, rng));
        out
    }

    /// Swaps uniformly-chosen subtrees; a side whose result exceeds the
    /// depth limit keeps its original instead
    fn crossover(
        &self,
        a: &CsgNode,
        b: &CsgNode,
        rng: &mut StdRng,
    ) -> (CsgNode, CsgNode) {
        let index_a = rng.gen_range(0..a.num_nodes());
        let index_b = rng.gen_range(0..b.num_nodes());
        let sub_a = a.subtree_at(index_a).unwrap().clone();
        let sub_b = b.subtree_at(index_b).unwrap().clone();

        let mut out_a = a.clone();
        out_a.replace_subtree_at(index_a, sub_b);
        let mut out_b = b.clone();
        out_b.replace_subtree_at(index_b, sub_a);

        (
            if out_a.depth() <= self.params.max_depth {
                out_a
            } else {
                a.clone()
            },
            if out_b.depth() <= self.params.max_depth {
                out_b
            } else {
                b.clone()
            },
        )
    }
}
