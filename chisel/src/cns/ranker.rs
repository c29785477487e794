//! Ranker for the CSG-node search
//!
//! A candidate tree is scored by how consistently its signed-distance field
//! explains the primitives' supporting points, minus a size penalty that
//! scales with the amount of evidence (`lambda = ln` of the total point
//! count).  Ranks are routinely negative; the engine only compares them.
use crate::{csg::CsgNode, evo::Ranker, primitive::PrimitiveRef};

/// Surface tolerance for the tree-level geometry score
pub const EPSILON: f64 = 0.01;

/// Angular tolerance between field gradient and point normal
pub const ALPHA: f64 = std::f64::consts::PI / 18.0;

/// Size-pressure weight based on the evidence: `ln` of the total number of
/// supporting points
pub fn lambda_from_points(primitives: &[PrimitiveRef]) -> f64 {
    let n: usize =
        primitives.iter().map(|p| p.num_surface_points()).sum();
    (n.max(1) as f64).ln()
}

/// Fraction of supporting points that lie on the tree's surface with an
/// agreeing normal
pub fn geometry_score(
    node: &CsgNode,
    epsilon: f64,
    alpha: f64,
    primitives: &[PrimitiveRef],
) -> f64 {
    let Some(field) = node.to_implicit() else {
        return f64::NEG_INFINITY;
    };
    let cos_alpha = alpha.cos();
    let mut valid = 0usize;
    let mut total = 0usize;
    for p in primitives {
        for pt in p.surface_points() {
            total += 1;
            let (d, g) = field.signed_distance_and_gradient(&pt.pos);
            let norm = g.norm();
            if d.abs() < epsilon
                && norm > 0.0
                && pt.normal.dot(&g) / norm > cos_alpha
            {
                valid += 1;
            }
        }
    }
    if total == 0 {
        0.0
    } else {
        valid as f64 / total as f64
    }
}

/// Ranker over CSG trees
pub struct CsgNodeRanker {
    lambda: f64,
    primitives: Vec<PrimitiveRef>,
}

impl CsgNodeRanker {
    pub fn new(lambda: f64, primitives: Vec<PrimitiveRef>) -> Self {
        Self { lambda, primitives }
    }

    /// Builds a ranker with evidence-scaled size pressure
    pub fn with_default_lambda(primitives: Vec<PrimitiveRef>) -> Self {
        let lambda = lambda_from_points(&primitives);
        Self::new(lambda, primitives)
    }
}

impl Ranker for CsgNodeRanker {
    type Creature = CsgNode;

    fn rank(&self, node: &CsgNode) -> f64 {
        if !node.arity_valid() {
            return f64::NEG_INFINITY;
        }
        let geo = geometry_score(node, EPSILON, ALPHA, &self.primitives);
        geo - self.lambda * node.num_nodes() as f64
    }
}
