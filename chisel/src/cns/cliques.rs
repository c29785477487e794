//! Per-clique tree search and cross-clique merging
//!
//! Each clique of the connection graph is solved on its own: single
//! primitives become leaves, pairs are enumerated exhaustively, and larger
//! cliques run the full genetic search.  The per-clique trees are then
//! fused by repeatedly merging the pair with the largest common serialized
//! subgraph; trees that share nothing combine under a union.
use super::{
    creator::{CnsCreatorParams, CsgNodeCreator},
    ranker::{lambda_from_points, CsgNodeRanker},
};
use crate::{
    csg::CsgNode,
    evo::{self, NoFitnessIncreaseStop, Ranker, TournamentSelector},
    graph::{
        largest_common_subgraph, merge_nodes, serialize_tree, Clique,
        CommonSubgraph, MergeChoice,
    },
    primitive::PrimitiveRef,
};
use log::{debug, info};

/// Knobs for one tree search
#[derive(Clone, Debug, Default)]
pub struct CnsParams {
    pub engine: evo::Params,
    pub creator: CnsCreatorParams,
}

/// The four candidate trees over an ordered primitive pair
fn pair_candidates(a: &PrimitiveRef, b: &PrimitiveRef) -> [CsgNode; 4] {
    [
        CsgNode::union(CsgNode::leaf(a.clone()), CsgNode::leaf(b.clone())),
        CsgNode::intersection(
            CsgNode::leaf(a.clone()),
            CsgNode::leaf(b.clone()),
        ),
        CsgNode::difference(
            CsgNode::leaf(a.clone()),
            CsgNode::leaf(b.clone()),
        ),
        CsgNode::difference(
            CsgNode::leaf(b.clone()),
            CsgNode::leaf(a.clone()),
        ),
    ]
}

/// Exhaustively ranks `{A∪B, A∩B, A\B, B\A}` and returns the best
pub fn best_pairwise(a: &PrimitiveRef, b: &PrimitiveRef) -> CsgNode {
    let ranker = CsgNodeRanker::with_default_lambda(vec![
        a.clone(),
        b.clone(),
    ]);
    pair_candidates(a, b)
        .into_iter()
        .max_by(|x, y| ranker.rank(x).total_cmp(&ranker.rank(y)))
        .unwrap()
}

/// Runs the genetic tree search over a primitive group
pub fn create_csg_with_ga(
    primitives: &[PrimitiveRef],
    params: &CnsParams,
) -> CsgNode {
    let creator =
        CsgNodeCreator::new(primitives.to_vec(), params.creator);
    let lambda = lambda_from_points(primitives);
    debug!("tree search over {} primitives, lambda {lambda}", primitives.len());
    let ranker = CsgNodeRanker::new(lambda, primitives.to_vec());
    let selector = TournamentSelector::new(params.engine.tournament_k);
    let stop = NoFitnessIncreaseStop::new(
        params.engine.max_count,
        params.engine.delta,
        params.engine.max_count,
    );

    // The search runs as a background task; this call site has nothing else
    // to do, so it joins straight away
    let handle = evo::run_async(
        params.engine,
        selector,
        creator,
        ranker,
        stop,
    );
    let result = handle.join();
    result
        .best()
        .map(|b| b.creature.clone())
        .unwrap_or_else(CsgNode::noop)
}

/// Solves each clique separately
///
/// Empty cliques are skipped, singletons become leaves, pairs are
/// enumerated exhaustively, and anything larger runs the genetic search.
pub fn nodes_for_cliques(
    cliques: &[Clique],
    params: &CnsParams,
) -> Vec<(Clique, CsgNode)> {
    cliques
        .iter()
        .filter(|c| !c.is_empty())
        .map(|clique| {
            let node = match clique.as_slice() {
                [lone] => CsgNode::leaf(lone.clone()),
                [a, b] => best_pairwise(a, b),
                many => create_csg_with_ga(many, params),
            };
            (clique.clone(), node)
        })
        .collect()
}

/// Fuses per-clique trees into a single tree
///
/// The pair with the largest common serialized subgraph merges first; when
/// a merge is ambiguous the higher-ranked tree survives.  Trees with no
/// common subgraph are combined under a union once no overlapping pairs
/// remain.
pub fn merge_clique_nodes(
    nodes: Vec<CsgNode>,
    all_primitives: &[PrimitiveRef],
) -> CsgNode {
    let mut nodes: Vec<CsgNode> =
        nodes.into_iter().filter(|n| !n.is_noop()).collect();
    if nodes.is_empty() {
        return CsgNode::noop();
    }
    let ranker =
        CsgNodeRanker::with_default_lambda(all_primitives.to_vec());

    while nodes.len() > 1 {
        let serialized: Vec<_> = nodes.iter().map(serialize_tree).collect();
        let mut best: Option<(usize, usize, CommonSubgraph)> = None;
        for i in 0..nodes.len() {
            for j in i + 1..nodes.len() {
                if let Some(lcs) = largest_common_subgraph(
                    &serialized[i],
                    &serialized[j],
                ) {
                    if best
                        .map(|(_, _, b): (usize, usize, _)| lcs.size > b.size)
                        .unwrap_or(true)
                    {
                        best = Some((i, j, lcs));
                    }
                }
            }
        }

        match best {
            Some((i, j, lcs)) => {
                let choice = merge_nodes(
                    &serialized[i],
                    &serialized[j],
                    &lcs,
                    ranker.rank(&nodes[i]),
                    ranker.rank(&nodes[j]),
                );
                let dropped = match choice {
                    MergeChoice::First => j,
                    MergeChoice::Second => i,
                };
                debug!("merged clique trees {i} and {j}, dropping {dropped}");
                nodes.remove(dropped);
            }
            None => {
                // Nothing overlaps: union the first two and keep going
                let b = nodes.remove(1);
                let a = nodes.remove(0);
                nodes.push(CsgNode::union(a, b));
            }
        }
    }
    nodes.pop().unwrap()
}

/// Full orchestration: per-clique search, then cross-clique merge
pub fn solve_cliques(
    cliques: &[Clique],
    params: &CnsParams,
) -> CsgNode {
    let solved = nodes_for_cliques(cliques, params);
    info!("solved {} cliques", solved.len());
    let mut all: Vec<PrimitiveRef> = vec![];
    for (clique, _) in &solved {
        for p in clique {
            if !all.iter().any(|q| q.name == p.name) {
                all.push(p.clone());
            }
        }
    }
    merge_clique_nodes(
        solved.into_iter().map(|(_, n)| n).collect(),
        &all,
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cns::test_support::sampled_sphere;
    use crate::csg::CsgOp;
    use nalgebra::Vector3;

    fn op_of(node: &CsgNode) -> CsgOp {
        let CsgNode::Op { op, .. } = node else {
            panic!("expected an operator node");
        };
        *op
    }

    #[test]
    fn disjoint_pair_unions() {
        let a = sampled_sphere(Vector3::zeros(), 1.0);
        let b = sampled_sphere(Vector3::new(3.0, 0.0, 0.0), 1.0);
        assert_eq!(op_of(&best_pairwise(&a, &b)), CsgOp::Union);
    }

    #[test]
    fn swallowed_pair_subtracts() {
        // B's samples sit on a cavity wall inside A: their normals point
        // toward B's centre, which only A \ B explains
        let a = sampled_sphere(Vector3::zeros(), 2.0);
        let b = sampled_sphere_inverted(Vector3::zeros(), 1.0);
        let best = best_pairwise(&a, &b);
        assert_eq!(op_of(&best), CsgOp::Difference);
        let CsgNode::Op { children, .. } = &best else {
            unreachable!()
        };
        let CsgNode::Leaf(first) = &children[0] else {
            panic!("expected leaf children");
        };
        assert_eq!(first.name, a.name);
    }

    fn sampled_sphere_inverted(
        center: Vector3<f64>,
        r: f64,
    ) -> crate::primitive::PrimitiveRef {
        use crate::geometry::{PointCloud, SurfacePoint};
        use crate::manifold::Manifold;
        use crate::primitive::create_sphere;
        use std::sync::Arc;
        let mut pc = PointCloud::default();
        let n = 20;
        for i in 1..n {
            let theta = std::f64::consts::PI * i as f64 / n as f64;
            for j in 0..n {
                let phi =
                    2.0 * std::f64::consts::PI * j as f64 / n as f64;
                let radial = Vector3::new(
                    theta.sin() * phi.cos(),
                    theta.cos(),
                    theta.sin() * phi.sin(),
                );
                pc.push(SurfacePoint {
                    pos: center + radial * r,
                    normal: -radial,
                });
            }
        }
        let m = Arc::new(Manifold::sphere(center, r, pc));
        Arc::new(create_sphere(&m).unwrap())
    }

    #[test]
    fn singleton_clique_is_a_leaf() {
        let a = sampled_sphere(Vector3::zeros(), 1.0);
        let out = nodes_for_cliques(
            &[vec![], vec![a.clone()]],
            &CnsParams::default(),
        );
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].1, CsgNode::Leaf(_)));
    }

    #[test]
    fn three_clique_runs_the_search() {
        // Three spheres in a row with touching bounds: one 3-clique
        let prims = vec![
            sampled_sphere(Vector3::zeros(), 1.0),
            sampled_sphere(Vector3::new(1.0, 0.0, 0.0), 1.0),
            sampled_sphere(Vector3::new(2.0, 0.0, 0.0), 1.0),
        ];
        let params = CnsParams {
            engine: crate::evo::Params {
                population_size: 20,
                max_iterations: 6,
                in_parallel: false,
                seed: Some(3),
                ..crate::evo::Params::default()
            },
            creator: crate::cns::CnsCreatorParams {
                max_depth: 4,
                ..Default::default()
            },
        };
        let node = create_csg_with_ga(&prims, &params);
        assert!(!node.is_noop());
        assert!(node.arity_valid());
        assert!(node.depth() <= 4);
    }

    #[test]
    fn merge_drops_contained_trees() {
        let a = sampled_sphere(Vector3::zeros(), 1.0);
        let b = sampled_sphere(Vector3::new(3.0, 0.0, 0.0), 1.0);
        let pair = CsgNode::union(
            CsgNode::leaf(a.clone()),
            CsgNode::leaf(b.clone()),
        );
        let lone = CsgNode::leaf(a.clone());
        let merged = merge_clique_nodes(
            vec![pair.clone(), lone],
            &[a.clone(), b.clone()],
        );
        // The leaf is contained in the union, so the union survives
        assert_eq!(merged.num_nodes(), 3);
        assert_eq!(op_of(&merged), CsgOp::Union);
    }

    #[test]
    fn merge_unions_disjoint_trees() {
        let a = sampled_sphere(Vector3::zeros(), 1.0);
        let b = sampled_sphere(Vector3::new(3.0, 0.0, 0.0), 1.0);
        let merged = merge_clique_nodes(
            vec![CsgNode::leaf(a.clone()), CsgNode::leaf(b.clone())],
            &[a, b],
        );
        assert_eq!(op_of(&merged), CsgOp::Union);
        assert_eq!(merged.num_nodes(), 3);
    }
}
