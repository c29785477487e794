//! CSG-node search
//!
//! Genetic programming over CSG expression trees whose leaves are
//! primitives.  [`cliques`] drives the search per connection-graph clique
//! and merges the per-clique winners.
mod cliques;
mod creator;
mod ranker;

pub use cliques::{
    best_pairwise, create_csg_with_ga, merge_clique_nodes,
    nodes_for_cliques, solve_cliques, CnsParams,
};
pub use creator::{CnsCreatorParams, CsgNodeCreator};
pub use ranker::{
    geometry_score, lambda_from_points, CsgNodeRanker, ALPHA, EPSILON,
};
