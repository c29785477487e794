//! GA optimisation of an existing CSG tree
//!
//! The pipeline's input is a tree, not a scan, so the evidence has to be
//! manufactured: sample points are drawn from the input tree's own field
//! and candidate trees are scored by how well they reproduce it, minus a
//! size penalty.  Two sampling strategies exist:
//!
//! - `Surface`: grid points near the zero level set, projected onto the
//!   surface along the gradient; candidates must match position and normal.
//! - `InOutSamples`: grid points classified inside/outside; candidates must
//!   match the classification.
use super::redundancy::sample_aabb;
use crate::{
    cns::{CnsCreatorParams, CsgNodeCreator},
    csg::CsgNode,
    evo::{self, NoFitnessIncreaseStop, Ranker, TournamentSelector},
    geometry::SurfacePoint,
    primitive::PrimitiveRef,
    Error,
};
use log::{debug, info};
use nalgebra::Vector3;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GeoScoreStrategy {
    Surface,
    InOutSamples,
}

/// Ranker knobs for the tree optimiser
#[derive(Copy, Clone, Debug)]
pub struct OptRankerParams {
    pub geo_score_strategy: GeoScoreStrategy,
    pub geo_score_weight: f64,
    pub size_score_weight: f64,

    /// Parsed and stored, not consumed by the score formula (reserved)
    pub prox_score_weight: f64,

    /// Step for the finite-difference normal used when projecting surface
    /// samples
    pub gradient_step_size: f64,

    /// Surface strategy: how far a candidate's field may deviate at a
    /// sample
    pub position_tolerance: f64,

    /// In/out strategy: half-width of the band treated as "on the surface"
    /// and excluded from classification
    pub error_sigma: f64,

    pub sampling_step_size: f64,

    /// Surface strategy: grid points farther than this from the surface are
    /// not candidates for projection
    pub max_distance: f64,

    pub max_sampling_points: usize,
}

impl Default for OptRankerParams {
    fn default() -> Self {
        Self {
            geo_score_strategy: GeoScoreStrategy::Surface,
            geo_score_weight: 20.0,
            size_score_weight: 2.0,
            prox_score_weight: 2.0,
            gradient_step_size: 1e-4,
            position_tolerance: 0.1,
            error_sigma: 1e-8,
            sampling_step_size: 0.1,
            max_distance: 0.1,
            max_sampling_points: 250,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct OptGaParams {
    pub engine: evo::Params,
    pub ranker: OptRankerParams,
    pub creator: CnsCreatorParams,
}

/// Evidence sampled from the input tree
enum Evidence {
    Surface(Vec<SurfacePoint>),
    InOut(Vec<(Vector3<f64>, bool)>),
}

/// Central finite-difference gradient of a field
fn fd_gradient(
    field: &crate::implicit::ImplicitFn,
    x: &Vector3<f64>,
    step: f64,
) -> Vector3<f64> {
    let mut g = Vector3::zeros();
    for i in 0..3 {
        let mut hi = *x;
        let mut lo = *x;
        hi[i] += step;
        lo[i] -= step;
        g[i] = (field.signed_distance(&hi) - field.signed_distance(&lo))
            / (2.0 * step);
    }
    g
}

/// Subsamples a list down to at most `limit` evenly-spaced entries
fn decimate<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    if items.len() <= limit || limit == 0 {
        return items;
    }
    let keep_every = items.len() as f64 / limit as f64;
    let mut out = vec![];
    let mut next = 0.0;
    for (i, item) in items.drain(..).enumerate() {
        if i as f64 >= next {
            out.push(item);
            next += keep_every;
        }
    }
    out
}

fn sample_evidence(
    node: &CsgNode,
    params: &OptRankerParams,
) -> Option<Evidence> {
    let field = node.to_implicit()?;
    let aabb = field.aabb()?.grown(params.sampling_step_size);
    let grid = sample_aabb(&aabb, params.sampling_step_size);
    match params.geo_score_strategy {
        GeoScoreStrategy::Surface => {
            let mut pts = vec![];
            for x in grid {
                let (d, g) = field.signed_distance_and_gradient(&x);
                if d.abs() > params.max_distance || g.norm() == 0.0 {
                    continue;
                }
                // One projection step along the gradient, then a numeric
                // normal at the projected point (branch gradients are
                // unreliable right on boolean seams)
                let pos = x - g.normalize() * d;
                let n = fd_gradient(&field, &pos, params.gradient_step_size);
                if n.norm() == 0.0 {
                    continue;
                }
                pts.push(SurfacePoint {
                    pos,
                    normal: n.normalize(),
                });
            }
            Some(Evidence::Surface(decimate(
                pts,
                params.max_sampling_points,
            )))
        }
        GeoScoreStrategy::InOutSamples => {
            let pts = grid
                .into_iter()
                .filter_map(|x| {
                    let d = field.signed_distance(&x);
                    // The surface band is ambiguous under refitting noise
                    (d.abs() > params.error_sigma)
                        .then_some((x, d < 0.0))
                })
                .collect();
            Some(Evidence::InOut(decimate(
                pts,
                params.max_sampling_points,
            )))
        }
    }
}

/// Ranker scoring candidate trees against the sampled evidence
struct OptNodeRanker {
    evidence: Evidence,
    params: OptRankerParams,
    input_size: usize,
}

impl OptNodeRanker {
    fn geo_score(&self, node: &CsgNode) -> f64 {
        let Some(field) = node.to_implicit() else {
            return f64::NEG_INFINITY;
        };
        match &self.evidence {
            Evidence::Surface(pts) => {
                if pts.is_empty() {
                    return 0.0;
                }
                let valid = pts
                    .iter()
                    .filter(|pt| {
                        let (d, g) =
                            field.signed_distance_and_gradient(&pt.pos);
                        let norm = g.norm();
                        d.abs() < self.params.position_tolerance
                            && norm > 0.0
                            && pt.normal.dot(&g) / norm > 0.9
                    })
                    .count();
                valid as f64 / pts.len() as f64
            }
            Evidence::InOut(pts) => {
                if pts.is_empty() {
                    return 0.0;
                }
                let valid = pts
                    .iter()
                    .filter(|(x, inside)| {
                        (field.signed_distance(x) < 0.0) == *inside
                    })
                    .count();
                valid as f64 / pts.len() as f64
            }
        }
    }
}

impl Ranker for OptNodeRanker {
    type Creature = CsgNode;

    fn rank(&self, node: &CsgNode) -> f64 {
        if !node.arity_valid() {
            return f64::NEG_INFINITY;
        }
        let size_score =
            node.num_nodes() as f64 / self.input_size.max(1) as f64;
        self.params.geo_score_weight * self.geo_score(node)
            - self.params.size_score_weight * size_score
    }
}

/// Result of one optimiser invocation
#[derive(Debug)]
pub struct OptResult {
    pub node: CsgNode,
    pub statistics: evo::Statistics,
}

/// Optimises a tree with the genetic search
///
/// `cluster` restricts the leaf alphabet (used by decomposition); when
/// empty, the input tree's own distinct primitives are used.
pub fn optimize_with_ga(
    node: &CsgNode,
    cluster: &[PrimitiveRef],
    params: &OptGaParams,
) -> Result<OptResult, Error> {
    let primitives = if cluster.is_empty() {
        node.distinct_primitives()
    } else {
        cluster.to_vec()
    };
    if primitives.is_empty() {
        return Err(Error::NoopResult);
    }

    let Some(evidence) = sample_evidence(node, &params.ranker) else {
        return Err(Error::NoopResult);
    };
    if let Evidence::Surface(pts) = &evidence {
        debug!("sampled {} surface points", pts.len());
    }

    let ranker = OptNodeRanker {
        evidence,
        params: params.ranker,
        input_size: node.num_nodes(),
    };
    let creator = CsgNodeCreator::new(primitives, params.creator);
    let selector = TournamentSelector::new(params.engine.tournament_k);
    let mut stop = NoFitnessIncreaseStop::new(
        params.engine.max_count,
        params.engine.delta,
        params.engine.max_count,
    );
    let result =
        evo::run(&params.engine, &selector, &creator, &ranker, &mut stop);

    let best = result
        .best()
        .map(|b| b.creature.clone())
        .unwrap_or_else(CsgNode::noop);
    info!(
        "tree optimisation: {} nodes -> {} after {} generations",
        node.num_nodes(),
        best.num_nodes(),
        result.statistics.generations.len()
    );
    Ok(OptResult {
        node: best,
        statistics: result.statistics,
    })
}
