//! Primitive-set search
//!
//! Turns a fitted manifold set into a set of volumetric primitives.  Sphere
//! and cylinder manifolds convert directly into *static* primitives; the
//! remaining planes feed an evolutionary search over box/cylinder/sphere
//! sets, scored by [`ranker::PrimitiveSetRanker`].  After the search, each
//! static primitive individually gets whichever cutout flag ranks better.
mod creator;
mod ghost;
mod ranker;

pub use creator::{PrimitiveSetCreator, PssCreatorParams};
pub use ghost::{
    convex_hull, filter_close_planes, generate_ghost_planes,
    min_area_rectangle,
};
pub use ranker::{
    PrimitiveSetRanker, ScoreWeights, DISTANCE_DELTA, NORMAL_AGREEMENT,
    RASTER_CELL_SIZE,
};

use crate::{
    evo::{self, NoFitnessIncreaseStop, TournamentSelector},
    geometry::PointCloud,
    manifold::{ManifoldKind, ManifoldSet},
    primitive::{create_cylinder, create_sphere, Primitive, PrimitiveSet},
};
use log::info;

/// Knobs for one primitive extraction run
#[derive(Clone, Debug)]
pub struct PssParams {
    pub engine: evo::Params,
    pub creator: PssCreatorParams,
    pub weights: ScoreWeights,

    /// Augment the plane set with ghost planes before searching
    pub use_ghost_planes: bool,

    /// Ghost-plane duplicate filter: distance threshold, relative to the
    /// scan's bounding-box diagonal
    pub ghost_distance_threshold: f64,

    /// Ghost-plane duplicate filter: angular threshold in radians
    pub ghost_angle_threshold: f64,
}

impl Default for PssParams {
    fn default() -> Self {
        Self {
            engine: evo::Params::default(),
            creator: PssCreatorParams::default(),
            weights: ScoreWeights::default(),
            use_ghost_planes: false,
            ghost_distance_threshold: 0.02,
            ghost_angle_threshold: std::f64::consts::PI / 9.0,
        }
    }
}

/// Result of a primitive extraction run
pub struct ExtractionResult {
    /// The best set found, static primitives included
    pub primitives: PrimitiveSet,

    /// The manifolds the search ran over
    pub manifolds: ManifoldSet,

    pub statistics: evo::Statistics,
}

/// Splits the manifold set into ready-made static primitives (spheres and
/// cylinders, which need no assembly search) and the manifolds left for the
/// creator
pub fn extract_static_manifolds(
    manifolds: &ManifoldSet,
) -> (PrimitiveSet, ManifoldSet) {
    let mut statics = PrimitiveSet::new();
    let mut rest = ManifoldSet::new();
    for m in manifolds {
        match m.kind {
            ManifoldKind::Sphere => {
                statics.extend(create_sphere(m));
            }
            ManifoldKind::Cylinder => {
                statics.extend(create_cylinder(m, &[]));
            }
            ManifoldKind::Plane => rest.push(m.clone()),
        }
    }
    (statics, rest)
}

/// Runs the full primitive-set search over a fitted manifold set
pub fn extract_primitives_with_ga(
    manifolds: &ManifoldSet,
    params: &PssParams,
) -> ExtractionResult {
    let (mut statics, mut rest) = extract_static_manifolds(manifolds);

    // The creator only sees the non-static manifolds; the ranker scores
    // against their merged scan points
    let pc = PointCloud::merged(
        rest.iter().map(|m| &m.pc).collect::<Vec<_>>(),
    );
    if params.use_ghost_planes {
        rest = generate_ghost_planes(
            &pc,
            &rest,
            params.ghost_distance_threshold,
            params.ghost_angle_threshold,
        );
    }

    let creator =
        PrimitiveSetCreator::new(rest.clone(), params.creator.clone());
    let ranker = PrimitiveSetRanker::new(
        pc,
        statics.clone(),
        params.creator.max_set_size,
        params.weights,
        params.engine.use_caching,
    );
    let selector = TournamentSelector::new(params.engine.tournament_k);
    let mut stop = NoFitnessIncreaseStop::new(
        params.engine.max_count,
        params.engine.delta,
        params.engine.max_count,
    );

    let result =
        evo::run(&params.engine, &selector, &creator, &ranker, &mut stop);

    // Keep whichever cutout flag ranks better, per static primitive
    for p in &mut statics {
        let plain = ranker
            .rank_set(&vec![p.with_cutout(false)], true);
        let cut = ranker.rank_set(&vec![p.with_cutout(true)], true);
        *p = p.with_cutout(cut > plain);
    }

    let mut primitives = ranker
        .best_set()
        .or_else(|| result.best().map(|b| b.creature.clone()))
        .unwrap_or_default();
    primitives.extend(statics);

    info!(
        "extraction finished after {} generations with {} primitives",
        result.statistics.generations.len(),
        primitives.len()
    );
    ExtractionResult {
        primitives,
        manifolds: manifolds.clone(),
        statistics: result.statistics,
    }
}

/// Extracts every cylinder manifold as a primitive with estimated height,
/// dropping non-finite estimates
pub fn extract_cylinders(manifolds: &ManifoldSet) -> PrimitiveSet {
    manifolds
        .iter()
        .filter(|m| m.kind == ManifoldKind::Cylinder)
        .filter_map(|m| create_cylinder(m, &[]))
        .collect()
}
