//! Pipeline driver
//!
//! The end-to-end flow behind the CLI: load a CSG tree, dedupe its
//! primitives, binarise, optionally remove redundancies and decompose,
//! optimise, remove redundancies again, and emit the result alongside DOT /
//! statistics / timing files.
//!
//! The driver also hosts the other entry point, [`run_extraction`], which
//! starts from a fitted manifold set instead of a tree and runs the
//! primitive-set search followed by the per-clique tree search.
mod config;
mod optimizer;
mod redundancy;

pub use config::ParameterSet;
pub use optimizer::{
    optimize_with_ga, GeoScoreStrategy, OptGaParams, OptRankerParams,
    OptResult,
};
pub use redundancy::{grid_samples, remove_redundancies, sample_aabb};

use crate::{
    cns::{self, CnsCreatorParams, CnsParams},
    csg::{node_from_json_file, node_to_json, set_as_csg, write_dot, CsgNode},
    evo,
    geometry::{PointCloud, TriMesh},
    graph::{aabb_adjacency, ConnectionGraph},
    manifold::{Manifold, ManifoldSet},
    pss::{self, PssParams},
    Error,
};
use log::{info, warn};
use nalgebra::Vector3;
use serde::Deserialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Millisecond stopwatch for the timings file
struct Ticker(Instant);

impl Ticker {
    fn new() -> Self {
        Self(Instant::now())
    }

    /// Milliseconds since the last tick
    fn tick(&mut self) -> u128 {
        let out = self.0.elapsed().as_millis();
        self.0 = Instant::now();
        out
    }
}

/// Pipeline-level options (the `[Pipeline]` section)
#[derive(Clone, Debug)]
pub struct PipelineParams {
    pub optimizer: String,
    pub tree_file: PathBuf,
    pub sampling_grid_size: f64,
    pub save_meshes: bool,
    pub use_decomposition: bool,
    pub use_redundancy_removal: bool,
    pub use_cit_points_for_decomposition: bool,
    pub use_cit_points_for_redundancy_removal: bool,
}

pub fn read_pipeline_params(
    p: &ParameterSet,
) -> Result<PipelineParams, Error> {
    Ok(PipelineParams {
        optimizer: p.get_str("Pipeline", "Optimizer", "GA"),
        tree_file: p.get_str("Pipeline", "Tree", "tree.json").into(),
        sampling_grid_size: p
            .get_f64("Pipeline", "SamplingGridSize", 0.1)?,
        save_meshes: p.get_bool("Pipeline", "SaveMeshes", false)?,
        use_decomposition: p
            .get_bool("Pipeline", "UseDecomposition", true)?,
        use_redundancy_removal: p
            .get_bool("Pipeline", "UseRedundancyRemoval", true)?,
        use_cit_points_for_decomposition: p.get_bool(
            "Pipeline",
            "UseCITPointsForDecomposition",
            false,
        )?,
        use_cit_points_for_redundancy_removal: p.get_bool(
            "Pipeline",
            "UseCITPointsForRedundancyRemoval",
            false,
        )?,
    })
}

/// Engine options (the `[GA]` section)
pub fn read_engine_params(p: &ParameterSet) -> Result<evo::Params, Error> {
    let d = evo::Params::default();
    Ok(evo::Params {
        population_size: p
            .get_usize("GA", "PopulationSize", 100)?,
        num_best_parents: p
            .get_usize("GA", "NumBestParents", d.num_best_parents)?,
        mutation_rate: p.get_f64("GA", "MutationRate", d.mutation_rate)?,
        crossover_rate: p
            .get_f64("GA", "CrossoverRate", d.crossover_rate)?,
        tournament_k: p.get_usize("GA", "TournamentK", d.tournament_k)?,
        max_iterations: p
            .get_usize("GA", "MaxIterations", d.max_iterations)?,
        max_count: p.get_usize("GA", "MaxCount", d.max_count)?,
        delta: p.get_f64("GA", "Delta", d.delta)?,
        in_parallel: p.get_bool("GA", "InParallel", true)?,
        use_caching: p.get_bool("GA", "UseCaching", true)?,
        seed: None,
    })
}

/// Tree-optimiser options (the `[GA]` section's `Ranker.*` / `Creator.*`
/// keys)
pub fn read_opt_ga_params(p: &ParameterSet) -> Result<OptGaParams, Error> {
    let dr = OptRankerParams::default();
    let dc = CnsCreatorParams::default();
    Ok(OptGaParams {
        engine: read_engine_params(p)?,
        ranker: OptRankerParams {
            geo_score_strategy: match p
                .get_str("GA", "Ranker.GeoScoreStrategy", "Surface")
                .as_str()
            {
                "InOutSamples" => GeoScoreStrategy::InOutSamples,
                _ => GeoScoreStrategy::Surface,
            },
            geo_score_weight: p.get_f64(
                "GA",
                "Ranker.GeoScoreWeight",
                dr.geo_score_weight,
            )?,
            size_score_weight: p.get_f64(
                "GA",
                "Ranker.SizeScoreWeight",
                dr.size_score_weight,
            )?,
            prox_score_weight: p.get_f64(
                "GA",
                "Ranker.ProxScoreWeight",
                dr.prox_score_weight,
            )?,
            gradient_step_size: p.get_f64(
                "GA",
                "Ranker.GradientStepSize",
                dr.gradient_step_size,
            )?,
            position_tolerance: p.get_f64(
                "GA",
                "Ranker.PositionTolerance",
                dr.position_tolerance,
            )?,
            error_sigma: p.get_f64(
                "GA",
                "Ranker.ErrorSigma",
                dr.error_sigma,
            )?,
            sampling_step_size: p.get_f64(
                "GA",
                "Ranker.SamplingStepSize",
                dr.sampling_step_size,
            )?,
            max_distance: p.get_f64(
                "GA",
                "Ranker.MaxDistance",
                dr.max_distance,
            )?,
            max_sampling_points: p.get_usize(
                "GA",
                "Ranker.MaxSamplingPoints",
                dr.max_sampling_points,
            )?,
        },
        creator: CnsCreatorParams {
            create_new_prob: p.get_f64(
                "GA",
                "Creator.CreateNewRandomProb",
                dc.create_new_prob,
            )?,
            subtree_prob: p.get_f64(
                "GA",
                "Creator.SubtreeProb",
                dc.subtree_prob,
            )?,
            max_depth: dc.max_depth,
        },
    })
}

////////////////////////////////////////////////////////////////////////////////

/// Fitted-manifold input, one entry per surface
#[derive(Deserialize)]
struct JsonManifold {
    kind: String,
    p: [f64; 3],
    #[serde(default)]
    n: [f64; 3],
    #[serde(default)]
    r: f64,
    #[serde(default)]
    points: Vec<[f64; 6]>,
}

/// Loads a fitted manifold set from JSON
pub fn load_manifold_set<P: AsRef<Path>>(
    path: P,
) -> Result<ManifoldSet, Error> {
    let raw: Vec<JsonManifold> =
        serde_json::from_str(&std::fs::read_to_string(path)?)?;
    raw.into_iter()
        .map(|m| {
            let pc = PointCloud::from_rows(&m.points);
            let p = Vector3::from(m.p);
            let n = Vector3::from(m.n);
            if matches!(m.kind.as_str(), "Plane" | "Cylinder")
                && n.norm() < f64::EPSILON
            {
                return Err(Error::InputInvalid(format!(
                    "{} manifold without an orientation",
                    m.kind
                )));
            }
            Ok(Arc::new(match m.kind.as_str() {
                "Plane" => Manifold::plane(p, n, pc),
                "Cylinder" => Manifold::cylinder(p, n, m.r, pc),
                "Sphere" => Manifold::sphere(p, m.r, pc),
                other => {
                    return Err(Error::UnknownPrimitiveKind(
                        other.to_owned(),
                    ))
                }
            }))
        })
        .collect()
}

////////////////////////////////////////////////////////////////////////////////

/// The tree-optimisation pipeline
pub struct PipelineRunner {
    params: ParameterSet,
    output_folder: PathBuf,
}

impl PipelineRunner {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        config: P,
        output_folder: Q,
    ) -> Result<Self, Error> {
        Ok(Self {
            params: ParameterSet::from_file(config)?,
            output_folder: output_folder.as_ref().to_owned(),
        })
    }

    pub fn from_params<P: AsRef<Path>>(
        params: ParameterSet,
        output_folder: P,
    ) -> Self {
        Self {
            params,
            output_folder: output_folder.as_ref().to_owned(),
        }
    }

    fn out(&self, name: &str) -> PathBuf {
        self.output_folder.join(name)
    }

    /// Runs the whole pipeline; any error maps to a non-zero process exit
    pub fn run(&self) -> Result<(), Error> {
        let pp = read_pipeline_params(&self.params)?;
        std::fs::create_dir_all(&self.output_folder)?;

        let node = self.load(&pp)?;
        if node.is_noop() {
            return Err(Error::NoopResult);
        }
        let mut node = node.dedup_primitives_by_name().to_binary();

        let mut opt_out = std::fs::File::create(self.out("opt_output.txt"))?;
        writeln!(opt_out, "# Input size: {}", node.num_nodes())?;
        let mut timings = std::fs::File::create(self.out("timings.ini"))?;
        writeln!(timings, "[Timings]")?;
        let mut ticker = Ticker::new();

        // Shared probe points when the CIT flags ask for them
        let mut cit_points: Option<Vec<Vector3<f64>>> = None;
        let mut cit = |node: &CsgNode, want: bool| -> Vec<Vector3<f64>> {
            if !want {
                return vec![];
            }
            cit_points
                .get_or_insert_with(|| {
                    info!("sampling probe points");
                    grid_samples(node, pp.sampling_grid_size)
                })
                .clone()
        };

        if pp.use_redundancy_removal {
            let samples =
                cit(&node, pp.use_cit_points_for_redundancy_removal);
            node = remove_redundancies(
                node,
                pp.sampling_grid_size,
                &samples,
            );
            writeln!(timings, "RemoveRedundancies={}", ticker.tick())?;
            write_dot(
                &node,
                &mut std::fs::File::create(self.out("after_red.gv"))?,
            )?;
        }
        writeln!(opt_out, "# Before decompose size: {}", node.num_nodes())?;

        let ga = read_opt_ga_params(&self.params)?;
        let mut statistics = evo::Statistics::default();
        node = if pp.use_decomposition {
            let out = self.optimize_decomposed(
                &node,
                &pp,
                &ga,
                &mut statistics,
            )?;
            writeln!(timings, "DecompositionAndOpt={}", ticker.tick())?;
            out
        } else {
            let out = self.optimize(&node, &[], &pp, &ga)?;
            statistics
                .generations
                .extend(out.statistics.generations.iter().copied());
            writeln!(timings, "Optimization={}", ticker.tick())?;
            out.node
        };
        writeln!(opt_out, "# Output size: {}", node.num_nodes())?;

        if node.is_noop() {
            return Err(Error::NoopResult);
        }

        if pp.use_redundancy_removal {
            let samples =
                cit(&node, pp.use_cit_points_for_redundancy_removal);
            node = remove_redundancies(
                node,
                pp.sampling_grid_size,
                &samples,
            );
            writeln!(
                timings,
                "RemoveRedundanciesAfterwards={}",
                ticker.tick()
            )?;
        }

        self.emit(&node, &statistics, pp.save_meshes)
    }

    fn load(&self, pp: &PipelineParams) -> Result<CsgNode, Error> {
        info!("loading CSG tree from {:?}", pp.tree_file);
        let node = node_from_json_file(&pp.tree_file)?;
        write_dot(
            &node,
            &mut std::fs::File::create(self.out("input.gv"))?,
        )?;
        Ok(node)
    }

    /// Optimises each connected component of the primitive set separately,
    /// then unions the results
    fn optimize_decomposed(
        &self,
        node: &CsgNode,
        pp: &PipelineParams,
        ga: &OptGaParams,
        statistics: &mut evo::Statistics,
    ) -> Result<CsgNode, Error> {
        let graph = ConnectionGraph::build(
            node.distinct_primitives(),
            aabb_adjacency(pp.sampling_grid_size),
        );
        let components = graph.connected_components();
        info!("decomposition found {} components", components.len());

        let mut parts = vec![];
        for cluster in &components {
            let out = self.optimize(node, cluster, pp, ga)?;
            statistics
                .generations
                .extend(out.statistics.generations.iter().copied());
            if !out.node.is_noop() {
                parts.push(out.node);
            }
        }
        Ok(match parts.len() {
            0 => CsgNode::noop(),
            1 => parts.pop().unwrap(),
            _ => {
                let mut acc = parts.remove(0);
                for p in parts {
                    acc = CsgNode::union(acc, p);
                }
                acc
            }
        })
    }

    fn optimize(
        &self,
        node: &CsgNode,
        cluster: &[crate::primitive::PrimitiveRef],
        pp: &PipelineParams,
        ga: &OptGaParams,
    ) -> Result<OptResult, Error> {
        match pp.optimizer.as_str() {
            "GA" => optimize_with_ga(node, cluster, ga),
            // The sampling simplifiers are external collaborators; naming
            // one without them wired in is a configuration error
            other => Err(Error::OptimizerUnknown(other.to_owned())),
        }
    }

    fn emit(
        &self,
        node: &CsgNode,
        statistics: &evo::Statistics,
        save_meshes: bool,
    ) -> Result<(), Error> {
        std::fs::write(self.out("output.json"), node_to_json(node)?)?;
        write_dot(
            node,
            &mut std::fs::File::create(self.out("output.gv"))?,
        )?;
        statistics
            .save(&mut std::fs::File::create(self.out("stats.dat"))?)?;

        if save_meshes {
            // Tessellating the combined field is the external mesher's
            // job; dump the leaf solids so the folder stays inspectable
            let mut mesh = TriMesh::default();
            for p in node.distinct_primitives() {
                match p.implicit.surface_mesh() {
                    Some(m) => mesh.append(&m),
                    None => warn!("no debug mesh for {}", p.name),
                }
            }
            mesh.write_obj(
                &mut std::fs::File::create(self.out("output.obj"))?,
            )?;
        }
        info!("pipeline finished, results in {:?}", self.output_folder);
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////

/// The extraction pipeline: fitted manifolds in, CSG tree out
///
/// Runs the primitive-set search, builds the connection graph over the
/// found primitives, solves each clique with the tree search, merges, and
/// emits the same artefact set as the tree pipeline.
pub fn run_extraction<P: AsRef<Path>, Q: AsRef<Path>>(
    manifold_file: P,
    output_folder: Q,
    pss_params: &PssParams,
    cns_params: &CnsParams,
) -> Result<CsgNode, Error> {
    let output_folder = output_folder.as_ref();
    std::fs::create_dir_all(output_folder)?;
    let manifolds = load_manifold_set(manifold_file)?;
    info!("extraction over {} manifolds", manifolds.len());

    let extraction = pss::extract_primitives_with_ga(&manifolds, pss_params);
    extraction.statistics.save(
        &mut std::fs::File::create(output_folder.join("stats.dat"))?,
    )?;
    if extraction.primitives.is_empty() {
        return Err(Error::NoopResult);
    }

    // The set's own reading (non-cutouts minus cutouts) is a useful
    // baseline next to the searched tree
    std::fs::write(
        output_folder.join("extracted.json"),
        node_to_json(&set_as_csg(&extraction.primitives))?,
    )?;

    let graph = ConnectionGraph::build(
        extraction
            .primitives
            .iter()
            .map(|p| Arc::new(p.clone()))
            .collect(),
        aabb_adjacency(0.0),
    );
    let node = cns::solve_cliques(&graph.maximal_cliques(), cns_params);
    if node.is_noop() {
        return Err(Error::NoopResult);
    }

    std::fs::write(
        output_folder.join("output.json"),
        node_to_json(&node)?,
    )?;
    write_dot(
        &node,
        &mut std::fs::File::create(output_folder.join("output.gv"))?,
    )?;
    Ok(node)
}
