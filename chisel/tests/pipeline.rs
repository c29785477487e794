//! Pipeline driver scenarios
use chisel::pipeline::{ParameterSet, PipelineRunner};
use chisel::Error;
use std::path::PathBuf;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir()
        .join("chisel-pipeline-tests")
        .join(name);
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn config_for(tree: &PathBuf, extra: &str) -> ParameterSet {
    ParameterSet::from_str(&format!(
        "[Pipeline]\nTree={}\n{extra}",
        tree.display()
    ))
}

/// A no-op input tree fails fast, before any optimisation runs
#[test]
fn noop_tree_is_fatal() {
    let dir = scratch_dir("noop");
    let tree = dir.join("tree.json");
    std::fs::write(&tree, r#"{ "op": "Noop" }"#).unwrap();

    let runner = PipelineRunner::from_params(
        config_for(&tree, ""),
        dir.join("out"),
    );
    assert!(matches!(runner.run(), Err(Error::NoopResult)));
}

/// A missing tree file is a load failure
#[test]
fn missing_tree_is_fatal() {
    let dir = scratch_dir("missing");
    let runner = PipelineRunner::from_params(
        config_for(&dir.join("nonexistent.json"), ""),
        dir.join("out"),
    );
    assert!(matches!(runner.run(), Err(Error::IoError(_))));
}

/// Naming an optimiser that isn't wired in is fatal
#[test]
fn unknown_optimizer_is_fatal() {
    let dir = scratch_dir("unknown-optimizer");
    let tree = dir.join("tree.json");
    std::fs::write(&tree, two_sphere_tree()).unwrap();

    let runner = PipelineRunner::from_params(
        config_for(&tree, "Optimizer=Sampling.SetCover\n"),
        dir.join("out"),
    );
    assert!(matches!(runner.run(), Err(Error::OptimizerUnknown(_))));
}

fn two_sphere_tree() -> &'static str {
    r#"{
        "op": "Union",
        "childs": [
            { "op": "Geometry", "name": "s0",
              "params": { "kind": "Sphere",
                "transform": [[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]],
                "r": 1.0 } },
            { "op": "Geometry", "name": "s1",
              "params": { "kind": "Sphere",
                "transform": [[1,0,0,3],[0,1,0,0],[0,0,1,0],[0,0,0,1]],
                "r": 1.0 } },
            { "op": "Geometry", "name": "s0",
              "params": { "kind": "Sphere",
                "transform": [[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]],
                "r": 1.0 } }
        ]
    }"#
}

/// Full happy path: load, dedupe, binarise, optimise, emit
#[test]
fn end_to_end_ga_run() {
    let dir = scratch_dir("happy");
    let tree = dir.join("tree.json");
    std::fs::write(&tree, two_sphere_tree()).unwrap();
    let out = dir.join("out");

    let runner = PipelineRunner::from_params(
        config_for(
            &tree,
            "SamplingGridSize=0.25\nSaveMeshes=true\n\
             [GA]\nPopulationSize=16\nMaxIterations=4\nInParallel=false\n\
             Ranker.GeoScoreStrategy=InOutSamples\n\
             Ranker.SamplingStepSize=0.25\n\
             Ranker.MaxSamplingPoints=500\n",
        ),
        &out,
    );
    runner.run().unwrap();

    for artefact in [
        "input.gv",
        "after_red.gv",
        "output.gv",
        "output.json",
        "stats.dat",
        "timings.ini",
        "opt_output.txt",
        "output.obj",
    ] {
        assert!(out.join(artefact).exists(), "missing {artefact}");
    }

    // The emitted tree parses back and isn't a no-op
    let node =
        chisel::csg::node_from_json_file(out.join("output.json")).unwrap();
    assert!(!node.is_noop());

    let timings = std::fs::read_to_string(out.join("timings.ini")).unwrap();
    assert!(timings.starts_with("[Timings]"));
}
