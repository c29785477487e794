use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};

use chisel::cns::CnsParams;
use chisel::pipeline::{
    read_engine_params, run_extraction, ParameterSet, PipelineRunner,
};
use chisel::pss::PssParams;

/// CSG reconstruction pipeline
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    cmd: Command,

    /// Output folder
    #[clap(short, long, default_value = ".")]
    output: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Optimise an existing CSG tree (the config names the tree file)
    Pipeline {
        /// Pipeline configuration file
        #[clap(short, long)]
        config: PathBuf,
    },

    /// Reconstruct a CSG tree from a fitted manifold set
    Extract {
        /// Manifold set (JSON, from the fitter)
        #[clap(short, long)]
        manifolds: PathBuf,

        /// Optional configuration file (the `[GA]` section applies)
        #[clap(short, long)]
        config: Option<PathBuf>,

        /// RNG seed for a reproducible run
        #[clap(long)]
        seed: Option<u64>,
    },
}

fn run(args: &Args) -> Result<()> {
    match &args.cmd {
        Command::Pipeline { config } => {
            let runner = PipelineRunner::new(config, &args.output)?;
            runner.run()?;
        }
        Command::Extract {
            manifolds,
            config,
            seed,
        } => {
            let params = match config {
                Some(path) => ParameterSet::from_file(path)?,
                None => ParameterSet::default(),
            };
            let mut engine = read_engine_params(&params)?;
            engine.seed = *seed;
            let pss = PssParams {
                engine,
                ..PssParams::default()
            };
            let cns = CnsParams {
                engine,
                ..CnsParams::default()
            };
            let node = run_extraction(manifolds, &args.output, &pss, &cns)?;
            info!("reconstructed tree with {} nodes", node.num_nodes());
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("{e}");
        std::process::exit(1);
    }
}
