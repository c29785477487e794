//! Generic evolutionary engine
//!
//! A population-based search parameterised by four collaborator traits:
//! [`Creator`] (sampling, mutation, crossover), [`Ranker`] (fitness),
//! [`Selector`] (parent choice) and [`StopCriterion`].  The engine itself
//! knows nothing about primitives or CSG trees.
//!
//! Ranking is the only part that fans out: with
//! [`Params::in_parallel`] set, each creature of a generation is scored on
//! the rayon pool, one creature per work item.  The creator, the selector
//! and their RNG stay on the driving thread, so a fixed
//! [`Params::seed`] reproduces populations exactly; ranking consumes no
//! randomness and ties are broken by creature hash.
//!
//! [`run_async`] runs the whole search on a background thread and hands
//! back a join handle with a cooperative stop flag, checked between
//! generations.
use log::debug;
use ordered_float::OrderedFloat;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Anything that can live in a population
pub trait Creature: Clone + Hash + Send + Sync {}
impl<T: Clone + Hash + Send + Sync> Creature for T {}

/// Builds, mutates, and recombines creatures
pub trait Creator: Sync {
    type Creature: Creature;

    fn create(&self, rng: &mut StdRng) -> Self::Creature;

    fn mutate(
        &self,
        creature: &Self::Creature,
        rng: &mut StdRng,
    ) -> Self::Creature;

    fn crossover(
        &self,
        a: &Self::Creature,
        b: &Self::Creature,
        rng: &mut StdRng,
    ) -> (Self::Creature, Self::Creature);
}

/// Scores creatures; must be callable from worker threads
pub trait Ranker: Sync {
    type Creature: Creature;

    /// Larger is better; unscoreable creatures return `f64::NEG_INFINITY`
    fn rank(&self, creature: &Self::Creature) -> f64;
}

/// Picks parents out of a ranked population
pub trait Selector<C>: Sync {
    fn select<'a>(
        &self,
        ranked: &'a [RankedCreature<C>],
        rng: &mut StdRng,
    ) -> &'a RankedCreature<C>;
}

/// Decides when the search is done, given the history so far
pub trait StopCriterion: Send {
    fn should_stop(&mut self, history: &[GenerationStats]) -> bool;
}

////////////////////////////////////////////////////////////////////////////////

/// Engine tuning knobs
#[derive(Copy, Clone, Debug)]
pub struct Params {
    pub population_size: usize,

    /// Elitism: this many of the best creatures survive unchanged
    pub num_best_parents: usize,

    pub mutation_rate: f64,
    pub crossover_rate: f64,

    /// Fan ranking out across the rayon pool
    pub in_parallel: bool,

    /// Memoise fitness by creature hash
    pub use_caching: bool,

    /// Hard generation limit, applied on top of the stop criterion
    pub max_iterations: usize,

    /// Window length for the default plateau criterion
    pub max_count: usize,

    /// Slope threshold for the default plateau criterion
    pub delta: f64,

    pub tournament_k: usize,

    /// Fixed RNG seed for reproducible runs; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            population_size: 50,
            num_best_parents: 2,
            mutation_rate: 0.3,
            crossover_rate: 0.4,
            in_parallel: true,
            use_caching: true,
            max_iterations: 100,
            max_count: 10,
            delta: 1e-4,
            tournament_k: 2,
            seed: None,
        }
    }
}

/// A creature with its fitness and identity hash
#[derive(Clone, Debug)]
pub struct RankedCreature<C> {
    pub creature: C,
    pub rank: f64,
    pub hash: u64,
}

/// One row of the per-generation statistics
#[derive(Copy, Clone, Debug)]
pub struct GenerationStats {
    pub generation: usize,
    pub best: f64,
    pub mean: f64,
    pub best_hash: u64,
}

/// Per-run statistics, one row per generation
#[derive(Clone, Debug, Default)]
pub struct Statistics {
    pub generations: Vec<GenerationStats>,
}

impl Statistics {
    /// Writes `generation best mean best_hash` rows
    pub fn save<F: Write>(&self, out: &mut F) -> Result<(), crate::Error> {
        let mut out = BufWriter::new(out);
        for g in &self.generations {
            writeln!(
                out,
                "{} {} {} {:016x}",
                g.generation, g.best, g.mean, g.best_hash
            )?;
        }
        Ok(())
    }
}

/// Result of a finished run: the final ranked population (best first) and
/// the per-generation statistics
pub struct EvolutionResult<C> {
    pub population: Vec<RankedCreature<C>>,
    pub statistics: Statistics,
}

impl<C> EvolutionResult<C> {
    pub fn best(&self) -> Option<&RankedCreature<C>> {
        self.population.first()
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Standard k-tournament selection, with replacement
pub struct TournamentSelector {
    k: usize,
}

impl TournamentSelector {
    pub fn new(k: usize) -> Self {
        Self { k: k.max(1) }
    }
}

impl<C: Creature> Selector<C> for TournamentSelector {
    fn select<'a>(
        &self,
        ranked: &'a [RankedCreature<C>],
        rng: &mut StdRng,
    ) -> &'a RankedCreature<C> {
        let mut best = &ranked[rng.gen_range(0..ranked.len())];
        for _ in 1..self.k {
            let other = &ranked[rng.gen_range(0..ranked.len())];
            if other.rank > best.rank {
                best = other;
            }
        }
        best
    }
}

/// Stops after a fixed number of generations
pub struct IterationStop {
    max_iterations: usize,
}

impl IterationStop {
    pub fn new(max_iterations: usize) -> Self {
        Self { max_iterations }
    }
}

impl StopCriterion for IterationStop {
    fn should_stop(&mut self, history: &[GenerationStats]) -> bool {
        history.len() >= self.max_iterations
    }
}

/// Stops once the best rank has stopped improving
///
/// Terminates when at least `min_iterations` generations have run and the
/// best rank's slope over the trailing `window` generations drops below
/// `delta`.
pub struct NoFitnessIncreaseStop {
    window: usize,
    delta: f64,
    min_iterations: usize,
}

impl NoFitnessIncreaseStop {
    pub fn new(window: usize, delta: f64, min_iterations: usize) -> Self {
        Self {
            window: window.max(1),
            delta,
            min_iterations,
        }
    }
}

impl StopCriterion for NoFitnessIncreaseStop {
    fn should_stop(&mut self, history: &[GenerationStats]) -> bool {
        if history.len() < self.min_iterations {
            return false;
        }
        let tail = &history[history.len().saturating_sub(self.window)..];
        let rise = tail.last().unwrap().best - tail[0].best;
        rise / (tail.len() as f64) < self.delta
    }
}

////////////////////////////////////////////////////////////////////////////////

fn creature_hash<C: Hash>(c: &C) -> u64 {
    let mut h = DefaultHasher::new();
    c.hash(&mut h);
    h.finish()
}

fn rank_population<R: Ranker>(
    population: Vec<R::Creature>,
    ranker: &R,
    params: &Params,
    cache: &Mutex<HashMap<u64, f64>>,
) -> Vec<RankedCreature<R::Creature>> {
    let rank_one = |creature: R::Creature| {
        let hash = creature_hash(&creature);
        if params.use_caching {
            if let Some(&rank) = cache.lock().unwrap().get(&hash) {
                return RankedCreature {
                    creature,
                    rank,
                    hash,
                };
            }
        }
        let mut rank = ranker.rank(&creature);
        if rank.is_nan() {
            rank = f64::NEG_INFINITY;
        }
        if params.use_caching {
            cache.lock().unwrap().insert(hash, rank);
        }
        RankedCreature {
            creature,
            rank,
            hash,
        }
    };

    let mut ranked: Vec<_> = if params.in_parallel {
        population.into_par_iter().map(rank_one).collect()
    } else {
        population.into_iter().map(rank_one).collect()
    };
    // Deterministic order regardless of evaluation schedule: by rank, ties
    // by hash
    ranked.sort_by_key(|r| {
        (std::cmp::Reverse(OrderedFloat(r.rank)), r.hash)
    });
    ranked
}

/// Runs the search to completion on the calling thread
pub fn run<Cr, R, S, St>(
    params: &Params,
    selector: &S,
    creator: &Cr,
    ranker: &R,
    stop: &mut St,
) -> EvolutionResult<Cr::Creature>
where
    Cr: Creator,
    R: Ranker<Creature = Cr::Creature>,
    S: Selector<Cr::Creature>,
    St: StopCriterion,
{
    run_cancellable(params, selector, creator, ranker, stop, &AtomicBool::new(false))
}

/// Like [`run`], but checks `cancel` between generations
pub fn run_cancellable<Cr, R, S, St>(
    params: &Params,
    selector: &S,
    creator: &Cr,
    ranker: &R,
    stop: &mut St,
    cancel: &AtomicBool,
) -> EvolutionResult<Cr::Creature>
where
    Cr: Creator,
    R: Ranker<Creature = Cr::Creature>,
    S: Selector<Cr::Creature>,
    St: StopCriterion,
{
    let mut rng = match params.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let cache = Mutex::new(HashMap::new());
    let mut statistics = Statistics::default();

    let mut population: Vec<Cr::Creature> = (0..params.population_size)
        .map(|_| creator.create(&mut rng))
        .collect();

    loop {
        let generation = statistics.generations.len();
        let ranked = rank_population(population, ranker, params, &cache);

        let best = ranked.first().map(|r| r.rank).unwrap_or(f64::NEG_INFINITY);
        let mean = ranked.iter().map(|r| r.rank).sum::<f64>()
            / ranked.len().max(1) as f64;
        statistics.generations.push(GenerationStats {
            generation,
            best,
            mean,
            best_hash: ranked.first().map(|r| r.hash).unwrap_or(0),
        });
        debug!("generation {generation}: best {best}, mean {mean}");

        if cancel.load(Ordering::Relaxed)
            || statistics.generations.len() >= params.max_iterations
            || stop.should_stop(&statistics.generations)
        {
            return EvolutionResult {
                population: ranked,
                statistics,
            };
        }

        // Elitism, then selection / crossover / mutation until full
        let mut next: Vec<Cr::Creature> = ranked
            .iter()
            .take(params.num_best_parents.min(ranked.len()))
            .map(|r| r.creature.clone())
            .collect();
        while next.len() < params.population_size {
            let a = selector.select(&ranked, &mut rng);
            let b = selector.select(&ranked, &mut rng);
            let (mut c1, mut c2) = if rng.gen_bool(params.crossover_rate) {
                creator.crossover(&a.creature, &b.creature, &mut rng)
            } else {
                (a.creature.clone(), b.creature.clone())
            };
            if rng.gen_bool(params.mutation_rate) {
                c1 = creator.mutate(&c1, &mut rng);
            }
            if rng.gen_bool(params.mutation_rate) {
                c2 = creator.mutate(&c2, &mut rng);
            }
            next.push(c1);
            if next.len() < params.population_size {
                next.push(c2);
            }
        }
        population = next;
    }
}

/// Handle to a search running on a background thread
pub struct RunHandle<C> {
    cancel: Arc<AtomicBool>,
    handle: std::thread::JoinHandle<EvolutionResult<C>>,
}

impl<C> RunHandle<C> {
    /// Requests a cooperative stop; the run finishes its current generation
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Blocks until the run completes
    pub fn join(self) -> EvolutionResult<C> {
        self.handle.join().expect("evolution thread panicked")
    }
}

/// Spawns the search on a background thread
pub fn run_async<Cr, R, S, St>(
    params: Params,
    selector: S,
    creator: Cr,
    ranker: R,
    mut stop: St,
) -> RunHandle<Cr::Creature>
where
    Cr: Creator + Send + 'static,
    Cr::Creature: 'static,
    R: Ranker<Creature = Cr::Creature> + Send + 'static,
    S: Selector<Cr::Creature> + Send + 'static,
    St: StopCriterion + 'static,
{
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    let handle = std::thread::spawn(move || {
        run_cancellable(&params, &selector, &creator, &ranker, &mut stop, &flag)
    });
    RunHandle { cancel, handle }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Toy domain: a creature is a vector of bits, fitness is the number of
    /// set bits
    struct BitCreator {
        len: usize,
    }

    impl Creator for BitCreator {
        type Creature = Vec<bool>;

        fn create(&self, rng: &mut StdRng) -> Vec<bool> {
            (0..self.len).map(|_| rng.gen_bool(0.5)).collect()
        }

        fn mutate(&self, c: &Vec<bool>, rng: &mut StdRng) -> Vec<bool> {
            let mut out = c.clone();
            let i = rng.gen_range(0..out.len());
            out[i] = !out[i];
            out
        }

        fn crossover(
            &self,
            a: &Vec<bool>,
            b: &Vec<bool>,
            rng: &mut StdRng,
        ) -> (Vec<bool>, Vec<bool>) {
            let split = rng.gen_range(0..a.len());
            let mut c1 = a.clone();
            let mut c2 = b.clone();
            for i in split..a.len() {
                c1[i] = b[i];
                c2[i] = a[i];
            }
            (c1, c2)
        }
    }

    struct BitRanker;

    impl Ranker for BitRanker {
        type Creature = Vec<bool>;

        fn rank(&self, c: &Vec<bool>) -> f64 {
            c.iter().filter(|&&b| b).count() as f64
        }
    }

    struct ConstantRanker;

    impl Ranker for ConstantRanker {
        type Creature = Vec<bool>;

        fn rank(&self, _: &Vec<bool>) -> f64 {
            1.0
        }
    }

    fn params(seed: u64) -> Params {
        Params {
            population_size: 30,
            max_iterations: 60,
            in_parallel: false,
            seed: Some(seed),
            ..Params::default()
        }
    }

    #[test]
    fn converges_on_toy_problem() {
        let res = run(
            &Params {
                mutation_rate: 0.8,
                max_iterations: 200,
                ..params(1)
            },
            &TournamentSelector::new(2),
            &BitCreator { len: 8 },
            &BitRanker,
            &mut IterationStop::new(200),
        );
        assert_eq!(res.best().unwrap().rank, 8.0);
    }

    #[test]
    fn elitism_is_monotonic() {
        let res = run(
            &params(2),
            &TournamentSelector::new(2),
            &BitCreator { len: 16 },
            &BitRanker,
            &mut IterationStop::new(40),
        );
        for w in res.statistics.generations.windows(2) {
            assert!(w[1].best >= w[0].best);
        }
    }

    #[test]
    fn fixed_seed_is_deterministic() {
        let go = |in_parallel: bool| {
            let mut p = params(42);
            p.in_parallel = in_parallel;
            run(
                &p,
                &TournamentSelector::new(2),
                &BitCreator { len: 12 },
                &BitRanker,
                &mut IterationStop::new(25),
            )
        };
        let a = go(false);
        let b = go(false);
        let hashes =
            |r: &EvolutionResult<Vec<bool>>| -> Vec<u64> {
                r.population.iter().map(|c| c.hash).collect()
            };
        assert_eq!(hashes(&a), hashes(&b));
        // Parallel ranking doesn't consume randomness, so the populations
        // still match
        let c = go(true);
        assert_eq!(hashes(&a), hashes(&c));
    }

    #[test]
    fn plateau_stop_halts_on_constant_fitness() {
        let mut p = params(3);
        p.max_iterations = 1000;
        let res = run(
            &p,
            &TournamentSelector::new(2),
            &BitCreator { len: 8 },
            &ConstantRanker,
            &mut NoFitnessIncreaseStop::new(500, 0.01, 500),
        );
        assert_eq!(res.statistics.generations.len(), 500);
    }

    #[test]
    fn async_run_joins() {
        let handle = run_async(
            params(4),
            TournamentSelector::new(2),
            BitCreator { len: 8 },
            BitRanker,
            IterationStop::new(10),
        );
        let res = handle.join();
        assert_eq!(res.statistics.generations.len(), 10);
    }

    #[test]
    fn async_run_stops_cooperatively() {
        let handle = run_async(
            Params {
                max_iterations: 1_000_000,
                ..params(5)
            },
            TournamentSelector::new(2),
            BitCreator { len: 8 },
            ConstantRanker,
            IterationStop::new(1_000_000),
        );
        handle.stop();
        let res = handle.join();
        assert!(res.statistics.generations.len() < 1_000_000);
    }

    #[test]
    fn statistics_rows() {
        let res = run(
            &params(6),
            &TournamentSelector::new(2),
            &BitCreator { len: 8 },
            &BitRanker,
            &mut IterationStop::new(3),
        );
        let mut buf = vec![];
        res.statistics.save(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.lines().next().unwrap().starts_with("0 "));
    }
}
