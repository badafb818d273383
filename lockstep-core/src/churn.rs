//! Relabelling churn driver.
//!
//! Populates a set with the keys `0..N`, then runs `2N` workers against it:
//!
//! ```text
//! positive worker i:  remove(-i)  ──ok──►  add(+i)
//! negative worker i:  remove(+i)  ──ok──►  add(-i)
//! ```
//!
//! A worker only adds after its own removal succeeded, and for every `i`
//! exactly one of `+i` and `-i` is present or in flight, so the population
//! is unchanged once all workers have finished. The driver only uses the
//! `ConcurrentSet` surface and runs identically against either engine.

use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::data_structures::{ConcurrentSet, FineGrainedSet, OptimisticSet};
use crate::error::SetError;

pub const ENV_ENGINE: &str = "LOCKSTEP_ENGINE";
pub const ENV_POPULATION: &str = "LOCKSTEP_POPULATION";
pub const ENV_ITERATIONS: &str = "LOCKSTEP_ITERATIONS";
pub const ENV_PAUSE_MS: &str = "LOCKSTEP_PAUSE_MS";

#[derive(Debug, Error)]
pub enum ChurnError {
    #[error("invalid value for {name}: {value:?}")]
    Config { name: &'static str, value: String },

    #[error(transparent)]
    Set(#[from] SetError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),

    #[error("worker {0} panicked")]
    WorkerPanicked(String),
}

/// Which concurrency discipline backs the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Engine {
    FineGrained,
    #[default]
    Optimistic,
}

impl FromStr for Engine {
    type Err = ChurnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fine" | "fine-grained" | "fine_grained" | "hand-over-hand" => Ok(Engine::FineGrained),
            "optimistic" => Ok(Engine::Optimistic),
            _ => Err(ChurnError::Config {
                name: ENV_ENGINE,
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::FineGrained => write!(f, "fine-grained"),
            Engine::Optimistic => write!(f, "optimistic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChurnConfig {
    pub engine: Engine,
    /// Initial members `0..population`; also the number of worker pairs.
    pub population: usize,
    /// Remove/add attempts per worker.
    pub iterations: usize,
    /// Sleep between two attempts of one worker.
    pub pause: Duration,
}

impl Default for ChurnConfig {
    fn default() -> Self {
        ChurnConfig {
            engine: Engine::default(),
            population: 10,
            iterations: 100,
            pause: Duration::from_millis(10),
        }
    }
}

impl ChurnConfig {
    /// Defaults overridden by `LOCKSTEP_*` environment variables.
    pub fn from_env() -> Result<Self, ChurnError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ChurnError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ChurnConfig::default();
        if let Some(value) = lookup(ENV_ENGINE) {
            config.engine = value.parse()?;
        }
        if let Some(value) = lookup(ENV_POPULATION) {
            config.population = parse_var(ENV_POPULATION, &value)?;
        }
        if let Some(value) = lookup(ENV_ITERATIONS) {
            config.iterations = parse_var(ENV_ITERATIONS, &value)?;
        }
        if let Some(value) = lookup(ENV_PAUSE_MS) {
            config.pause = Duration::from_millis(parse_var(ENV_PAUSE_MS, &value)?);
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ChurnError> {
        if self.population == 0 || i64::try_from(self.population).is_err() {
            return Err(ChurnError::Config {
                name: ENV_POPULATION,
                value: self.population.to_string(),
            });
        }
        Ok(())
    }
}

fn parse_var<V: FromStr>(name: &'static str, value: &str) -> Result<V, ChurnError> {
    value.trim().parse().map_err(|_| ChurnError::Config {
        name,
        value: value.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChurnReport {
    pub initial: usize,
    pub final_len: usize,
    /// Successful remove-then-add cycles across all workers.
    pub relabels: usize,
    pub elapsed: Duration,
    /// Members in key order before the workers started.
    pub members_before: Vec<i64>,
    /// Members in key order after every worker was joined.
    pub members_after: Vec<i64>,
}

impl ChurnReport {
    pub fn passed(&self) -> bool {
        self.final_len == self.initial
    }
}

type Worker = (String, JoinHandle<Result<usize, SetError>>);

/// Adds the members `0..population`.
pub fn populate<S>(set: &S, population: usize) -> Result<(), ChurnError>
where
    S: ConcurrentSet<i64>,
{
    let added = set.extend_from((0..population).map(|i| i as i64))?;
    debug!(added, len = set.len(), "set populated");
    Ok(())
}

/// Runs the churn workers against an already populated set.
pub fn run_churn<S>(set: Arc<S>, config: &ChurnConfig) -> Result<ChurnReport, ChurnError>
where
    S: ConcurrentSet<i64> + Send + Sync + 'static,
{
    run_churn_with(set, config, spawn_worker)
}

fn run_churn_with<S, F>(set: Arc<S>, config: &ChurnConfig, mut spawn: F) -> Result<ChurnReport, ChurnError>
where
    S: ConcurrentSet<i64> + Send + Sync + 'static,
    F: FnMut(&Arc<S>, i64, i64, &ChurnConfig) -> Result<Worker, ChurnError>,
{
    config.validate()?;
    let initial = set.len();
    let members_before = set.snapshot()?;
    let started = Instant::now();
    info!(
        engine = %config.engine,
        workers = config.population * 2,
        iterations = config.iterations,
        "starting churn"
    );

    let mut workers = Vec::with_capacity(config.population * 2);
    let mut spawn_failure = None;
    'spawn: for i in 0..config.population as i64 {
        for (from, to) in [(-i, i), (i, -i)] {
            match spawn(&set, from, to, config) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    spawn_failure = Some(err);
                    break 'spawn;
                }
            }
        }
    }

    if let Some(err) = spawn_failure {
        warn!(spawned = workers.len(), %err, "spawn failed, joining started workers");
        if let Err(join_err) = join_workers(workers) {
            warn!(%join_err, "started worker failed");
        }
        return Err(err);
    }

    let relabels = join_workers(workers)?;
    let report = ChurnReport {
        initial,
        final_len: set.len(),
        relabels,
        elapsed: started.elapsed(),
        members_before,
        members_after: set.snapshot()?,
    };
    info!(
        initial = report.initial,
        final_len = report.final_len,
        relabels = report.relabels,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "churn finished"
    );
    Ok(report)
}

/// Joins every worker, even after one has failed, and returns the first
/// failure.
fn join_workers(workers: Vec<Worker>) -> Result<usize, ChurnError> {
    let mut relabels = 0;
    let mut first_failure = None;
    for (name, handle) in workers {
        match handle.join() {
            Ok(Ok(count)) => relabels += count,
            Ok(Err(err)) => {
                first_failure.get_or_insert(ChurnError::Set(err));
            }
            Err(_) => {
                first_failure.get_or_insert(ChurnError::WorkerPanicked(name));
            }
        }
    }
    match first_failure {
        Some(err) => Err(err),
        None => Ok(relabels),
    }
}

/// Builds the configured engine, populates it and runs the churn.
pub fn run_configured(config: &ChurnConfig) -> Result<ChurnReport, ChurnError> {
    match config.engine {
        Engine::FineGrained => {
            let set = Arc::new(FineGrainedSet::<i64>::new());
            populate(set.as_ref(), config.population)?;
            run_churn(set, config)
        }
        Engine::Optimistic => {
            let set = Arc::new(OptimisticSet::<i64>::new());
            populate(set.as_ref(), config.population)?;
            run_churn(set, config)
        }
    }
}

fn spawn_worker<S>(set: &Arc<S>, from: i64, to: i64, config: &ChurnConfig) -> Result<Worker, ChurnError>
where
    S: ConcurrentSet<i64> + Send + Sync + 'static,
{
    let name = format!("churn {from} -> {to}");
    let set = Arc::clone(set);
    let iterations = config.iterations;
    let pause = config.pause;
    let handle = thread::Builder::new()
        .name(name.clone())
        .spawn(move || relabel(set.as_ref(), from, to, iterations, pause))?;
    Ok((name, handle))
}

fn relabel<S>(
    set: &S,
    from: i64,
    to: i64,
    iterations: usize,
    pause: Duration,
) -> Result<usize, SetError>
where
    S: ConcurrentSet<i64>,
{
    let mut relabels = 0;
    for _ in 0..iterations {
        if set.remove(&from)? {
            set.add(to)?;
            relabels += 1;
        }
        if !pause.is_zero() {
            thread::sleep(pause);
        }
    }
    debug!(from, to, relabels, "worker done");
    Ok(relabels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_config_defaults() {
        let config = ChurnConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ChurnConfig::default());
        assert_eq!(config.population, 10);
        assert_eq!(config.iterations, 100);
        assert_eq!(config.pause, Duration::from_millis(10));
        assert_eq!(config.engine, Engine::Optimistic);
    }

    #[test]
    fn test_config_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_ENGINE, "fine-grained"),
            (ENV_POPULATION, "4"),
            (ENV_ITERATIONS, " 7 "),
            (ENV_PAUSE_MS, "0"),
        ]
        .into_iter()
        .collect();
        let config = ChurnConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.engine, Engine::FineGrained);
        assert_eq!(config.population, 4);
        assert_eq!(config.iterations, 7);
        assert!(config.pause.is_zero());
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let bad_engine = ChurnConfig::from_lookup(|name| {
            (name == ENV_ENGINE).then(|| "lock-free".to_string())
        });
        assert!(matches!(
            bad_engine,
            Err(ChurnError::Config { name: ENV_ENGINE, .. })
        ));

        let zero_population = ChurnConfig::from_lookup(|name| {
            (name == ENV_POPULATION).then(|| "0".to_string())
        });
        assert!(matches!(
            zero_population,
            Err(ChurnError::Config { name: ENV_POPULATION, .. })
        ));

        let not_a_number = ChurnConfig::from_lookup(|name| {
            (name == ENV_ITERATIONS).then(|| "many".to_string())
        });
        assert!(matches!(
            not_a_number,
            Err(ChurnError::Config { name: ENV_ITERATIONS, .. })
        ));
    }

    #[test]
    fn test_engine_round_trips_through_display() {
        for engine in [Engine::FineGrained, Engine::Optimistic] {
            assert_eq!(engine.to_string().parse::<Engine>().unwrap(), engine);
        }
    }

    #[test]
    fn test_run_configured_small() {
        for engine in [Engine::FineGrained, Engine::Optimistic] {
            let config = ChurnConfig {
                engine,
                population: 4,
                iterations: 20,
                pause: Duration::ZERO,
            };
            let report = run_configured(&config).unwrap();
            assert_eq!(report.initial, 4);
            assert!(report.passed(), "{engine}: {report:?}");
        }
    }

    #[test]
    fn test_report_lists_members_before_and_after() {
        let config = ChurnConfig {
            engine: Engine::FineGrained,
            population: 5,
            iterations: 10,
            pause: Duration::ZERO,
        };
        let set = Arc::new(FineGrainedSet::<i64>::new());
        populate(set.as_ref(), config.population).unwrap();

        let report = run_churn(Arc::clone(&set), &config).unwrap();
        assert_eq!(report.members_before, vec![0, 1, 2, 3, 4]);
        assert_eq!(report.members_after, set.snapshot().unwrap());
        assert_eq!(report.members_after.len(), 5);
        for i in 1..5 {
            assert!(report.members_after.contains(&i) != report.members_after.contains(&-i));
        }
    }

    #[test]
    fn test_spawn_failure_joins_started_workers() {
        let config = ChurnConfig {
            population: 4,
            pause: Duration::ZERO,
            ..ChurnConfig::default()
        };
        let set = Arc::new(OptimisticSet::<i64>::new());
        populate(set.as_ref(), config.population).unwrap();

        let finished = Arc::new(AtomicUsize::new(0));
        let mut attempts = 0;
        let result = run_churn_with(Arc::clone(&set), &config, |_, from, to, _| {
            attempts += 1;
            if attempts == 4 {
                return Err(ChurnError::Spawn(io::Error::other("thread limit reached")));
            }
            let finished = Arc::clone(&finished);
            let handle = thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            });
            Ok((format!("churn {from} -> {to}"), handle))
        });

        assert!(matches!(result, Err(ChurnError::Spawn(_))));
        // The three workers started before the failure were all joined.
        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert_eq!(set.len(), 4);
    }
}
