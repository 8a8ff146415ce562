//! # Simulation
//!
//! $$
//! s=\tfrac12\,\overline{|\hat\tau_{sim}-\hat\tau_{hist}|}
//! +\tfrac12\,\overline{|\hat\rho_{sim}-\hat\rho_{hist}|}
//! $$
//!
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;
use std::sync::Mutex;

use ndarray::Array2;
use rayon::prelude::*;
use tracing::debug;
use tracing::info;

use crate::copulas::correlation::kendall_tau_matrix;
use crate::copulas::correlation::pearson_matrix;
use crate::copulas::vine::FitOptions;
use crate::copulas::vine::VineModel;
use crate::error::Result;
use crate::error::VineError;
use crate::margins::pseudo_observations;
use crate::margins::quantile_map;

/// Relative weight of the rank and linear correlation discrepancies in the
/// quality score. The 0.5/0.5 split is the fixed default; callers may
/// override it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
  pub kendall: f64,
  pub pearson: f64,
}

impl Default for ScoreWeights {
  fn default() -> Self {
    Self {
      kendall: 0.5,
      pearson: 0.5,
    }
  }
}

/// Correlation structure of historical vs. simulated returns, both rank
/// (Kendall) and linear (Pearson), with element-wise differences.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationDiagnostics {
  pub historical_kendall: Array2<f64>,
  pub simulated_kendall: Array2<f64>,
  pub historical_pearson: Array2<f64>,
  pub simulated_pearson: Array2<f64>,
  pub kendall_diff: Array2<f64>,
  pub pearson_diff: Array2<f64>,
}

impl CorrelationDiagnostics {
  pub fn compute(simulated: &Array2<f64>, historical: &Array2<f64>) -> Result<Self> {
    if simulated.ncols() != historical.ncols() {
      return Err(VineError::Dimension(format!(
        "simulated matrix has {} columns, historical has {}",
        simulated.ncols(),
        historical.ncols()
      )));
    }

    let historical_kendall = kendall_tau_matrix(historical)?;
    let simulated_kendall = kendall_tau_matrix(simulated)?;
    let historical_pearson = pearson_matrix(historical)?;
    let simulated_pearson = pearson_matrix(simulated)?;
    let kendall_diff = &simulated_kendall - &historical_kendall;
    let pearson_diff = &simulated_pearson - &historical_pearson;

    Ok(Self {
      historical_kendall,
      simulated_kendall,
      historical_pearson,
      simulated_pearson,
      kendall_diff,
      pearson_diff,
    })
  }

  /// Weighted mean absolute element-wise correlation discrepancy. Lower is
  /// better; zero only when both correlation structures coincide.
  pub fn score(&self, weights: &ScoreWeights) -> f64 {
    let kendall = self.kendall_diff.mapv(f64::abs).mean().unwrap_or(0.0);
    let pearson = self.pearson_diff.mapv(f64::abs).mean().unwrap_or(0.0);
    weights.kendall * kendall + weights.pearson * pearson
  }
}

/// Scores a simulated return matrix against the historical one.
pub fn score(
  simulated: &Array2<f64>,
  historical: &Array2<f64>,
  weights: &ScoreWeights,
) -> Result<f64> {
  Ok(CorrelationDiagnostics::compute(simulated, historical)?.score(weights))
}

/// One completed simulation trial. All but the best-scoring trial are
/// discarded by the runner.
#[derive(Debug, Clone)]
pub struct SimulationTrial {
  pub index: usize,
  pub uniforms: Array2<f64>,
  pub returns: Array2<f64>,
  pub score: f64,
  pub diagnostics: CorrelationDiagnostics,
}

/// Terminal artifact of a multi-trial run: the retained simulation, its
/// score and correlation diagnostics, plus shared handles to the fitted
/// model and the historical matrix it was scored against.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
  pub historical: Arc<Array2<f64>>,
  pub model: Arc<VineModel>,
  pub simulated: Array2<f64>,
  pub quality_score: f64,
  pub trial_index: usize,
  pub diagnostics: CorrelationDiagnostics,
}

/// Runner configuration; defaults mirror the documented option set.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
  pub fit: FitOptions,
  /// Simulated rows per trial; `None` uses the historical row count.
  pub n: Option<usize>,
  pub n_trials: usize,
  pub seed: u64,
  pub weights: ScoreWeights,
}

impl Default for SimulationConfig {
  fn default() -> Self {
    Self {
      fit: FitOptions::default(),
      n: None,
      n_trials: 5,
      seed: 0,
      weights: ScoreWeights::default(),
    }
  }
}

fn trial_seed(seed: u64, index: usize) -> u64 {
  seed.wrapping_add((index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

fn run_trial(
  index: usize,
  historical: &Array2<f64>,
  model: &VineModel,
  n: usize,
  config: &SimulationConfig,
) -> Result<SimulationTrial> {
  let uniforms = model.sample(n, trial_seed(config.seed, index))?;
  let returns = quantile_map(&uniforms, historical)?;
  let diagnostics = CorrelationDiagnostics::compute(&returns, historical)?;
  let score = diagnostics.score(&config.weights);
  debug!(trial = index, score, "completed simulation trial");

  Ok(SimulationTrial {
    index,
    uniforms,
    returns,
    score,
    diagnostics,
  })
}

/// Runs `n_trials` independent sampling trials against a fitted model and
/// keeps the lowest-scoring one, ties broken by the lower trial index.
///
/// Trials carry deterministic per-index sub-seeds, so the selected trial
/// does not depend on execution order; the trial loop runs on the rayon
/// pool. A failed trial aborts the whole run.
pub fn run(
  historical: &Arc<Array2<f64>>,
  model: &Arc<VineModel>,
  config: &SimulationConfig,
) -> Result<SimulationResult> {
  if historical.ncols() != model.dim() {
    return Err(VineError::Dimension(format!(
      "historical matrix has {} columns, model has {}",
      historical.ncols(),
      model.dim()
    )));
  }
  if config.n_trials < 1 {
    return Err(VineError::InvalidInput(
      "n_trials must be positive".into(),
    ));
  }
  let n = config.n.unwrap_or_else(|| historical.nrows());
  if n < 1 {
    return Err(VineError::Sampling(
      "simulated row count must be positive".into(),
    ));
  }

  info!(
    trials = config.n_trials,
    rows = n,
    seed = config.seed,
    "running simulation trials"
  );

  let trials: Vec<SimulationTrial> = (0..config.n_trials)
    .into_par_iter()
    .map(|index| run_trial(index, historical, model, n, config))
    .collect::<Result<_>>()?;

  let best = trials
    .into_iter()
    .min_by(|a, b| {
      a.score
        .partial_cmp(&b.score)
        .unwrap_or(Ordering::Equal)
        .then(a.index.cmp(&b.index))
    })
    .expect("n_trials >= 1 produces at least one trial");

  Ok(SimulationResult {
    historical: Arc::clone(historical),
    model: Arc::clone(model),
    simulated: best.returns,
    quality_score: best.score,
    trial_index: best.index,
    diagnostics: best.diagnostics,
  })
}

/// End-to-end pipeline: pseudo-observations, vine fit, multi-trial run.
pub fn simulate(historical: &Array2<f64>, config: &SimulationConfig) -> Result<SimulationResult> {
  let u = pseudo_observations(historical)?;
  let model = Arc::new(VineModel::fit(&u, &config.fit)?);
  run(&Arc::new(historical.clone()), &model, config)
}

/// Storage boundary for memoizing simulation results; the algorithm itself
/// stays pure and the caller decides where results live.
pub trait SimulationStore {
  fn load(&self, key: u64) -> Option<SimulationResult>;
  fn store(&self, key: u64, result: &SimulationResult);
}

/// In-memory [`SimulationStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<u64, SimulationResult>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.lock().expect("store mutex poisoned").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl SimulationStore for MemoryStore {
  fn load(&self, key: u64) -> Option<SimulationResult> {
    self
      .entries
      .lock()
      .expect("store mutex poisoned")
      .get(&key)
      .cloned()
  }

  fn store(&self, key: u64, result: &SimulationResult) {
    self
      .entries
      .lock()
      .expect("store mutex poisoned")
      .insert(key, result.clone());
  }
}

/// Key of a (historical data, configuration) pair for [`run_cached`].
pub fn cache_key(historical: &Array2<f64>, config: &SimulationConfig) -> u64 {
  let mut hasher = DefaultHasher::new();
  historical.dim().hash(&mut hasher);
  for &v in historical.iter() {
    v.to_bits().hash(&mut hasher);
  }
  config.fit.families.hash(&mut hasher);
  config.fit.criterion.hash(&mut hasher);
  config.fit.truncation_level.hash(&mut hasher);
  config.n.hash(&mut hasher);
  config.n_trials.hash(&mut hasher);
  config.seed.hash(&mut hasher);
  config.weights.kendall.to_bits().hash(&mut hasher);
  config.weights.pearson.to_bits().hash(&mut hasher);
  hasher.finish()
}

/// [`simulate`] wrapped in the memoization boundary: loads a previous
/// result for the same (data, configuration) key, otherwise computes and
/// stores it.
pub fn run_cached<S: SimulationStore>(
  store: &S,
  historical: &Array2<f64>,
  config: &SimulationConfig,
) -> Result<SimulationResult> {
  let key = cache_key(historical, config);
  if let Some(hit) = store.load(key) {
    debug!(key, "simulation cache hit");
    return Ok(hit);
  }

  let result = simulate(historical, config)?;
  store.store(key, &result);
  Ok(result)
}
