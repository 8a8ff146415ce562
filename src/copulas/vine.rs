//! # Vine
//!
//! $$
//! c(u_1,\dots,u_d)=\prod_{t=1}^{d-1}\prod_{e\in T_t}
//! c_{e}\!\left(F(u_{a_e}\mid D_e),F(u_{b_e}\mid D_e)\right)
//! $$
//!
use ndarray::Array1;
use ndarray::Array2;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Uniform;
use tracing::debug;
use tracing::info;

use crate::copulas::bivariate::select_pair_copula;
use crate::copulas::bivariate::CopulaFamily;
use crate::copulas::bivariate::PairCopula;
use crate::copulas::correlation::kendall_tau;
use crate::copulas::correlation::pearson_matrix;
use crate::error::Result;
use crate::error::VineError;

const EPS: f64 = 1e-12;

/// Dependence criterion used to pick each tree's root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeCriterion {
  KendallTau,
  AbsPearson,
}

/// Options for [`VineModel::fit`].
#[derive(Debug, Clone)]
pub struct FitOptions {
  /// Candidate pair-copula families, selected per edge by AIC.
  pub families: Vec<CopulaFamily>,
  /// Criterion maximized by the greedy tree construction.
  pub criterion: TreeCriterion,
  /// Maximum number of tree levels to fit; `None` fits all d - 1.
  pub truncation_level: Option<usize>,
}

impl Default for FitOptions {
  fn default() -> Self {
    Self {
      families: CopulaFamily::ALL.to_vec(),
      criterion: TreeCriterion::KendallTau,
      truncation_level: None,
    }
  }
}

/// One pair-copula edge of the vine: the conditioned pair, the variables
/// conditioned on, the edge's sample tau and the selected copula.
#[derive(Debug, Clone, PartialEq)]
pub struct VineEdge {
  pub conditioned: (usize, usize),
  pub conditioning: Vec<usize>,
  pub tau: f64,
  pub copula: PairCopula,
}

/// A fitted canonical-vine model: a sequence of star trees whose roots are
/// chosen greedily by total dependence. Immutable after [`VineModel::fit`].
#[derive(Debug, Clone, PartialEq)]
pub struct VineModel {
  dim: usize,
  order: Vec<usize>,
  trees: Vec<Vec<VineEdge>>,
  truncation_level: Option<usize>,
}

impl VineModel {
  /// Fits the tree sequence and per-edge copulas to pseudo-observations.
  ///
  /// Level t connects the surviving variables through the root maximizing
  /// total absolute dependence; every other variable contributes one edge
  /// conditioned on the roots of the levels below, and is replaced by its
  /// h-transformed conditional pseudo-observations for the next level.
  pub fn fit(u: &Array2<f64>, options: &FitOptions) -> Result<Self> {
    let (n, d) = u.dim();
    if d < 2 {
      return Err(VineError::Dimension(format!(
        "vine requires at least 2 variables, got {}",
        d
      )));
    }
    if n <= d {
      return Err(VineError::InvalidInput(format!(
        "need more rows than variables ({} rows, {} variables)",
        n, d
      )));
    }
    if u.iter().any(|&v| !(0.0 < v && v < 1.0)) {
      return Err(VineError::InvalidInput(
        "pseudo-observations must lie strictly in (0, 1)".into(),
      ));
    }
    if options.families.is_empty() {
      return Err(VineError::InvalidInput("family set is empty".into()));
    }

    let levels = options.truncation_level.unwrap_or(d - 1).min(d - 1);
    info!(dim = d, rows = n, levels, "fitting vine copula");

    let mut active: Vec<usize> = (0..d).collect();
    let mut cols: Vec<Array1<f64>> = (0..d).map(|j| u.column(j).to_owned()).collect();
    let mut conditioning: Vec<usize> = Vec::new();
    let mut trees: Vec<Vec<VineEdge>> = Vec::with_capacity(levels);

    for level in 0..levels {
      let m = active.len();
      let dep = dependence_matrix(&cols, options.criterion)?;

      let mut root_pos = 0;
      let mut best_sum = f64::NEG_INFINITY;
      for i in 0..m {
        let s: f64 = (0..m).filter(|&j| j != i).map(|j| dep[[i, j]]).sum();
        if s > best_sum {
          best_sum = s;
          root_pos = i;
        }
      }
      let root_var = active[root_pos];
      debug!(level, root = root_var, "selected tree root");

      let root_col = cols[root_pos].clone();
      let mut edges = Vec::with_capacity(m - 1);
      let mut next_cols = Vec::with_capacity(m - 1);
      let mut next_active = Vec::with_capacity(m - 1);

      for j in 0..m {
        if j == root_pos {
          continue;
        }
        let tau = kendall_tau(&cols[j], &root_col)?;
        let copula = select_pair_copula(&options.families, &cols[j], &root_col, tau)?;
        debug!(
          level,
          pair = ?(root_var, active[j]),
          tau,
          copula = ?copula.family(),
          "selected edge copula"
        );

        let transformed = cols[j]
          .iter()
          .zip(root_col.iter())
          .map(|(&x, &v)| copula.h(x, v).clamp(EPS, 1.0 - EPS))
          .collect::<Array1<f64>>();

        edges.push(VineEdge {
          conditioned: (root_var, active[j]),
          conditioning: conditioning.clone(),
          tau,
          copula,
        });
        next_cols.push(transformed);
        next_active.push(active[j]);
      }

      conditioning.push(root_var);
      trees.push(edges);
      active = next_active;
      cols = next_cols;
    }

    let mut order = conditioning;
    order.extend(active);

    Ok(Self {
      dim: d,
      order,
      trees,
      truncation_level: options.truncation_level,
    })
  }

  pub fn dim(&self) -> usize {
    self.dim
  }

  /// Variable order: tree roots first, then the unconditioned remainder.
  pub fn order(&self) -> &[usize] {
    &self.order
  }

  pub fn trees(&self) -> &[Vec<VineEdge>] {
    &self.trees
  }

  pub fn truncation_level(&self) -> Option<usize> {
    self.truncation_level
  }

  fn edge(&self, level: usize, var: usize) -> &VineEdge {
    self.trees[level]
      .iter()
      .find(|e| e.conditioned.1 == var)
      .expect("every non-root variable has an edge at each fitted level")
  }

  /// Draws `n` rows from the fitted vine by the inverse-Rosenblatt
  /// recursion, innermost conditioning level first. Deterministic given
  /// the model and `seed`; rows are independent draws.
  pub fn sample(&self, n: usize, seed: u64) -> Result<Array2<f64>> {
    if n < 1 {
      return Err(VineError::Sampling(format!(
        "sample size must be positive, got {}",
        n
      )));
    }

    let d = self.dim;
    let levels = self.trees.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let w = Array2::<f64>::random_using((n, d), Uniform::new(EPS, 1.0 - EPS), &mut rng);
    let mut out = Array2::<f64>::zeros((n, d));

    for row in 0..n {
      let mut cond: Vec<Vec<f64>> = Vec::with_capacity(d);
      for i in 0..d {
        let m = i.min(levels);
        let mut t = w[[row, i]];
        for k in (0..m).rev() {
          let edge = self.edge(k, self.order[i]);
          t = edge.copula.h_inv(t, cond[k][k]);
        }

        let mut chain = Vec::with_capacity(m + 1);
        chain.push(t);
        for k in 0..m {
          let edge = self.edge(k, self.order[i]);
          let next = edge.copula.h(chain[k], cond[k][k]);
          chain.push(next);
        }

        out[[row, self.order[i]]] = t;
        cond.push(chain);
      }
    }

    Ok(out)
  }
}

fn dependence_matrix(cols: &[Array1<f64>], criterion: TreeCriterion) -> Result<Array2<f64>> {
  let m = cols.len();
  match criterion {
    TreeCriterion::KendallTau => {
      let mut dep = Array2::<f64>::zeros((m, m));
      for i in 0..m {
        for j in (i + 1)..m {
          let tau = kendall_tau(&cols[i], &cols[j])?.abs();
          dep[[i, j]] = tau;
          dep[[j, i]] = tau;
        }
      }
      Ok(dep)
    }
    TreeCriterion::AbsPearson => {
      let n = cols[0].len();
      let mut stacked = Array2::<f64>::zeros((n, m));
      for (j, col) in cols.iter().enumerate() {
        stacked.column_mut(j).assign(col);
      }
      Ok(pearson_matrix(&stacked)?.mapv(f64::abs))
    }
  }
}
