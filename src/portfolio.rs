//! # Portfolio
//!
//! $$
//! \min_w\; w^\top\Sigma w\quad\text{s.t.}\;\mathbf 1^\top w=1
//! $$
//!
use ndarray::Array1;
use ndarray::Array2;

use crate::error::Result;
use crate::error::VineError;

/// Named weight vector mapping asset identifier to portfolio weight.
/// Long-only weights sum to one; short-allowed weights are unconstrained.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioWeights {
  assets: Vec<String>,
  weights: Array1<f64>,
}

impl PortfolioWeights {
  pub fn new(assets: Vec<String>, weights: Array1<f64>) -> Result<Self> {
    if assets.len() != weights.len() {
      return Err(VineError::Dimension(format!(
        "{} asset names for {} weights",
        assets.len(),
        weights.len()
      )));
    }
    Ok(Self { assets, weights })
  }

  pub fn assets(&self) -> &[String] {
    &self.assets
  }

  pub fn weights(&self) -> &Array1<f64> {
    &self.weights
  }

  pub fn weight(&self, asset: &str) -> Option<f64> {
    self
      .assets
      .iter()
      .position(|a| a == asset)
      .map(|i| self.weights[i])
  }

  pub fn sum(&self) -> f64 {
    self.weights.sum()
  }

  pub fn is_long_only(&self) -> bool {
    self.weights.iter().all(|&w| w >= 0.0)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
    self
      .assets
      .iter()
      .map(String::as_str)
      .zip(self.weights.iter().copied())
  }
}

/// Constraint set handed to the external optimizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrontierConstraints {
  pub long_only: bool,
  pub max_weight: Option<f64>,
}

impl Default for FrontierConstraints {
  fn default() -> Self {
    Self {
      long_only: true,
      max_weight: None,
    }
  }
}

/// One point on the efficient frontier.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontierPoint {
  pub risk: f64,
  pub expected_return: f64,
  pub weights: PortfolioWeights,
}

/// Mean-variance optimization stage, consumed as an external collaborator.
/// The quadratic-programming solver behind it is not part of this crate;
/// downstream code only reads the weight vectors it produces.
pub trait PortfolioWeightProvider {
  /// Ordered (by risk) sequence of efficient frontier points.
  fn compute_frontier(
    &self,
    returns: &Array2<f64>,
    constraints: &FrontierConstraints,
  ) -> Result<Vec<FrontierPoint>>;

  /// Minimum-variance portfolio weights.
  fn compute_min_variance(&self, returns: &Array2<f64>) -> Result<PortfolioWeights>;

  /// Maximum-Sharpe portfolio weights relative to a risk-free rate.
  fn compute_tangency(&self, returns: &Array2<f64>, risk_free_rate: f64)
    -> Result<PortfolioWeights>;
}
