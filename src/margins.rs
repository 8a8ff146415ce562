//! # Margins
//!
//! $$
//! u_i=\frac{\operatorname{rank}(x_i)}{n+1},\qquad
//! \hat F^{-1}(p)=x_{(\lfloor h\rfloor)}+(h-\lfloor h\rfloor)\,(x_{(\lfloor h\rfloor+1)}-x_{(\lfloor h\rfloor)})
//! $$
//!
use std::cmp::Ordering;

use ndarray::Array1;
use ndarray::Array2;
use ndarray_stats::QuantileExt;

use crate::error::Result;
use crate::error::VineError;

/// Average 1-based ranks of a column, ties resolved by the mean rank of the
/// tie group.
fn average_ranks(column: &Array1<f64>) -> Vec<f64> {
  let n = column.len();
  let mut idx: Vec<usize> = (0..n).collect();
  idx.sort_by(|&a, &b| {
    column[a]
      .partial_cmp(&column[b])
      .unwrap_or(Ordering::Equal)
  });

  let mut ranks = vec![0.0; n];
  let mut i = 0;
  while i < n {
    let mut j = i;
    while j + 1 < n && column[idx[j + 1]] == column[idx[i]] {
      j += 1;
    }
    // ranks i+1 ..= j+1 share the tie group
    let avg = (i + j + 2) as f64 / 2.0;
    for k in i..=j {
      ranks[idx[k]] = avg;
    }
    i = j + 1;
  }

  ranks
}

/// Rank-transforms a matrix of raw returns into pseudo-observations on
/// (0,1)^d via the empirical CDF, `rank / (n + 1)` per column.
///
/// Row alignment is preserved: row i of the output corresponds to row i of
/// the input. Deterministic, no randomness involved.
pub fn pseudo_observations(returns: &Array2<f64>) -> Result<Array2<f64>> {
  let n = returns.nrows();
  if n < 2 {
    return Err(VineError::InvalidInput(format!(
      "need at least 2 rows, got {}",
      n
    )));
  }

  let mut u = Array2::<f64>::zeros(returns.raw_dim());
  for j in 0..returns.ncols() {
    let column = returns.column(j).to_owned();
    let min = *column
      .min()
      .map_err(|e| VineError::InvalidInput(format!("column {}: {}", j, e)))?;
    let max = *column
      .max()
      .map_err(|e| VineError::InvalidInput(format!("column {}: {}", j, e)))?;
    if min == max {
      return Err(VineError::InvalidInput(format!(
        "column {} is constant",
        j
      )));
    }

    let ranks = average_ranks(&column);
    for i in 0..n {
      u[[i, j]] = ranks[i] / (n as f64 + 1.0);
    }
  }

  Ok(u)
}

/// Empirical-quantile inverse transform of a uniform column against a
/// historical column (type-7: linear interpolation between order
/// statistics).
///
/// Monotone in `uniforms` and bounded by the historical min and max.
pub fn empirical_quantile(
  uniforms: &Array1<f64>,
  historical: &Array1<f64>,
) -> Result<Array1<f64>> {
  let n = historical.len();
  if n < 2 {
    return Err(VineError::InvalidInput(format!(
      "need at least 2 historical observations, got {}",
      n
    )));
  }
  if uniforms.iter().any(|&p| !(0.0..=1.0).contains(&p)) {
    return Err(VineError::InvalidInput(
      "uniform values must lie in [0, 1]".into(),
    ));
  }

  let mut sorted = historical.to_vec();
  sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

  let out = uniforms.mapv(|p| {
    let h = p * (n - 1) as f64;
    let lo = h.floor() as usize;
    if lo + 1 >= n {
      sorted[n - 1]
    } else {
      sorted[lo] + (h - lo as f64) * (sorted[lo + 1] - sorted[lo])
    }
  });

  Ok(out)
}

/// Applies [`empirical_quantile`] column-by-column, mapping simulated
/// uniforms back to the original return scale.
pub fn quantile_map(uniforms: &Array2<f64>, historical: &Array2<f64>) -> Result<Array2<f64>> {
  if uniforms.ncols() != historical.ncols() {
    return Err(VineError::Dimension(format!(
      "uniform matrix has {} columns, historical has {}",
      uniforms.ncols(),
      historical.ncols()
    )));
  }

  let mut out = Array2::<f64>::zeros(uniforms.raw_dim());
  for j in 0..uniforms.ncols() {
    let mapped = empirical_quantile(&uniforms.column(j).to_owned(), &historical.column(j).to_owned())?;
    out.column_mut(j).assign(&mapped);
  }

  Ok(out)
}

#[cfg(test)]
mod tests {
  use approx::assert_relative_eq;
  use ndarray::array;
  use ndarray::Array1;
  use ndarray::Array2;
  use rand::rngs::StdRng;
  use rand::Rng;
  use rand::SeedableRng;

  use super::empirical_quantile;
  use super::pseudo_observations;
  use super::quantile_map;
  use crate::error::VineError;

  fn random_returns(n: usize, d: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((n, d), |_| rng.gen::<f64>() - 0.5)
  }

  #[test]
  fn pseudo_observations_lie_strictly_in_unit_interval() {
    let x = random_returns(200, 4, 7);
    let u = pseudo_observations(&x).unwrap();
    assert_eq!(u.dim(), (200, 4));
    assert!(u.iter().all(|&v| v > 0.0 && v < 1.0));
  }

  #[test]
  fn pseudo_observations_preserve_rank_order() {
    let x = array![[0.3, -1.0], [-0.2, 4.0], [1.5, 2.0], [0.7, -3.0]];
    let u = pseudo_observations(&x).unwrap();
    for j in 0..2 {
      for a in 0..4 {
        for b in 0..4 {
          if x[[a, j]] < x[[b, j]] {
            assert!(u[[a, j]] < u[[b, j]]);
          }
        }
      }
    }
  }

  #[test]
  fn ties_receive_identical_average_ranks() {
    let x = array![[1.0, 0.1], [2.0, 0.2], [1.0, 0.3], [3.0, 0.4]];
    let u = pseudo_observations(&x).unwrap();
    assert_relative_eq!(u[[0, 0]], u[[2, 0]]);
    // average of ranks 1 and 2 over n + 1 = 5
    assert_relative_eq!(u[[0, 0]], 1.5 / 5.0);
  }

  #[test]
  fn constant_column_is_rejected() {
    let x = array![[1.0, 2.0], [1.0, 3.0], [1.0, 4.0]];
    assert!(matches!(
      pseudo_observations(&x),
      Err(VineError::InvalidInput(_))
    ));
  }

  #[test]
  fn too_few_rows_are_rejected() {
    let x = array![[1.0, 2.0]];
    assert!(matches!(
      pseudo_observations(&x),
      Err(VineError::InvalidInput(_))
    ));
  }

  #[test]
  fn empirical_quantile_is_monotone_and_bounded() {
    let hist = Array1::from(vec![-2.0, -0.5, 0.0, 0.3, 1.7, 4.0]);
    let p = Array1::linspace(0.01, 0.99, 50);
    let q = empirical_quantile(&p, &hist).unwrap();
    for i in 1..q.len() {
      assert!(q[i] >= q[i - 1]);
    }
    assert!(q.iter().all(|&v| (-2.0..=4.0).contains(&v)));
  }

  #[test]
  fn empirical_quantile_interpolates_between_order_statistics() {
    let hist = Array1::from(vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    let p = Array1::from(vec![0.0, 0.25, 0.5, 0.625, 1.0]);
    let q = empirical_quantile(&p, &hist).unwrap();
    assert_relative_eq!(q[0], 0.0);
    assert_relative_eq!(q[1], 1.0);
    assert_relative_eq!(q[2], 2.0);
    assert_relative_eq!(q[3], 2.5);
    assert_relative_eq!(q[4], 4.0);
  }

  #[test]
  fn quantile_map_rejects_column_mismatch() {
    let u = random_returns(10, 3, 1).mapv(|v| v.abs().min(0.9) + 0.01);
    let hist = random_returns(10, 2, 2);
    assert!(matches!(
      quantile_map(&u, &hist),
      Err(VineError::Dimension(_))
    ));
  }
}
