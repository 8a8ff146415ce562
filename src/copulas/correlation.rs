//! # Correlation
//!
//! $$
//! \tau_{ij}=\frac{2}{n(n-1)}\sum_{k<l}\operatorname{sgn}(x_{ki}-x_{li})\operatorname{sgn}(x_{kj}-x_{lj})
//! $$
//!
use std::cmp::Ordering;

use ndarray::Array1;
use ndarray::Array2;

use crate::error::Result;
use crate::error::VineError;

/// Kendall's tau-b between two columns.
pub fn kendall_tau(x: &Array1<f64>, y: &Array1<f64>) -> Result<f64> {
  let (tau, ..) = kendalls::tau_b_with_comparator(&x.to_vec(), &y.to_vec(), |a, b| {
    a.partial_cmp(b).unwrap_or(Ordering::Greater)
  })
  .map_err(|e| VineError::InvalidInput(format!("kendall tau: {}", e)))?;

  Ok(tau)
}

/// Kendall's tau matrix for a data matrix with observations in rows.
pub fn kendall_tau_matrix(data: &Array2<f64>) -> Result<Array2<f64>> {
  let cols = data.ncols();
  let mut tau_matrix = Array2::<f64>::eye(cols);

  for i in 0..cols {
    for j in (i + 1)..cols {
      let tau = kendall_tau(&data.column(i).to_owned(), &data.column(j).to_owned())?;
      tau_matrix[[i, j]] = tau;
      tau_matrix[[j, i]] = tau;
    }
  }

  Ok(tau_matrix)
}

/// Pearson correlation matrix for a data matrix with observations in rows.
pub fn pearson_matrix(data: &Array2<f64>) -> Result<Array2<f64>> {
  let n = data.nrows();
  if n < 2 {
    return Err(VineError::InvalidInput(format!(
      "need at least 2 rows for correlation, got {}",
      n
    )));
  }

  let cols = data.ncols();
  let means: Vec<f64> = (0..cols)
    .map(|j| data.column(j).sum() / n as f64)
    .collect();
  let stds: Vec<f64> = (0..cols)
    .map(|j| {
      data
        .column(j)
        .iter()
        .map(|&v| (v - means[j]).powi(2))
        .sum::<f64>()
        .sqrt()
    })
    .collect();

  let mut corr = Array2::<f64>::eye(cols);
  for i in 0..cols {
    for j in (i + 1)..cols {
      let cov: f64 = data
        .column(i)
        .iter()
        .zip(data.column(j).iter())
        .map(|(&a, &b)| (a - means[i]) * (b - means[j]))
        .sum();
      let denom = stds[i] * stds[j];
      let r = if denom > 0.0 { cov / denom } else { 0.0 };
      corr[[i, j]] = r;
      corr[[j, i]] = r;
    }
  }

  Ok(corr)
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;
  use ndarray::Array1;

  use super::kendall_tau;
  use super::kendall_tau_matrix;
  use super::pearson_matrix;

  #[test]
  fn perfectly_concordant_columns_have_tau_one() {
    let x = Array1::from(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    let y = Array1::from(vec![0.1, 0.4, 0.9, 1.6, 2.5]);
    assert_abs_diff_eq!(kendall_tau(&x, &y).unwrap(), 1.0);
  }

  #[test]
  fn discordant_columns_have_negative_tau() {
    let x = Array1::from(vec![1.0, 2.0, 3.0, 4.0]);
    let y = Array1::from(vec![4.0, 3.0, 2.0, 1.0]);
    assert_abs_diff_eq!(kendall_tau(&x, &y).unwrap(), -1.0);
  }

  #[test]
  fn matrices_are_symmetric_with_unit_diagonal() {
    let data = array![
      [0.1, -0.4, 0.2],
      [0.3, 0.1, -0.6],
      [-0.2, 0.5, 0.4],
      [0.8, -0.1, 0.0],
      [0.4, 0.3, -0.2]
    ];
    let tau = kendall_tau_matrix(&data).unwrap();
    let rho = pearson_matrix(&data).unwrap();
    for i in 0..3 {
      assert_abs_diff_eq!(tau[[i, i]], 1.0);
      assert_abs_diff_eq!(rho[[i, i]], 1.0);
      for j in 0..3 {
        assert_abs_diff_eq!(tau[[i, j]], tau[[j, i]]);
        assert_abs_diff_eq!(rho[[i, j]], rho[[j, i]]);
        assert!(rho[[i, j]].abs() <= 1.0 + 1e-12);
      }
    }
  }

  #[test]
  fn pearson_matches_hand_computed_value() {
    let data = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]];
    let rho = pearson_matrix(&data).unwrap();
    assert_abs_diff_eq!(rho[[0, 1]], 1.0, epsilon = 1e-12);
  }
}
