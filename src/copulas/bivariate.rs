//! # Bivariate
//!
//! $$
//! h(u\mid v)=\frac{\partial C(u,v)}{\partial v},\qquad
//! \hat\theta=\theta(\hat\tau)
//! $$
//!
use gauss_quad::GaussLegendre;
use ndarray::Array1;
use roots::find_root_brent;
use roots::SimpleConvergency;
use statrs::distribution::ContinuousCDF;
use statrs::distribution::Normal;
use statrs::distribution::StudentsT;
use statrs::function::gamma::ln_gamma;
use tracing::debug;

use crate::error::Result;
use crate::error::VineError;

const EPS: f64 = 1e-12;
const RHO_BOUND: f64 = 0.999_999;
const THETA_MAX: f64 = 50.0;

/// Degrees-of-freedom grid for the Student-t profile likelihood.
const DF_GRID: [f64; 9] = [2.5, 3.0, 4.0, 5.0, 7.0, 10.0, 15.0, 20.0, 30.0];

fn clamp_unit(x: f64) -> f64 {
  x.clamp(EPS, 1.0 - EPS)
}

fn std_normal() -> Normal {
  Normal::new(0.0, 1.0).unwrap()
}

fn student_t(df: f64) -> StudentsT {
  StudentsT::new(0.0, 1.0, df).unwrap()
}

/// The closed set of fittable pair-copula families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CopulaFamily {
  Gaussian,
  StudentT,
  Clayton,
  Gumbel,
  Frank,
  Joe,
}

impl CopulaFamily {
  pub const ALL: [Self; 6] = [
    Self::Gaussian,
    Self::StudentT,
    Self::Clayton,
    Self::Gumbel,
    Self::Frank,
    Self::Joe,
  ];
}

/// A fitted bivariate copula, tagged by family and carrying its parameter
/// payload. `Independence` is the implicit copula of truncated tree levels
/// and is never selected during fitting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PairCopula {
  Independence,
  Gaussian { rho: f64 },
  StudentT { rho: f64, df: f64 },
  Clayton { theta: f64 },
  Gumbel { theta: f64 },
  Frank { theta: f64 },
  Joe { theta: f64 },
}

impl PairCopula {
  pub fn family(&self) -> Option<CopulaFamily> {
    match self {
      Self::Independence => None,
      Self::Gaussian { .. } => Some(CopulaFamily::Gaussian),
      Self::StudentT { .. } => Some(CopulaFamily::StudentT),
      Self::Clayton { .. } => Some(CopulaFamily::Clayton),
      Self::Gumbel { .. } => Some(CopulaFamily::Gumbel),
      Self::Frank { .. } => Some(CopulaFamily::Frank),
      Self::Joe { .. } => Some(CopulaFamily::Joe),
    }
  }

  pub fn param_count(&self) -> usize {
    match self {
      Self::Independence => 0,
      Self::StudentT { .. } => 2,
      _ => 1,
    }
  }

  /// Copula CDF C(u, v).
  pub fn cdf(&self, u: f64, v: f64) -> f64 {
    let u = clamp_unit(u);
    let v = clamp_unit(v);
    match *self {
      Self::Independence => u * v,
      Self::Gaussian { rho } => gaussian_pair_cdf(u, v, rho),
      Self::StudentT { rho, df } => student_pair_cdf(u, v, rho, df),
      Self::Clayton { theta } => (u.powf(-theta) + v.powf(-theta) - 1.0)
        .max(0.0)
        .powf(-1.0 / theta),
      Self::Gumbel { theta } => {
        let s = (-u.ln()).powf(theta) + (-v.ln()).powf(theta);
        (-s.powf(1.0 / theta)).exp()
      }
      Self::Frank { theta } => {
        let g1 = (-theta).exp_m1();
        let gu = (-theta * u).exp_m1();
        let gv = (-theta * v).exp_m1();
        -(1.0 + gu * gv / g1).ln() / theta
      }
      Self::Joe { theta } => {
        let xb = (1.0 - u).powf(theta);
        let yb = (1.0 - v).powf(theta);
        1.0 - (xb + yb - xb * yb).powf(1.0 / theta)
      }
    }
  }

  /// Copula density c(u, v).
  pub fn pdf(&self, u: f64, v: f64) -> f64 {
    self.log_pdf(u, v).exp()
  }

  /// Log-density, the per-observation contribution to the log-likelihood.
  pub fn log_pdf(&self, u: f64, v: f64) -> f64 {
    let u = clamp_unit(u);
    let v = clamp_unit(v);
    match *self {
      Self::Independence => 0.0,
      Self::Gaussian { rho } => {
        let norm = std_normal();
        let x = norm.inverse_cdf(u);
        let y = norm.inverse_cdf(v);
        let r2 = 1.0 - rho * rho;
        -0.5 * r2.ln() - (rho * rho * (x * x + y * y) - 2.0 * rho * x * y) / (2.0 * r2)
      }
      Self::StudentT { rho, df } => {
        let t = student_t(df);
        let x = t.inverse_cdf(u);
        let y = t.inverse_cdf(v);
        let r2 = 1.0 - rho * rho;
        ln_gamma((df + 2.0) / 2.0) + ln_gamma(df / 2.0)
          - 2.0 * ln_gamma((df + 1.0) / 2.0)
          - 0.5 * r2.ln()
          - (df + 2.0) / 2.0 * (1.0 + (x * x - 2.0 * rho * x * y + y * y) / (df * r2)).ln()
          + (df + 1.0) / 2.0 * ((1.0 + x * x / df).ln() + (1.0 + y * y / df).ln())
      }
      Self::Clayton { theta } => {
        (1.0 + theta).ln() - (1.0 + theta) * (u.ln() + v.ln())
          - (2.0 + 1.0 / theta) * (u.powf(-theta) + v.powf(-theta) - 1.0).ln()
      }
      Self::Gumbel { theta } => {
        let x = -u.ln();
        let y = -v.ln();
        let s = x.powf(theta) + y.powf(theta);
        let root = s.powf(1.0 / theta);
        -root + x + y + (2.0 / theta - 2.0) * s.ln()
          + (theta - 1.0) * (x * y).ln()
          + (1.0 + (theta - 1.0) / root).ln()
      }
      Self::Frank { theta } => {
        let g1 = (-theta).exp_m1();
        let gu = (-theta * u).exp_m1();
        let gv = (-theta * v).exp_m1();
        let c = -theta * g1 * (-theta * (u + v)).exp() / (g1 + gu * gv).powi(2);
        c.max(EPS).ln()
      }
      Self::Joe { theta } => {
        let xb = (1.0 - u).powf(theta);
        let yb = (1.0 - v).powf(theta);
        let a = xb + yb - xb * yb;
        (1.0 / theta - 2.0) * a.ln()
          + (theta - 1.0) * ((1.0 - u).ln() + (1.0 - v).ln())
          + (theta - 1.0 + a).ln()
      }
    }
  }

  /// Conditional CDF of `u` given `v`, the h-function of the pair copula.
  pub fn h(&self, u: f64, v: f64) -> f64 {
    let u = clamp_unit(u);
    let v = clamp_unit(v);
    let out = match *self {
      Self::Independence => u,
      Self::Gaussian { rho } => {
        let norm = std_normal();
        let x = norm.inverse_cdf(u);
        let y = norm.inverse_cdf(v);
        norm.cdf((x - rho * y) / (1.0 - rho * rho).sqrt())
      }
      Self::StudentT { rho, df } => {
        let t = student_t(df);
        let x = t.inverse_cdf(u);
        let y = t.inverse_cdf(v);
        let scale = ((df + y * y) * (1.0 - rho * rho) / (df + 1.0)).sqrt();
        student_t(df + 1.0).cdf((x - rho * y) / scale)
      }
      Self::Clayton { theta } => {
        v.powf(-theta - 1.0) * (u.powf(-theta) + v.powf(-theta) - 1.0).powf(-1.0 / theta - 1.0)
      }
      Self::Gumbel { theta } => {
        let x = -u.ln();
        let y = -v.ln();
        let s = x.powf(theta) + y.powf(theta);
        (-s.powf(1.0 / theta)).exp() / v * y.powf(theta - 1.0) * s.powf(1.0 / theta - 1.0)
      }
      Self::Frank { theta } => {
        let g1 = (-theta).exp_m1();
        let gu = (-theta * u).exp_m1();
        let gv = (-theta * v).exp_m1();
        (-theta * v).exp() * gu / (g1 + gu * gv)
      }
      Self::Joe { theta } => {
        let xb = (1.0 - u).powf(theta);
        let yb = (1.0 - v).powf(theta);
        let a = xb + yb - xb * yb;
        a.powf(1.0 / theta - 1.0) * (1.0 - xb) * (1.0 - v).powf(theta - 1.0)
      }
    };
    clamp_unit(out)
  }

  /// Inverse of the h-function in its first argument: solves
  /// h(u | v) = w for u. Closed form where available, Brent otherwise.
  pub fn h_inv(&self, w: f64, v: f64) -> f64 {
    let w = clamp_unit(w);
    let v = clamp_unit(v);
    let out = match *self {
      Self::Independence => w,
      Self::Gaussian { rho } => {
        let norm = std_normal();
        let y = norm.inverse_cdf(v);
        norm.cdf(norm.inverse_cdf(w) * (1.0 - rho * rho).sqrt() + rho * y)
      }
      Self::StudentT { rho, df } => {
        let t = student_t(df);
        let y = t.inverse_cdf(v);
        let scale = ((df + y * y) * (1.0 - rho * rho) / (df + 1.0)).sqrt();
        t.cdf(student_t(df + 1.0).inverse_cdf(w) * scale + rho * y)
      }
      Self::Clayton { theta } => {
        let a = (w * v.powf(theta + 1.0)).powf(-theta / (theta + 1.0));
        (a + 1.0 - v.powf(-theta)).powf(-1.0 / theta)
      }
      Self::Frank { theta } => {
        let g1 = (-theta).exp_m1();
        let gv = (-theta * v).exp_m1();
        let gu = w * g1 / ((-theta * v).exp() - w * gv);
        -gu.ln_1p() / theta
      }
      Self::Gumbel { .. } | Self::Joe { .. } => self.h_inv_brent(w, v),
    };
    clamp_unit(out)
  }

  fn h_inv_brent(&self, w: f64, v: f64) -> f64 {
    let f = |u: f64| self.h(u, v) - w;
    let mut convergency = SimpleConvergency {
      eps: 1e-10,
      max_iter: 100,
    };
    match find_root_brent(EPS, 1.0 - EPS, f, &mut convergency) {
      Ok(u) => u,
      Err(e) => {
        debug!(?e, w, v, "h-function inversion failed, falling back to the raw probability");
        w
      }
    }
  }

  /// Log-likelihood of the copula on paired pseudo-observations.
  pub fn log_likelihood(&self, x: &Array1<f64>, y: &Array1<f64>) -> f64 {
    x.iter()
      .zip(y.iter())
      .map(|(&u, &v)| self.log_pdf(u, v))
      .sum()
  }
}

fn gaussian_pair_cdf(u: f64, v: f64, rho: f64) -> f64 {
  let norm = std_normal();
  let x = norm.inverse_cdf(u);
  let y = norm.inverse_cdf(v);
  bivariate_normal_cdf(x, y, rho)
}

/// Student-t copula CDF via Gauss-Legendre quadrature of its conditional
/// CDF, C(u, v) = \int_0^v F(u | t) dt.
fn student_pair_cdf(u: f64, v: f64, rho: f64, df: f64) -> f64 {
  let copula = PairCopula::StudentT { rho, df };
  let quad = GaussLegendre::new(64).expect("quadrature order is valid");
  quad.integrate(0.0, v, |t| copula.h(u, t)).clamp(0.0, 1.0)
}

/// Bivariate standard normal CDF via Gauss-Legendre quadrature of
/// Phi(x) * phi integrand reduction (Drezner-Wesolowsky style).
fn bivariate_normal_cdf(x: f64, y: f64, rho: f64) -> f64 {
  let norm = std_normal();
  if rho.abs() < EPS {
    return norm.cdf(x) * norm.cdf(y);
  }
  let quad = GaussLegendre::new(32).expect("quadrature order is valid");
  let integral = quad.integrate(0.0, rho, |r| {
    let r2 = 1.0 - r * r;
    (-(x * x - 2.0 * r * x * y + y * y) / (2.0 * r2)).exp() / r2.sqrt()
  });
  norm.cdf(x) * norm.cdf(y) + integral / (2.0 * std::f64::consts::PI)
}

/// tau(theta) for the Frank copula, via the first Debye function.
fn frank_tau(theta: f64) -> f64 {
  let quad = GaussLegendre::new(32).expect("quadrature order is valid");
  let integral = quad.integrate(0.0, theta, |t| {
    if t.abs() < 1e-12 {
      1.0
    } else {
      t / t.exp_m1()
    }
  });
  1.0 - 4.0 / theta * (1.0 - integral / theta)
}

/// tau(theta) for the Joe copula, via its Archimedean generator.
fn joe_tau(theta: f64) -> f64 {
  let quad = GaussLegendre::new(64).expect("quadrature order is valid");
  let integral = quad.integrate(0.0, 1.0, |t| {
    let s = 1.0 - (1.0 - t).powf(theta);
    if s <= 0.0 || s >= 1.0 {
      0.0
    } else {
      s * s.ln() / (theta * (1.0 - t).powf(theta - 1.0))
    }
  });
  1.0 + 4.0 * integral
}

fn invert_tau<F>(tau_of_theta: F, target: f64, lo: f64, hi: f64) -> Result<f64>
where
  F: Fn(f64) -> f64,
{
  if target <= tau_of_theta(lo) {
    return Ok(lo);
  }
  if target >= tau_of_theta(hi) {
    return Ok(hi);
  }
  let f = |theta: f64| tau_of_theta(theta) - target;
  let mut convergency = SimpleConvergency {
    eps: 1e-9,
    max_iter: 200,
  };
  find_root_brent(lo, hi, f, &mut convergency)
    .map_err(|e| VineError::Fitting(format!("tau inversion did not converge: {}", e)))
}

/// Moment-based estimation of a single family from the sample tau, with the
/// Student-t degrees of freedom profiled over [`DF_GRID`] by likelihood.
///
/// Returns `Fitting` when the family cannot represent the observed
/// dependence (e.g. Clayton with non-positive tau).
pub fn fit_family(
  family: CopulaFamily,
  x: &Array1<f64>,
  y: &Array1<f64>,
  tau: f64,
) -> Result<PairCopula> {
  if !(-1.0 + EPS..1.0 - EPS).contains(&tau) {
    return Err(VineError::Fitting(format!(
      "tau {} is outside the open interval (-1, 1)",
      tau
    )));
  }

  match family {
    CopulaFamily::Gaussian => {
      let rho = (std::f64::consts::FRAC_PI_2 * tau).sin().clamp(-RHO_BOUND, RHO_BOUND);
      Ok(PairCopula::Gaussian { rho })
    }
    CopulaFamily::StudentT => {
      let rho = (std::f64::consts::FRAC_PI_2 * tau).sin().clamp(-RHO_BOUND, RHO_BOUND);
      let mut best = (f64::NEG_INFINITY, DF_GRID[0]);
      for &df in DF_GRID.iter() {
        let ll = PairCopula::StudentT { rho, df }.log_likelihood(x, y);
        if ll.is_finite() && ll > best.0 {
          best = (ll, df);
        }
      }
      if !best.0.is_finite() {
        return Err(VineError::Fitting(
          "student-t profile likelihood is degenerate".into(),
        ));
      }
      Ok(PairCopula::StudentT { rho, df: best.1 })
    }
    CopulaFamily::Clayton => {
      if tau <= 1e-5 {
        return Err(VineError::Fitting(
          "clayton requires positive dependence".into(),
        ));
      }
      Ok(PairCopula::Clayton {
        theta: (2.0 * tau / (1.0 - tau)).min(THETA_MAX),
      })
    }
    CopulaFamily::Gumbel => {
      if tau <= 1e-5 {
        return Err(VineError::Fitting(
          "gumbel requires positive dependence".into(),
        ));
      }
      Ok(PairCopula::Gumbel {
        theta: (1.0 / (1.0 - tau)).min(THETA_MAX),
      })
    }
    CopulaFamily::Frank => {
      if tau.abs() <= 1e-5 {
        return Err(VineError::Fitting(
          "frank is unidentified at tau = 0".into(),
        ));
      }
      let theta = invert_tau(frank_tau, tau.abs(), 1e-3, THETA_MAX)?;
      Ok(PairCopula::Frank {
        theta: theta.copysign(tau),
      })
    }
    CopulaFamily::Joe => {
      if tau <= 1e-5 {
        return Err(VineError::Fitting(
          "joe requires positive dependence".into(),
        ));
      }
      let theta = invert_tau(joe_tau, tau, 1.0 + 1e-6, THETA_MAX)?;
      Ok(PairCopula::Joe { theta })
    }
  }
}

/// Selects the best family for a pair of pseudo-observation columns by AIC
/// over the admissible members of `families`.
pub fn select_pair_copula(
  families: &[CopulaFamily],
  x: &Array1<f64>,
  y: &Array1<f64>,
  tau: f64,
) -> Result<PairCopula> {
  let mut best: Option<(f64, PairCopula)> = None;

  for &family in families {
    let Ok(copula) = fit_family(family, x, y, tau) else {
      continue;
    };
    let ll = copula.log_likelihood(x, y);
    if !ll.is_finite() {
      continue;
    }
    let aic = 2.0 * copula.param_count() as f64 - 2.0 * ll;
    if best.is_none() || aic < best.as_ref().unwrap().0 {
      best = Some((aic, copula));
    }
  }

  best.map(|(_, c)| c).ok_or_else(|| {
    VineError::Fitting(format!(
      "no admissible copula family for edge with tau = {:.4}",
      tau
    ))
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use approx::assert_relative_eq;
  use ndarray::Array1;
  use rand::rngs::StdRng;
  use rand::Rng;
  use rand::SeedableRng;
  use tracing_test::traced_test;

  use super::fit_family;
  use super::select_pair_copula;
  use super::CopulaFamily;
  use super::PairCopula;

  fn all_families() -> Vec<PairCopula> {
    vec![
      PairCopula::Gaussian { rho: 0.6 },
      PairCopula::StudentT { rho: 0.6, df: 5.0 },
      PairCopula::Clayton { theta: 2.0 },
      PairCopula::Gumbel { theta: 1.8 },
      PairCopula::Frank { theta: 4.0 },
      PairCopula::Joe { theta: 2.2 },
    ]
  }

  #[test]
  fn h_inverse_round_trips_for_every_family() {
    for copula in all_families() {
      for &v in &[0.15, 0.5, 0.85] {
        for &w in &[0.05, 0.3, 0.7, 0.95] {
          let u = copula.h_inv(w, v);
          assert_relative_eq!(copula.h(u, v), w, epsilon = 1e-6);
        }
      }
    }
  }

  #[test]
  fn h_is_monotone_in_first_argument() {
    for copula in all_families() {
      let v = 0.4;
      let mut prev = 0.0;
      for i in 1..40 {
        let u = i as f64 / 40.0;
        let h = copula.h(u, v);
        assert!(h >= prev, "{:?} not monotone at u = {}", copula, u);
        prev = h;
      }
    }
  }

  #[test]
  fn densities_are_positive_on_the_interior() {
    for copula in all_families() {
      for &u in &[0.1, 0.5, 0.9] {
        for &v in &[0.2, 0.6, 0.8] {
          assert!(copula.pdf(u, v) > 0.0);
        }
      }
    }
  }

  #[test]
  fn student_cdf_has_a_heavier_joint_tail_than_gaussian() {
    let t = PairCopula::StudentT { rho: 0.5, df: 3.0 };
    let g = PairCopula::Gaussian { rho: 0.5 };
    let tc = t.cdf(0.05, 0.05);
    let gc = g.cdf(0.05, 0.05);
    assert_abs_diff_eq!(tc, 0.018293, epsilon = 1e-3);
    assert_abs_diff_eq!(gc, 0.012189, epsilon = 1e-3);
    assert!(tc > gc);
  }

  #[test]
  fn student_cdf_recovers_its_margins() {
    let t = PairCopula::StudentT { rho: 0.5, df: 3.0 };
    assert_abs_diff_eq!(t.cdf(0.3, 1.0), 0.3, epsilon = 1e-3);
    assert_abs_diff_eq!(t.cdf(1.0, 0.7), 0.7, epsilon = 1e-3);
  }

  #[test]
  #[traced_test]
  fn brent_inversion_converges_without_fallback() {
    let copula = PairCopula::Joe { theta: 2.2 };
    let u = copula.h_inv(0.3, 0.6);
    assert_relative_eq!(copula.h(u, 0.6), 0.3, epsilon = 1e-6);
    assert!(!logs_contain("falling back to the raw probability"));
  }

  #[test]
  fn independence_density_is_one() {
    assert_abs_diff_eq!(PairCopula::Independence.pdf(0.3, 0.7), 1.0);
    assert_abs_diff_eq!(PairCopula::Independence.h(0.3, 0.7), 0.3, epsilon = 1e-9);
  }

  #[test]
  fn gaussian_tau_inversion_matches_sin_relation() {
    let x = Array1::from(vec![0.1, 0.2, 0.3, 0.4, 0.5]);
    let copula = fit_family(CopulaFamily::Gaussian, &x, &x, 0.5).unwrap();
    let PairCopula::Gaussian { rho } = copula else {
      panic!("expected gaussian");
    };
    assert_relative_eq!(rho, (std::f64::consts::FRAC_PI_2 * 0.5).sin(), epsilon = 1e-9);
  }

  #[test]
  fn gumbel_theta_matches_closed_form() {
    let x = Array1::from(vec![0.1, 0.2, 0.3]);
    let copula = fit_family(CopulaFamily::Gumbel, &x, &x, 0.5).unwrap();
    assert_eq!(copula, PairCopula::Gumbel { theta: 2.0 });
  }

  #[test]
  fn clayton_rejects_negative_dependence() {
    let x = Array1::from(vec![0.1, 0.2, 0.3]);
    assert!(fit_family(CopulaFamily::Clayton, &x, &x, -0.4).is_err());
    assert!(fit_family(CopulaFamily::Gumbel, &x, &x, -0.4).is_err());
    assert!(fit_family(CopulaFamily::Joe, &x, &x, -0.4).is_err());
  }

  #[test]
  fn frank_tau_inversion_is_consistent() {
    let x = Array1::from(vec![0.1, 0.2, 0.3]);
    let copula = fit_family(CopulaFamily::Frank, &x, &x, 0.4).unwrap();
    let PairCopula::Frank { theta } = copula else {
      panic!("expected frank");
    };
    assert_relative_eq!(super::frank_tau(theta), 0.4, epsilon = 1e-6);

    let negative = fit_family(CopulaFamily::Frank, &x, &x, -0.4).unwrap();
    let PairCopula::Frank { theta: neg } = negative else {
      panic!("expected frank");
    };
    assert_relative_eq!(neg, -theta, epsilon = 1e-9);
  }

  #[test]
  fn joe_tau_is_zero_at_theta_one() {
    assert_abs_diff_eq!(super::joe_tau(1.0), 0.0, epsilon = 1e-6);
    assert!(super::joe_tau(3.0) > 0.4);
  }

  #[test]
  fn selection_prefers_an_admissible_family_under_negative_tau() {
    // Clayton/Gumbel/Joe are inadmissible here; selection must fall back
    // to Gaussian or Frank rather than fail.
    let mut rng = StdRng::seed_from_u64(11);
    let g = PairCopula::Gaussian { rho: -0.7 };
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for _ in 0..300 {
      let v: f64 = rng.gen();
      let w: f64 = rng.gen();
      xs.push(g.h_inv(w, v));
      ys.push(v);
    }
    let x = Array1::from(xs);
    let y = Array1::from(ys);
    let tau = crate::copulas::correlation::kendall_tau(&x, &y).unwrap();
    assert!(tau < 0.0);
    let selected =
      select_pair_copula(&CopulaFamily::ALL, &x, &y, tau).unwrap();
    assert!(matches!(
      selected,
      PairCopula::Gaussian { .. } | PairCopula::StudentT { .. } | PairCopula::Frank { .. }
    ));
  }

  #[test]
  fn selection_with_no_admissible_family_is_a_fitting_error() {
    let x = Array1::from(vec![0.1, 0.2, 0.3]);
    let err = select_pair_copula(&[CopulaFamily::Clayton], &x, &x, -0.3);
    assert!(matches!(err, Err(crate::error::VineError::Fitting(_))));
  }
}
