//! # vinesim
//!
//! $$
//! c(u_1,\dots,u_d)=\prod_{t=1}^{d-1}\prod_{e\in T_t}c_e
//! $$
//!
//! Estimates the joint dependence structure of a multi-asset return series
//! with a vine copula, simulates synthetic return paths from the fitted
//! model and scores them against the empirical correlation structure.
//!
//! The pipeline: raw returns are rank-transformed to pseudo-observations
//! ([`margins::pseudo_observations`]), a vine is fitted
//! ([`copulas::vine::VineModel::fit`]), repeated sampling trials are
//! quantile-mapped back to the return scale and scored, and the best trial
//! is retained ([`simulation::run`]). Any risk-free or cash-like column is
//! expected to be filtered out by the caller before fitting.
pub mod copulas;
pub mod error;
pub mod margins;
pub mod portfolio;
pub mod simulation;

pub use error::Result;
pub use error::VineError;
