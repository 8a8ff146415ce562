//! # Copulas
//!
//! $$
//! F_{X_1,\dots,X_d}(x)=C\left(F_1(x_1),\dots,F_d(x_d)\right)
//! $$
//!
pub mod bivariate;
pub mod correlation;
pub mod vine;
