//! Observation distributions for isssm.
//!
//! This crate hosts the scalar log-densities (and their derivatives in the
//! signal) of the observation families supported by partially Gaussian state
//! space models, plus implementations of
//! [`isssm_core::ObservationDistribution`] on top of them:
//! - [`GaussianObservation`]: `y ~ N(s, xi)`
//! - [`PoissonObservation`]: `y ~ Pois(exp(s))`
//! - [`NegativeBinomialObservation`]: `y ~ NB(mean = exp(s), size = xi)`

pub mod math;
pub mod neg_binomial;
pub mod normal;
pub mod observation;
pub mod poisson;

pub use observation::{GaussianObservation, NegativeBinomialObservation, PoissonObservation};
