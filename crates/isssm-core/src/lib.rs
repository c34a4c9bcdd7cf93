//! # isssm-core
//!
//! Shared building blocks for the isssm crates:
//! - [`Error`] / [`Result`]
//! - [`Key`]: explicit, splittable random stream handles
//! - [`ObservationDistribution`]: the observation-layer abstraction that
//!   distinguishes Gaussian from non-Gaussian state space models
//! - iteration bookkeeping shared by the fixed-point procedures

#![warn(missing_docs)]

pub mod error;
pub mod rng;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use rng::Key;
pub use traits::ObservationDistribution;
pub use types::{IterationReport, Termination};
