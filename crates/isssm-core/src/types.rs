//! Common data types for isssm

use serde::{Deserialize, Serialize};

/// Why a fixed-point iteration stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Relative sup-norm change of every tracked quantity fell below tolerance.
    Converged,
    /// A tracked quantity became NaN. The loop stops, but the result is not usable.
    NonFinite,
    /// `n_iter` iterations were spent without meeting the tolerance.
    IterationLimit,
}

impl Termination {
    /// Classify the state of an iteration given its convergence flags.
    pub fn from_flags(any_nan: bool, all_close: bool, limit_reached: bool) -> Option<Self> {
        if any_nan {
            Some(Termination::NonFinite)
        } else if all_close {
            Some(Termination::Converged)
        } else if limit_reached {
            Some(Termination::IterationLimit)
        } else {
            None
        }
    }
}

/// Iteration count and stop reason of a fixed-point procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationReport {
    /// Number of iterations actually performed.
    pub iterations: usize,
    /// Stop reason.
    pub termination: Termination,
}

impl IterationReport {
    /// `true` only for a genuine (finite) convergence.
    pub fn converged(&self) -> bool {
        self.termination == Termination::Converged
    }
}
