//! Splittable random stream handles.
//!
//! Every stochastic routine takes a [`Key`] by value. A key is never used for two
//! independent draws: callers [`Key::split`] it first and hand each child to a
//! single draw site. Child keys are derived with a SplitMix64 mix, so a root key
//! deterministically reproduces the whole tree of draws, and sibling keys feed
//! independent `StdRng` streams (which is what makes per-sample parallelism safe).

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

#[inline]
fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// A handle to an independent random stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key(u64);

impl Key {
    /// Root key from a user seed.
    pub fn new(seed: u64) -> Self {
        Key(mix64(seed.wrapping_add(GOLDEN_GAMMA)))
    }

    /// Split into two independent keys. The receiver must not be used afterwards.
    pub fn split(self) -> (Key, Key) {
        (self.fold_in(0), self.fold_in(1))
    }

    /// Split into `n` independent keys (one per sample, chain, ...).
    pub fn split_n(self, n: usize) -> Vec<Key> {
        (0..n as u64).map(|i| self.fold_in(i)).collect()
    }

    /// Derive a key from this one and an integer tag.
    pub fn fold_in(self, data: u64) -> Key {
        let a = mix64(self.0 ^ GOLDEN_GAMMA.wrapping_mul(data.wrapping_add(1)));
        Key(mix64(a.wrapping_add(GOLDEN_GAMMA)))
    }

    /// Materialise a generator for a single draw site.
    pub fn rng(self) -> StdRng {
        StdRng::seed_from_u64(self.0)
    }

    /// Raw 64-bit state (stable across platforms).
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl Default for Key {
    fn default() -> Self {
        Key::new(0)
    }
}
