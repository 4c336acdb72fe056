//! Deterministic seed hierarchy for Monte Carlo trials.
//!
//! A master seed expands into one sub-seed per `(stream, trial)` pair via
//! BLAKE3, so a trial's seed does not depend on which thread runs it or in
//! what order trials are scheduled.

use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RngHierarchy {
    master_seed: u64,
}

impl RngHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Sub-seed for trial `trial` of the named stream (e.g. `"random"`).
    pub fn sub_seed(&self, stream: &str, trial: u64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(&(stream.len() as u64).to_le_bytes());
        hasher.update(stream.as_bytes());
        hasher.update(&trial.to_le_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    pub fn rng_for(&self, stream: &str, trial: u64) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(stream, trial))
    }
}
