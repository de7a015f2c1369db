//! Seedable action sampler cached by every worker.

use crate::core::Action;
use crate::spaces::SpaceSpec;
use crate::utils::rng::{rng_from_seed, RngStream};

/// An action space descriptor paired with its own RNG stream.
///
/// Seeding this only affects `sample`; it never touches the environment's
/// internal RNG.
#[derive(Clone, Debug)]
pub struct ActionSpace {
    spec: SpaceSpec,
    rng: RngStream,
}

impl ActionSpace {
    /// Wrap a descriptor with a sampler seeded from OS entropy.
    pub fn new(spec: SpaceSpec) -> Self {
        Self { spec, rng: rng_from_seed(rand::random()) }
    }

    pub fn spec(&self) -> &SpaceSpec { &self.spec }

    /// Reseed the sampler. `None` draws a fresh seed; the seed used is returned.
    pub fn seed(&mut self, seed: Option<u64>) -> Vec<u64> {
        let seed = seed.unwrap_or_else(rand::random);
        self.rng = rng_from_seed(seed);
        vec![seed]
    }

    pub fn sample(&mut self) -> Action { self.spec.sample(&mut self.rng) }

    pub fn contains(&self, action: &Action) -> bool { self.spec.contains(action) }
}
