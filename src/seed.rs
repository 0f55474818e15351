//! Per-connection seed derivation.
//!
//! With a server-level `--seed`, successive connections get successive,
//! deterministically-derived seeds so that "two runs producing frames with
//! identical ROI/depth/offset/state sequences yield byte-identical
//! payloads" holds per-connection (§8, property 5). Without a server seed,
//! each connection draws its own seed from OS entropy.

use rand::rngs::{OsRng, StdRng};
use rand::{Rng, SeedableRng};

pub enum SeedSource {
    Fixed(StdRng),
    Random,
}

impl SeedSource {
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(s) => SeedSource::Fixed(StdRng::seed_from_u64(s)),
            None => SeedSource::Random,
        }
    }

    pub fn next_seed(&mut self) -> u64 {
        match self {
            SeedSource::Fixed(rng) => rng.gen(),
            SeedSource::Random => OsRng.gen(),
        }
    }
}
