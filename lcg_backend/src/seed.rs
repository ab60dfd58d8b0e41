//! Sources of random seeds for stimulus segments.
//!
//! Stochastic segments (Ornstein-Uhlenbeck noise, Gaussian noise) carry a seed in their record.
//! When the caller leaves it unset, the [`StimulusEncoder`] draws one from the [`SeedSource`]
//! it was built with. Core serialization never touches global state: tests inject a
//! deterministic [`RngSeedSource`], while scripts usually hand the encoder a [`ProcessSeedSource`].
//!
//! ## Process-wide source
//!
//! [`ProcessSeedSource`] is a handle to a single generator shared by the whole process. It is
//! initially seeded from the wall clock. Scripts that need correlated stimuli seed it with a fixed
//! value via [`seed_process_source`], draw their shared seeds, and then call
//! [`reseed_process_source_from_time`] so that later unrelated draws differ across trials.
//!
//! ```
//! use lcg_backend::seed::*;
//!
//! seed_process_source(5061983);
//! let first = ProcessSeedSource.next_seed();
//! seed_process_source(5061983);
//! assert_eq!(first, ProcessSeedSource.next_seed());
//! reseed_process_source_from_time();
//! ```
//!
//! [`StimulusEncoder`]: crate::encoder::StimulusEncoder

use std::sync::OnceLock;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tracing::trace;

use crate::utils::wall_clock_seed;

/// Seeds are drawn uniformly in `[0, SEED_UPPER_BOUND)`.
pub const SEED_UPPER_BOUND: u64 = 50_000;

pub trait SeedSource {
    fn next_seed(&mut self) -> u64;
}

/// Seed source backed by an injected random number generator.
pub struct RngSeedSource<R: RngCore> {
    rng: R,
}

impl<R: RngCore> RngSeedSource<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl RngSeedSource<StdRng> {
    /// Deterministic source, mostly for tests and reproducible protocols.
    pub fn from_seed(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: RngCore> SeedSource for RngSeedSource<R> {
    fn next_seed(&mut self) -> u64 {
        self.rng.gen_range(0..SEED_UPPER_BOUND)
    }
}

static PROCESS_RNG: OnceLock<Mutex<StdRng>> = OnceLock::new();

fn process_rng() -> &'static Mutex<StdRng> {
    PROCESS_RNG.get_or_init(|| Mutex::new(StdRng::seed_from_u64(wall_clock_seed())))
}

/// Handle to the process-wide generator.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessSeedSource;

impl SeedSource for ProcessSeedSource {
    fn next_seed(&mut self) -> u64 {
        let seed = process_rng().lock().gen_range(0..SEED_UPPER_BOUND);
        trace!(seed, "drew seed from process-wide source");
        seed
    }
}

/// Makes subsequent draws from [`ProcessSeedSource`] deterministic.
pub fn seed_process_source(seed: u64) {
    *process_rng().lock() = StdRng::seed_from_u64(seed);
}

/// Seeds the process-wide generator with `seed` and draws `count` seeds from it, holding the
/// generator for the whole sequence so that concurrent draws cannot interleave.
pub fn seeded_process_draws(seed: u64, count: usize) -> Vec<u64> {
    let mut rng = process_rng().lock();
    *rng = StdRng::seed_from_u64(seed);
    (0..count).map(|_| rng.gen_range(0..SEED_UPPER_BOUND)).collect()
}

/// Re-seeds the process-wide generator from the wall clock and returns the seed used.
pub fn reseed_process_source_from_time() -> u64 {
    let seed = wall_clock_seed();
    seed_process_source(seed);
    seed
}
