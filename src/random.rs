//! Seeded random streams.
//!
//! Every stochastic component draws from a [`StdRng`] created here. Distinct
//! components of one run (tribes, mask selectors) get independent substreams
//! derived from the run seed with [`derive_seed`], so adding a tribe or a
//! rank never shifts the numbers another one sees.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Creates the deterministic generator for `seed`.
pub fn create_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Uses the given seed, or draws a fresh one.
pub fn resolve_seed(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(rand::random)
}

/// One round of the splitmix64 output function.
pub fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Derives a substream seed from `seed` and a path such as `[rank, tribe]`.
pub fn derive_seed(seed: u64, path: &[u64]) -> u64 {
    path.iter()
        .fold(splitmix64(seed), |acc, &p| splitmix64(acc ^ splitmix64(p)))
}
