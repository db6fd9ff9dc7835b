// =============================================================================
// Entropy — uniform draws for the price simulation
// =============================================================================
//
// Production draws come from the OS CSPRNG. A draw that fails is replaced by a
// neutral 0.5 and logged; it never reaches the caller as an error, so a flaky
// entropy source can slow the random walk down but never stop a simulator.
// =============================================================================

use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::warn;

use crate::error::CoreError;

/// Value substituted for a failed draw.
pub const FALLBACK_UNIT: f64 = 0.5;

/// Bits of precision in a unit draw (mantissa width of an f64).
const UNIT_BITS: u32 = 53;

/// Uniform `[0, 1)` source over any `RngCore`.
pub struct Entropy<R = OsRng> {
    rng: R,
}

impl Entropy<OsRng> {
    pub fn os() -> Self {
        Self { rng: OsRng }
    }
}

impl Entropy<ChaCha8Rng> {
    /// Deterministic source, for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl<R: RngCore> Entropy<R> {
    #[cfg(test)]
    pub fn from_rng(rng: R) -> Self {
        Self { rng }
    }

    /// Next uniform value in `[0, 1)`, or [`FALLBACK_UNIT`] if the source
    /// fails.
    pub fn unit(&mut self) -> f64 {
        let mut buf = [0u8; 8];
        match self.rng.try_fill_bytes(&mut buf) {
            Ok(()) => {
                let bits = u64::from_le_bytes(buf) >> (64 - UNIT_BITS);
                bits as f64 / (1u64 << UNIT_BITS) as f64
            }
            Err(e) => {
                let err = CoreError::EntropyUnavailable(e.to_string());
                warn!(error = %err, fallback = FALLBACK_UNIT, "random draw failed, using fallback");
                FALLBACK_UNIT
            }
        }
    }

    /// Uniform value in `[lo, hi)`.
    pub fn between(&mut self, lo: f64, hi: f64) -> f64 {
        lo + self.unit() * (hi - lo)
    }
}
