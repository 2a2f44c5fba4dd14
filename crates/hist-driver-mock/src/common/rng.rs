//! Seeded RNG wrapper for reproducible behavior.
//!
//! Provides a thread-safe, seeded random number generator shared by the
//! synthetic waveform generator and fault injection, so a test that fixes
//! the seed sees the same data and the same failures on every run.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seeded RNG wrapper for reproducible random behavior
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// Create a new RNG with optional seed.
    /// If seed is None, uses a random seed from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// Whether an operation should fail at the given rate (0.0 to 1.0).
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.next_f64() < rate
    }

    /// Random f64 in `[0.0, 1.0)`.
    pub fn next_f64(&self) -> f64 {
        self.inner.lock().r#gen()
    }

    /// Random f64 in `[-spread, spread)`; `0.0` when `spread` is not positive.
    pub fn jitter(&self, spread: f64) -> f64 {
        if spread <= 0.0 {
            return 0.0;
        }
        self.inner.lock().gen_range(-spread..spread)
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng")
            .field("inner", &"<Mutex<ChaCha8Rng>>")
            .finish()
    }
}
