//! Randomness abstraction.
//!
//! RULE: Nothing in the engine calls a platform RNG directly. The
//! context-hash nonce and the anti-correlation jitter both draw from an
//! injected Entropy source, so tests can fix the seed and get a
//! reproducible hash and a zero-length (or known-length) delay.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::sync::Mutex;

pub trait Entropy: Send + Sync {
    /// Draw a raw u64 (full range).
    fn next_u64(&self) -> u64;

    /// Fresh 16-byte nonce for context-hash derivation.
    fn nonce(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.next_u64().to_le_bytes());
        out[8..].copy_from_slice(&self.next_u64().to_le_bytes());
        out
    }

    /// Uniform draw in [lo, hi], used for the context-switch stall.
    fn jitter_ms(&self, lo: u64, hi: u64) -> u64 {
        if hi <= lo {
            return lo;
        }
        lo + self.next_u64() % (hi - lo + 1)
    }
}

/// PCG stream behind a lock. Seed from the OS in production, from a
/// fixed value in tests.
pub struct SeededEntropy {
    inner: Mutex<Pcg64Mcg>,
}

impl SeededEntropy {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            inner: Mutex::new(Pcg64Mcg::seed_from_u64(seed)),
        }
    }

    pub fn from_os() -> Self {
        Self::from_seed(rand::rngs::OsRng.next_u64())
    }
}

impl Entropy for SeededEntropy {
    fn next_u64(&self) -> u64 {
        self.inner.lock().unwrap().next_u64()
    }
}
