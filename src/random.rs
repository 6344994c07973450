//! Entropy for delay sampling and shared-memory names
//!
//! Delay sampling is the security-relevant consumer: if an observer could
//! reconstruct the RNG stream, the obfuscation delays would be invertible and
//! the whole exercise pointless. Everything therefore draws from the
//! operating system CSPRNG.
//!
//! The [`EntropySource`] trait exists so the scheduler and cursor cadence can
//! be driven by a scripted sequence in tests; production code always uses
//! [`OsEntropy`].

use rand::rngs::OsRng;
use rand::{Rng, RngCore};

/// Source of cryptographically strong randomness.
pub trait EntropySource {
    /// Fill `buf` with random bytes.
    fn fill_bytes(&mut self, buf: &mut [u8]);

    /// Uniform integer in `[lo, hi]`, inclusive on both ends.
    ///
    /// Callers must ensure `lo <= hi`.
    fn uniform(&mut self, lo: u64, hi: u64) -> u64;
}

/// Entropy from the operating system CSPRNG (`getrandom`).
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill_bytes(&mut self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }

    fn uniform(&mut self, lo: u64, hi: u64) -> u64 {
        debug_assert!(lo <= hi);
        OsRng.gen_range(lo..=hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_stays_in_range() {
        let mut entropy = OsEntropy;
        for _ in 0..1000 {
            let v = entropy.uniform(40, 100);
            assert!((40..=100).contains(&v));
        }
    }

    #[test]
    fn uniform_degenerate_range() {
        let mut entropy = OsEntropy;
        assert_eq!(entropy.uniform(7, 7), 7);
    }

    #[test]
    fn fill_bytes_fills() {
        let mut entropy = OsEntropy;
        let mut buf = [0u8; 64];
        entropy.fill_bytes(&mut buf);
        // 64 zero bytes from a CSPRNG is a 2^-512 event
        assert!(buf.iter().any(|&b| b != 0));
    }
}
