//! Time-lock style puzzle of the low-level handshake.
//!
//! The server picks `x` and `n` as independent random 512-bit values and a difficulty
//! `level`; the client answers with `y = x^(2^level) mod n`. `n` is plain randomness, not
//! a structured modulus, so the server pays the same O(level) squarings to check a proof
//! that the client paid to compute it.

use crate::core::init::PUZZLE_INT_LEN;
use crate::error::{constants, ProtocolError, Result};
use num_bigint::BigUint;
use num_traits::Zero;
use rand_core::{OsRng, RngCore};

/// Difficulty used when none is configured.
pub const DEFAULT_LEVEL: u32 = 10_000;

/// A puzzle issued to one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuzzleChallenge {
    pub x: [u8; PUZZLE_INT_LEN],
    pub n: [u8; PUZZLE_INT_LEN],
    pub level: u32,
}

/// The client's claimed solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PuzzleProof {
    pub y: [u8; PUZZLE_INT_LEN],
}

impl PuzzleChallenge {
    /// Draw fresh `x` and `n` from the OS RNG.
    pub fn generate(level: u32) -> Self {
        let mut x = [0u8; PUZZLE_INT_LEN];
        let mut n = [0u8; PUZZLE_INT_LEN];
        OsRng.fill_bytes(&mut x);
        OsRng.fill_bytes(&mut n);
        // A zero modulus would make every proof unverifiable.
        if n.iter().all(|b| *b == 0) {
            n[PUZZLE_INT_LEN - 1] = 1;
        }
        Self { x, n, level }
    }

    /// True when the echoed fields are exactly the ones this challenge issued.
    pub fn matches(&self, x: &[u8; PUZZLE_INT_LEN], n: &[u8; PUZZLE_INT_LEN], level: u32) -> bool {
        self.x == *x && self.n == *n && self.level == level
    }

    pub fn solve(&self) -> Result<PuzzleProof> {
        solve(&self.x, &self.n, self.level).map(|y| PuzzleProof { y })
    }

    pub fn verify(&self, proof: &PuzzleProof) -> bool {
        verify(&self.x, &self.n, self.level, &proof.y)
    }
}

fn exponentiate(x: &BigUint, n: &BigUint, level: u32) -> BigUint {
    let mut y = x % n;
    for _ in 0..level {
        y = (&y * &y) % n;
    }
    y
}

fn to_fixed(value: &BigUint) -> [u8; PUZZLE_INT_LEN] {
    let bytes = value.to_bytes_be();
    let mut out = [0u8; PUZZLE_INT_LEN];
    // value < n < 2^512, so it always fits
    let start = PUZZLE_INT_LEN.saturating_sub(bytes.len());
    out[start..].copy_from_slice(&bytes[bytes.len().saturating_sub(PUZZLE_INT_LEN)..]);
    out
}

/// Compute `x^(2^level) mod n`.
///
/// # Errors
/// Returns `ProtocolError::InvalidKey` if `n` is zero.
pub fn solve(
    x: &[u8; PUZZLE_INT_LEN],
    n: &[u8; PUZZLE_INT_LEN],
    level: u32,
) -> Result<[u8; PUZZLE_INT_LEN]> {
    let n = BigUint::from_bytes_be(n);
    if n.is_zero() {
        return Err(ProtocolError::InvalidKey(constants::ERR_ZERO_MODULUS.into()));
    }
    let x = BigUint::from_bytes_be(x);
    Ok(to_fixed(&exponentiate(&x, &n, level)))
}

/// Recompute the exponentiation and compare with the claimed `y`.
/// A zero modulus never verifies.
pub fn verify(
    x: &[u8; PUZZLE_INT_LEN],
    n: &[u8; PUZZLE_INT_LEN],
    level: u32,
    y: &[u8; PUZZLE_INT_LEN],
) -> bool {
    let n = BigUint::from_bytes_be(n);
    if n.is_zero() {
        return false;
    }
    let x = BigUint::from_bytes_be(x);
    exponentiate(&x, &n, level) == BigUint::from_bytes_be(y)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(value: u64) -> [u8; PUZZLE_INT_LEN] {
        let mut out = [0u8; PUZZLE_INT_LEN];
        out[PUZZLE_INT_LEN - 8..].copy_from_slice(&value.to_be_bytes());
        out
    }

    #[test]
    fn test_small_known_answer() {
        // 3^(2^3) = 6561, 6561 mod 1000 = 561
        assert_eq!(solve(&int(3), &int(1000), 3).unwrap(), int(561));
        assert!(verify(&int(3), &int(1000), 3, &int(561)));
        assert!(!verify(&int(3), &int(1000), 3, &int(562)));
    }

    #[test]
    fn test_level_zero_reduces_x() {
        assert_eq!(solve(&int(1234), &int(1000), 0).unwrap(), int(234));
    }

    #[test]
    fn test_zero_modulus() {
        assert!(matches!(
            solve(&int(3), &int(0), 4),
            Err(ProtocolError::InvalidKey(_))
        ));
        assert!(!verify(&int(3), &int(0), 4, &int(0)));
    }

    #[test]
    fn test_generated_challenge_round_trip() {
        let challenge = PuzzleChallenge::generate(32);
        let proof = challenge.solve().unwrap();
        assert!(challenge.verify(&proof));

        let mut forged = proof;
        forged.y[PUZZLE_INT_LEN - 1] ^= 0x01;
        assert!(!challenge.verify(&forged));
    }

    #[test]
    fn test_matches_requires_every_field() {
        let challenge = PuzzleChallenge::generate(8);
        assert!(challenge.matches(&challenge.x, &challenge.n, 8));
        assert!(!challenge.matches(&challenge.x, &challenge.n, 9));
        let mut other = challenge.x;
        other[0] ^= 0xFF;
        assert!(!challenge.matches(&other, &challenge.n, 8));
    }
}
