// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// O PEG - DETERMINISTIC RNG
//
// SHA3-256 in counter mode. Every validating node derives the same stream
// from the same seed parts, so sampling done with it is consensus-safe.
// No node-local entropy is ever mixed in.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use sha3::{Digest, Sha3_256};

/// Deterministic pseudo-random stream: block_i = SHA3(seed || i)
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    seed: [u8; 32],
    counter: u64,
    buffer: [u8; 32],
    offset: usize,
}

impl DeterministicRng {
    /// Seed from a domain separator plus length-prefixed parts.
    /// Length prefixes keep ("ab","c") and ("a","bc") distinct.
    pub fn from_parts(domain: &[u8], parts: &[&[u8]]) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(domain);
        for part in parts {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&hasher.finalize());
        Self::from_seed(seed)
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            seed,
            counter: 0,
            buffer: [0u8; 32],
            offset: 32,
        }
    }

    fn refill(&mut self) {
        let mut hasher = Sha3_256::new();
        hasher.update(self.seed);
        hasher.update(self.counter.to_le_bytes());
        self.buffer.copy_from_slice(&hasher.finalize());
        self.counter += 1;
        self.offset = 0;
    }

    pub fn next_u64(&mut self) -> u64 {
        if self.offset + 8 > self.buffer.len() {
            self.refill();
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.buffer[self.offset..self.offset + 8]);
        self.offset += 8;
        u64::from_le_bytes(bytes)
    }

    /// Uniform integer in [0, bound). Rejection sampling, no modulo bias.
    /// Returns 0 when bound is 0.
    pub fn below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        let zone = u64::MAX - (u64::MAX % bound);
        loop {
            let v = self.next_u64();
            if v < zone {
                return v % bound;
            }
        }
    }

    /// Fisher–Yates shuffle in place
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.below(i as u64 + 1) as usize;
            items.swap(i, j);
        }
    }
}
