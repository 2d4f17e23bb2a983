//! Simple random number generator for reproducible poisoning runs.
//!
//! Every source of randomness in the crate (weight initialization, random
//! PGD starts, subset sampling, synthetic data) goes through this xorshift
//! generator so that a fixed seed reproduces a run bit for bit.

/// Simple RNG for reproducibility.
///
/// Uses the xorshift algorithm for fast, deterministic random number generation.
#[derive(Debug, Clone)]
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    /// Create a new RNG with explicit seed (if zero, use a fixed value).
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 { 0x9e3779b97f4a7c15 } else { seed };
        Self { state }
    }

    /// Basic xorshift to generate u32.
    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x >> 32) as u32
    }

    /// Convert to [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        // 24 mantissa bits keep the result strictly below 1.0.
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }

    /// Convert to [0, 1) in double precision.
    pub fn next_f64(&mut self) -> f64 {
        self.next_u32() as f64 / (u32::MAX as f64 + 1.0)
    }

    /// Uniform sample in [low, high).
    pub fn gen_range_f32(&mut self, low: f32, high: f32) -> f32 {
        low + (high - low) * self.next_f32()
    }

    /// Uniform sample in [low, high) in double precision.
    pub fn gen_range_f64(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.next_f64()
    }

    /// Integer sample in [0, upper).
    pub fn gen_usize(&mut self, upper: usize) -> usize {
        if upper == 0 {
            0
        } else {
            (self.next_u32() as usize) % upper
        }
    }

    /// Fisher-Yates shuffle.
    pub fn shuffle<T>(&mut self, data: &mut [T]) {
        if data.len() <= 1 {
            return;
        }
        for i in (1..data.len()).rev() {
            let j = self.gen_usize(i + 1);
            data.swap(i, j);
        }
    }

    /// Draw `count` distinct elements of `pool` (order randomized).
    ///
    /// Returns the whole pool shuffled when `count >= pool.len()`.
    pub fn sample<T: Clone>(&mut self, pool: &[T], count: usize) -> Vec<T> {
        let mut picked = pool.to_vec();
        self.shuffle(&mut picked);
        picked.truncate(count.min(pool.len()));
        picked
    }
}
