// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Keyed `xoroshiro128+` streams for reproducible sampling.

/// Domain string for [`Prng::from_key`]. Changing it changes every cached
/// negative set, so it is versioned together with the artifact format.
pub const KEY_CONTEXT: &str = "tgb 2024-01 negative sampling stream v1";

/// Stateful `xoroshiro128+` pseudo-random number generator.
///
/// * Not cryptographically secure; use only for sampling.
/// * Matching seeds yield identical sequences on every supported platform.
/// * Sampling code never shares one generator across queries: each query
///   derives its own stream with [`Prng::from_key`], so results do not depend
///   on iteration order or worker count.
#[derive(Debug, Clone, Copy)]
pub struct Prng {
    state: [u64; 2],
}

impl Prng {
    /// Constructs a PRNG from two 64-bit seeds.
    pub fn from_seed(seed0: u64, seed1: u64) -> Self {
        let mut state = [seed0, seed1];
        if state[0] == 0 && state[1] == 0 {
            state[0] = 0x9e37_79b9_7f4a_7c15;
        }
        Self { state }
    }

    /// Constructs a PRNG from a single 64-bit seed via SplitMix64 expansion.
    pub fn from_seed_u64(seed: u64) -> Self {
        fn splitmix64(state: &mut u64) -> u64 {
            *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
            let mut z = *state;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            z ^ (z >> 31)
        }

        let mut sm_state = seed;
        Self::from_seed(splitmix64(&mut sm_state), splitmix64(&mut sm_state))
    }

    /// Constructs a PRNG whose state is a pure function of `material`.
    ///
    /// Both state lanes come from `BLAKE3::derive_key(KEY_CONTEXT, material)`,
    /// so nearby keys (e.g. consecutive timestamps) get unrelated streams.
    pub fn from_key(material: &[u8]) -> Self {
        let digest = blake3::derive_key(KEY_CONTEXT, material);
        let mut lane0 = [0u8; 8];
        let mut lane1 = [0u8; 8];
        lane0.copy_from_slice(&digest[0..8]);
        lane1.copy_from_slice(&digest[8..16]);
        Self::from_seed(u64::from_le_bytes(lane0), u64::from_le_bytes(lane1))
    }

    /// Returns the next raw 64-bit output.
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(55) ^ s1 ^ (s1 << 14);
        self.state[1] = s1.rotate_left(36);

        result
    }

    /// Returns an integer uniformly distributed in `[0, bound)`.
    ///
    /// Uses rejection sampling to avoid modulo bias. A `bound` of 0 or 1
    /// returns 0 without consuming the stream.
    pub fn next_below(&mut self, bound: u64) -> u64 {
        if bound <= 1 {
            return 0;
        }
        if bound.is_power_of_two() {
            return self.next_u64() & (bound - 1);
        }
        let zone = u64::MAX - u64::MAX % bound;
        loop {
            let candidate = self.next_u64();
            if candidate < zone {
                return candidate % bound;
            }
        }
    }

    /// Partial Fisher–Yates: after the call, `items[..k]` is a uniformly random
    /// `k`-subset of `items` in random order. `k` is clamped to `items.len()`.
    pub fn shuffle_prefix<T>(&mut self, items: &mut [T], k: usize) {
        let n = items.len();
        for i in 0..k.min(n) {
            let j = i + self.next_below((n - i) as u64) as usize;
            items.swap(i, j);
        }
    }
}
