// Seeded generator for random wander destinations.
//
// xoshiro256++ seeded through SplitMix64, integer-only, so a seed picks the
// same `RouteSearch::random_destination` target on every platform. The only
// draw the search needs is an unbiased index into its candidate list.
//
// See also: `search.rs`.

/// xoshiro256++ state, owned by whoever asks for random destinations.
#[derive(Clone, Debug)]
pub struct ScoutRng {
    s: [u64; 4],
}

impl ScoutRng {
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: std::array::from_fn(|_| splitmix64(&mut sm)),
        }
    }

    fn next_u64(&mut self) -> u64 {
        let [s0, s1, s2, s3] = self.s;
        let result = s0.wrapping_add(s3).rotate_left(23).wrapping_add(s0);
        let t = s1 << 17;
        let s2 = s2 ^ s0;
        let s3 = s3 ^ s1;
        self.s = [s0 ^ s3, s1 ^ s2, s2 ^ t, s3.rotate_left(45)];
        result
    }

    /// Uniform index in `[0, len)`, 0 for an empty range. Rejects the low
    /// tail of the u64 range so there is no modulo bias.
    pub fn index(&mut self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        let range = len as u64;
        let threshold = range.wrapping_neg() % range;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return (r % range) as usize;
            }
        }
    }
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
