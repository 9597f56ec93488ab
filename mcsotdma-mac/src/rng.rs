use rand_core::RngCore;

/// A seedable pseudo-random number generator for deterministic runs.
///
/// Slot selection draws uniformly from candidate sets; seeding every node's
/// `Prng` makes a whole simulation reproducible.
pub struct Prng(fastrand::Rng);

impl Prng {
    pub fn new(seed: u64) -> Self {
        Self(fastrand::Rng::with_seed(seed))
    }
}

impl RngCore for Prng {
    fn next_u32(&mut self) -> u32 {
        self.0.u32(..)
    }

    fn next_u64(&mut self) -> u64 {
        self.0.u64(..)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.0.fill(dest);
        Ok(())
    }
}

/// Draws a uniform index into `0..len` without modulo bias mattering at the
/// sizes used here (candidate sets are tiny).
pub(crate) fn index<RNG: RngCore>(rng: &mut RNG, len: usize) -> usize {
    debug_assert!(len > 0);
    (rng.next_u32() as usize) % len
}
