use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, UnitCircle};
use tumor_sim_common::Vec2;

/// The engine's only source of randomness.
///
/// Every stochastic rule draws from one `RandomSource` owned by the simulation,
/// in a fixed order, so a run is reproducible from its seed.
#[derive(Debug, Clone)]
pub struct RandomSource {
    rng: StdRng,
    seed: u64,
}

impl RandomSource {
    pub fn seeded(seed: u64) -> Self {
        RandomSource {
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    /// Draws a fresh seed from the OS so the run can still be replayed later.
    pub fn from_entropy() -> Self {
        let seed = StdRng::from_os_rng().random::<u64>();
        Self::seeded(seed)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Uniform real in `[0, 1)`.
    #[inline]
    pub fn uniform(&mut self) -> f32 {
        self.rng.random::<f32>()
    }

    /// Uniform integer in `0..n`. `n` must be non-zero.
    #[inline]
    pub fn below(&mut self, n: usize) -> usize {
        self.rng.random_range(0..n)
    }

    /// Bernoulli draw with success probability `p`.
    #[inline]
    pub fn chance(&mut self, p: f32) -> bool {
        self.uniform() < p
    }

    pub fn pick<T: Copy>(&mut self, items: &[T]) -> Option<T> {
        if items.is_empty() {
            None
        } else {
            Some(items[self.below(items.len())])
        }
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }

    /// Uniformly distributed unit vector.
    pub fn unit_circle(&mut self) -> Vec2 {
        let [x, y]: [f32; 2] = UnitCircle.sample(&mut self.rng);
        Vec2::new(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn same_seed_same_stream() {
        let mut a = RandomSource::seeded(42);
        let mut b = RandomSource::seeded(42);
        for _ in 0..100 {
            assert_eq!(a.uniform(), b.uniform());
            assert_eq!(a.below(17), b.below(17));
        }
        assert_eq!(a.seed(), 42);
    }

    #[test]
    fn draws_stay_in_range() {
        let mut rng = RandomSource::seeded(3);
        for _ in 0..1000 {
            let u = rng.uniform();
            assert!((0.0..1.0).contains(&u));
            assert!(rng.below(5) < 5);
        }
        assert!(!rng.chance(0.0));
        assert!(rng.chance(1.0));
        assert_eq!(rng.pick::<u8>(&[]), None);
        assert_eq!(rng.pick(&[9u8]), Some(9));
    }

    #[test]
    fn unit_circle_has_unit_length() {
        let mut rng = RandomSource::seeded(11);
        for _ in 0..50 {
            assert_abs_diff_eq!(rng.unit_circle().length(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut rng = RandomSource::seeded(5);
        let mut items: Vec<u32> = (0..20).collect();
        rng.shuffle(&mut items);
        let mut sorted = items.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }
}
