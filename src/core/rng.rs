//! Seat Shuffling
//!
//! Produces the one-time random seating order of a match. The random source is
//! injected: production matches draw from the operating system's CSPRNG, tests
//! substitute a seeded generator so orderings are reproducible.

use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};

/// Unbiased Fisher-Yates shuffler over an injected random source.
///
/// # Example
///
/// ```
/// use punter::core::rng::Shuffler;
///
/// let mut shuffler = Shuffler::seeded(7);
/// let mut seats = vec![0, 1, 2, 3];
/// shuffler.shuffle(&mut seats);
///
/// let mut sorted = seats.clone();
/// sorted.sort();
/// assert_eq!(sorted, vec![0, 1, 2, 3]);
/// ```
pub struct Shuffler {
    rng: Box<dyn RngCore + Send>,
}

impl Shuffler {
    /// Create a shuffler over an arbitrary random source.
    pub fn new(rng: Box<dyn RngCore + Send>) -> Self {
        Self { rng }
    }

    /// Shuffler backed by the operating system's CSPRNG.
    pub fn from_os() -> Self {
        Self::new(Box::new(OsRng))
    }

    /// Deterministic shuffler for tests and replays.
    pub fn seeded(seed: u64) -> Self {
        Self::new(Box::new(StdRng::seed_from_u64(seed)))
    }

    /// Shuffle a slice in place.
    ///
    /// For each position `i` in `0..n-1`, draws `j` uniformly from `[i, n-1]`
    /// and swaps. `gen_range` samples without modulo bias.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        let len = items.len();
        if len < 2 {
            return;
        }
        for i in 0..len - 1 {
            let j = self.rng.gen_range(i..len);
            items.swap(i, j);
        }
    }
}

impl Default for Shuffler {
    fn default() -> Self {
        Self::from_os()
    }
}

impl std::fmt::Debug for Shuffler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shuffler").finish_non_exhaustive()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shuffle_is_permutation() {
        let mut shuffler = Shuffler::from_os();

        for len in 0..12 {
            let mut items: Vec<usize> = (0..len).collect();
            shuffler.shuffle(&mut items);

            let mut sorted = items.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, (0..len).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_seeded_shuffle_determinism() {
        let mut a = Shuffler::seeded(1111);
        let mut b = Shuffler::seeded(1111);

        let mut arr1 = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let mut arr2 = arr1;

        a.shuffle(&mut arr1);
        b.shuffle(&mut arr2);

        assert_eq!(arr1, arr2);
    }

    #[test]
    fn test_single_element_untouched() {
        let mut shuffler = Shuffler::seeded(3);
        let mut one = ["only"];
        shuffler.shuffle(&mut one);
        assert_eq!(one, ["only"]);
    }

    #[test]
    fn test_position_distribution_roughly_uniform() {
        // 4 items, 24_000 runs: each item should land in each slot ~6000 times.
        const RUNS: usize = 24_000;
        let mut shuffler = Shuffler::seeded(42);
        let mut counts = [[0usize; 4]; 4];

        for _ in 0..RUNS {
            let mut items = [0usize, 1, 2, 3];
            shuffler.shuffle(&mut items);
            for (slot, item) in items.iter().enumerate() {
                counts[*item][slot] += 1;
            }
        }

        let expected = RUNS / 4;
        for row in &counts {
            for &count in row {
                let deviation = count.abs_diff(expected);
                assert!(deviation < expected / 10, "skewed slot count {count}");
            }
        }
    }
}
