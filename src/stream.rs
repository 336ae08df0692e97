//! Stream collaborators
//!
//! The orchestrator consumes items from a [`Stream`]: a stateful generator of
//! an exchangeable label sequence. The same instance is reused across the
//! warm-up, main, and evaluation phases, so its internal state carries over
//! between phases and is never reset mid-run.
use rand::rngs::StdRng;
use rand::Rng;

/// A stateful source of `u64` item labels.
pub trait Stream {
    /// Draw the next item. All randomness comes from the caller's generator,
    /// so runs with the same seed replay the same sequence.
    fn sample(&mut self, rng: &mut StdRng) -> u64;
}

/// Pitman-Yor label process: an exchangeable sequence with power-law tail
/// behavior controlled by the discount parameter. Label `k` is the `k`-th
/// distinct item to appear.
pub struct PitmanYorStream {
    strength: f64,
    discount: f64,
    /// Occurrence count per label seen so far.
    counts: Vec<u64>,
    total: u64,
}

impl PitmanYorStream {
    /// * `strength` - Concentration parameter, must be > -discount.
    /// * `discount` - Discount in [0, 1); 0 recovers the Dirichlet process.
    pub fn new(strength: f64, discount: f64) -> Self {
        assert!((0.0..1.0).contains(&discount), "discount must be in [0, 1)");
        assert!(strength > -discount, "strength must exceed -discount");
        PitmanYorStream {
            strength,
            discount,
            counts: Vec::new(),
            total: 0,
        }
    }

    /// Number of distinct labels emitted so far.
    pub fn n_distinct(&self) -> usize {
        self.counts.len()
    }
}

impl Stream for PitmanYorStream {
    fn sample(&mut self, rng: &mut StdRng) -> u64 {
        let n = self.total as f64;
        let k = self.counts.len() as f64;
        let p_new = (self.strength + self.discount * k) / (self.strength + n);
        self.total += 1;
        if self.counts.is_empty() || rng.gen::<f64>() < p_new {
            self.counts.push(1);
            return (self.counts.len() - 1) as u64;
        }
        // Existing label j is drawn with probability (n_j - discount) / Z.
        let z = n - self.discount * k;
        let mut u = rng.gen::<f64>() * z;
        for (j, c) in self.counts.iter_mut().enumerate() {
            let w = *c as f64 - self.discount;
            if u < w {
                *c += 1;
                return j as u64;
            }
            u -= w;
        }
        // Floating point slack lands on the last label.
        let j = self.counts.len() - 1;
        self.counts[j] += 1;
        j as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_deterministic_replay() {
        let mut rng_a = StdRng::seed_from_u64(2021);
        let mut rng_b = StdRng::seed_from_u64(2021);
        let mut stream_a = PitmanYorStream::new(5.0, 0.3);
        let mut stream_b = PitmanYorStream::new(5.0, 0.3);
        let a: Vec<u64> = (0..500).map(|_| stream_a.sample(&mut rng_a)).collect();
        let b: Vec<u64> = (0..500).map(|_| stream_b.sample(&mut rng_b)).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_labels_are_contiguous() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut stream = PitmanYorStream::new(2.0, 0.1);
        let draws: Vec<u64> = (0..1000).map(|_| stream.sample(&mut rng)).collect();
        let max_label = *draws.iter().max().unwrap();
        assert_eq!(stream.n_distinct() as u64, max_label + 1);
        // Every label below the max has appeared.
        for label in 0..=max_label {
            assert!(draws.contains(&label));
        }
    }

    #[test]
    fn test_rich_get_richer() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut stream = PitmanYorStream::new(1.0, 0.2);
        for _ in 0..5000 {
            stream.sample(&mut rng);
        }
        // Early labels dominate an exchangeable urn.
        assert!(stream.counts[0] > stream.counts[stream.counts.len() - 1]);
        assert!(stream.n_distinct() < 2500);
    }
}
