//! Random source shared by the sampling sketches
//!
//! Every stochastic decision in the sketches draws exactly once from a
//! sketch-owned `SketchRng`, never from a global generator. Draw order is
//! fixed per operation and noted at each call site, so two sketches built
//! with the same seed and fed the same stream produce identical state.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Seedable uniform random source owned by a sketch
#[derive(Clone, Debug)]
pub struct SketchRng {
    rng: SmallRng,
    spare_gaussian: Option<f64>,
}

impl SketchRng {
    /// Creates a source seeded from the operating system
    pub fn new() -> Self {
        SketchRng {
            rng: SmallRng::from_os_rng(),
            spare_gaussian: None,
        }
    }

    /// Creates a source with a fixed seed for reproducible runs
    pub fn with_seed(seed: u64) -> Self {
        SketchRng {
            rng: SmallRng::seed_from_u64(seed),
            spare_gaussian: None,
        }
    }

    /// Uniform double in [0, 1)
    pub fn next_double(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// Uniform double in (0, 1)
    pub fn next_double_exclude_zero(&mut self) -> f64 {
        loop {
            let d = self.rng.random::<f64>();
            if d != 0.0 {
                return d;
            }
        }
    }

    /// Uniform integer in [0, n)
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    pub fn next_index(&mut self, n: u64) -> u64 {
        self.rng.random_range(0..n)
    }

    /// Standard normal deviate via Box-Muller; used only by tests
    pub fn next_gaussian(&mut self) -> f64 {
        if let Some(g) = self.spare_gaussian.take() {
            return g;
        }
        let u1 = self.next_double_exclude_zero();
        let u2 = self.next_double();
        let radius = (-2.0 * u1.ln()).sqrt();
        let angle = 2.0 * std::f64::consts::PI * u2;
        self.spare_gaussian = Some(radius * angle.sin());
        radius * angle.cos()
    }
}

impl Default for SketchRng {
    fn default() -> Self {
        Self::new()
    }
}
