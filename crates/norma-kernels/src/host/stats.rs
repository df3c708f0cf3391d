//! Row statistics: Welford accumulation and Chan's parallel merge.

/// Running count, mean and sum of squared deviations.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stats {
    pub count: usize,
    pub mean: f32,
    pub m2: f32,
}

impl Stats {
    pub fn new(count: usize, mean: f32, m2: f32) -> Self {
        Self { count, mean, m2 }
    }

    #[inline]
    pub fn push(&mut self, x: f32) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f32;
        self.m2 += delta * (x - self.mean);
    }

    /// Combine two disjoint partials.
    pub fn merge(self, other: Stats) -> Stats {
        if self.count == 0 {
            return other;
        }
        if other.count == 0 {
            return self;
        }
        let n_a = self.count as f32;
        let n_b = other.count as f32;
        let n = n_a + n_b;
        let delta = other.mean - self.mean;
        Stats {
            count: self.count + other.count,
            mean: self.mean + delta * (n_b / n),
            m2: self.m2 + other.m2 + delta * delta * (n_a * n_b / n),
        }
    }

    /// `1 / sqrt(var + eps)`, or `1 / sqrt(mean(x^2) + eps)` for RMS-norm.
    ///
    /// `inverse_cols` is the reciprocal of the full row length, so padding
    /// columns never contribute.
    pub fn rsigma(&self, inverse_cols: f32, epsilon: f32, rms: bool) -> f32 {
        let mut ms = self.m2 * inverse_cols + epsilon;
        if rms {
            ms += self.mean * self.mean;
        }
        1.0 / ms.sqrt()
    }
}
