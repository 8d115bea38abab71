//! Phase-scaled progress percentages
//!
//! Each phase owns a fixed slice of 0-100, so moving from one phase to the
//! next can never make the number go backwards.

/// A phase and its reserved percentage range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Download,
    Scan,
    Analysis,
}

impl Phase {
    /// Inclusive lower and upper bound of the phase's slice
    pub fn range(self) -> (f64, f64) {
        match self {
            Phase::Download => (0.0, 25.0),
            Phase::Scan => (25.0, 30.0),
            Phase::Analysis => (30.0, 100.0),
        }
    }

    /// Map `done / total` into the phase's slice. `total == 0` counts as done.
    pub fn scale(self, done: usize, total: usize) -> f64 {
        let fraction = if total == 0 {
            1.0
        } else {
            (done as f64 / total as f64).clamp(0.0, 1.0)
        };
        self.scale_fraction(fraction)
    }

    pub fn scale_fraction(self, fraction: f64) -> f64 {
        let (lo, hi) = self.range();
        let value = lo + (hi - lo) * fraction.clamp(0.0, 1.0);
        (value * 100.0).round() / 100.0
    }
}
