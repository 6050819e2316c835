use std::ops::{Add, Div, Mul};

use num_complex::Complex;
use num_traits::Zero;

/// Running average that optionally forgets old values.
///
/// Every update scales the previous state by `1 - alpha`, so `alpha = 0` gives the plain
/// cumulative mean and `alpha` in `(0, 1]` an exponentially weighted mean with a memory of about
/// `1 / alpha` values.
#[derive(Debug, Clone, Copy)]
pub struct StreamingAccumulator<T> {
    sum: T,
    count: f64,
    alpha: f64,
}

pub type RealAccumulator = StreamingAccumulator<f64>;
pub type ComplexAccumulator = StreamingAccumulator<Complex<f64>>;

impl<T> StreamingAccumulator<T>
where
    T: Copy + Zero + Add<Output = T> + Mul<f64, Output = T> + Div<f64, Output = T>,
{
    pub fn new(alpha: f64) -> Self {
        debug_assert!(alpha >= 0.0 && alpha <= 1.0, "alpha must be within [0, 1]");
        Self {
            sum: T::zero(),
            count: 0.0,
            alpha,
        }
    }

    pub fn add_value(&mut self, x: T) {
        let keep = 1.0 - self.alpha;
        self.sum = x + self.sum * keep;
        self.count = 1.0 + keep * self.count;
    }

    pub fn average(&self) -> T {
        if self.count > 0.0 {
            self.sum / self.count
        } else {
            T::zero()
        }
    }

    /// Effective number of values; fractional once `alpha > 0`.
    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn reset(&mut self) {
        self.sum = T::zero();
        self.count = 0.0;
    }
}
