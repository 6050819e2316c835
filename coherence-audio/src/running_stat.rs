/// Welford running mean and variance.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStat {
    n: usize,
    m: f64,
    s: f64,
}

impl RunningStat {
    pub fn new() -> Self {
        Self {
            n: 0,
            m: 0.0,
            s: 0.0,
        }
    }

    pub fn push(&mut self, x: f64) {
        self.n += 1;

        if self.n == 1 {
            self.m = x;
            self.s = 0.0;
        } else {
            let old_m = self.m;
            let old_s = self.s;
            self.m = old_m + (x - old_m) / (self.n as f64);
            self.s = old_s + (x - old_m) * (x - self.m);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn cur_mean(&self) -> f64 {
        if self.n > 0 {
            self.m
        } else {
            0.0
        }
    }

    /// Population variance.
    #[cfg(test)]
    pub fn cur_variance(&self) -> f64 {
        if self.n > 0 {
            self.s / self.n as f64
        } else {
            0.0
        }
    }

    /// Bessel-corrected standard deviation, zero with fewer than two samples.
    pub fn cur_stdev(&self) -> f64 {
        if self.n > 1 {
            (self.s / (self.n - 1) as f64).sqrt()
        } else {
            0.0
        }
    }
}
