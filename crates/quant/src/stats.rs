//! Statistical utilities used when fitting normalizers.

/// Running mean and variance using Welford's algorithm.
///
/// Lets a fit stream over millions of states without keeping them.
/// Non-finite observations are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one observation.
    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Population variance. `None` with fewer than 2 observations.
    pub fn variance(&self) -> Option<f64> {
        (self.count >= 2).then(|| self.m2 / self.count as f64)
    }

    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    pub fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats_population_moments() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut running = RunningStats::new();
        for v in values {
            running.push(v);
        }
        assert_eq!(running.count(), 8);
        // mean 5, squared deviations sum to 32 over 8 values
        assert!((running.mean().unwrap() - 5.0).abs() < 1e-12);
        assert!((running.variance().unwrap() - 4.0).abs() < 1e-12);
        assert!((running.std_dev().unwrap() - 2.0).abs() < 1e-12);
        assert_eq!(running.min(), Some(2.0));
        assert_eq!(running.max(), Some(9.0));
    }

    #[test]
    fn test_running_stats_ignores_non_finite() {
        let mut running = RunningStats::new();
        running.push(f64::NAN);
        running.push(f64::INFINITY);
        assert_eq!(running.count(), 0);
        assert_eq!(running.mean(), None);
        running.push(1.0);
        assert_eq!(running.variance(), None);
    }
}
