use crate::common::*;

/// Throughput of steps or messages, sampled at most once per period.
#[derive(Debug)]
pub struct RateCounter {
    count: f64,
    since: Instant,
    period: Duration,
}

impl RateCounter {
    pub fn new(period: Duration) -> Self {
        Self {
            count: 0.0,
            since: Instant::now(),
            period,
        }
    }

    pub fn per_second() -> Self {
        Self::new(Duration::from_secs(1))
    }

    pub fn add(&mut self, amount: f64) {
        self.count += amount;
    }

    /// The count per second since the last sample, or `None` within the period.
    pub fn rate(&mut self) -> Option<f64> {
        let elapsed = self.since.elapsed();
        if elapsed < self.period {
            return None;
        }
        let rate = self.count / elapsed.as_secs_f64();
        self.count = 0.0;
        self.since = Instant::now();
        Some(rate)
    }
}
