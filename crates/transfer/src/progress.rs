use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default time window for speed calculation.
const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// Default number of retained samples.
const DEFAULT_MAX_SAMPLES: usize = 100;

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl std::fmt::Debug for SpeedCalculator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeedCalculator")
            .field("bytes_per_second", &self.bytes_per_second())
            .finish()
    }
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(DEFAULT_MAX_SAMPLES).max(2),
                window_size: window_size.unwrap_or(DEFAULT_WINDOW),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SpeedInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records `bytes` moved at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        self.add_sample_at(bytes, Instant::now());
    }

    fn add_sample_at(&self, bytes: u64, now: Instant) {
        let mut s = self.lock();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        // Prune samples outside the window.
        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window.
    ///
    /// Returns 0.0 with fewer than 2 samples. The first sample only marks
    /// the start of the window, so its bytes are not counted.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.lock();
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        if s.samples.len() < 2 {
            return 0.0;
        }

        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let moved: u64 = s.samples.iter().skip(1).map(|sample| sample.bytes).sum();
        moved as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to move `remaining_bytes`.
    ///
    /// Returns `None` while the speed is unknown.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(remaining_bytes as f64 / speed).ok()
    }

    pub fn reset(&self) {
        self.lock().samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn no_samples() {
        let calc = SpeedCalculator::default();
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(1000).is_none());
    }

    #[test]
    fn single_sample() {
        let calc = SpeedCalculator::default();
        calc.add_sample(100);
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn steady_rate() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(10)), None);
        let start = Instant::now();
        calc.add_sample_at(0, start);
        calc.add_sample_at(1000, start + Duration::from_millis(500));
        calc.add_sample_at(1000, start + Duration::from_secs(1));

        let speed = calc.bytes_per_second();
        assert!((speed - 2000.0).abs() < 1e-6, "speed = {speed}");

        let eta = calc.eta(4000).unwrap();
        assert!((eta.as_secs_f64() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn old_samples_leave_window() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(1)), None);
        let start = Instant::now();
        calc.add_sample_at(1_000_000, start);
        calc.add_sample_at(10, start + Duration::from_secs(5));
        // Only the latest sample remains in the window.
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn reset_clears_samples() {
        let calc = SpeedCalculator::default();
        calc.add_sample(100);
        calc.add_sample(200);
        calc.reset();
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn max_samples_bounded() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(60)), Some(5));
        for i in 0..20 {
            calc.add_sample(i * 10);
        }
        assert!(calc.lock().samples.len() <= 5);
    }

    #[test]
    fn concurrent_access() {
        let calc = Arc::new(SpeedCalculator::default());
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let c = Arc::clone(&calc);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        c.add_sample(1);
                        let _ = c.bytes_per_second();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        let _ = calc.bytes_per_second();
    }
}
