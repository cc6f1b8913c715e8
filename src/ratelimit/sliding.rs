//! Sliding-window limiter, generalized from the teacher's fixed-window-by-IP
//! `middleware/rate_limit.rs` into a true sliding window keyed by account.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub struct SlidingWindowLimiter {
    limit: u32,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

pub enum Admission {
    Admitted,
    Denied { retry_after: Duration },
}

impl SlidingWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(limit as usize)),
        }
    }

    /// Admits a request iff fewer than `limit` timestamps fall within the
    /// trailing `window`. Evicts expired timestamps in the same pass.
    pub fn check(&self) -> Admission {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock();
        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if (timestamps.len() as u32) < self.limit {
            timestamps.push_back(now);
            Admission::Admitted
        } else {
            let retry_after = timestamps
                .front()
                .map(|&oldest| (oldest + self.window).saturating_duration_since(now))
                .unwrap_or_default();
            Admission::Denied { retry_after }
        }
    }

    pub fn used(&self) -> u32 {
        self.timestamps.lock().len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_exactly_n_requests_then_denies_with_retry_after() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_millis(50));
        for _ in 0..3 {
            assert!(matches!(limiter.check(), Admission::Admitted));
        }
        match limiter.check() {
            Admission::Denied { retry_after } => assert!(retry_after <= Duration::from_millis(50)),
            Admission::Admitted => panic!("4th request should be denied"),
        }
    }

    #[test]
    fn admits_again_after_window_elapses() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_millis(20));
        assert!(matches!(limiter.check(), Admission::Admitted));
        assert!(matches!(limiter.check(), Admission::Denied { .. }));
        std::thread::sleep(Duration::from_millis(25));
        assert!(matches!(limiter.check(), Admission::Admitted));
    }
}
