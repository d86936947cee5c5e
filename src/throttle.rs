use std::collections::VecDeque;
use std::thread;
use std::time::{Duration, Instant};

/// Paces outbound catalog requests: a minimum delay between consecutive
/// requests plus a rolling hourly budget kept safely below the API's hard
/// 1000/hour limit. Strictly sequential callers, so no locking.
#[derive(Debug)]
pub struct Throttle {
    request_delay: Duration,
    hourly_ceiling: usize,
    window: Duration,
    last_request: Option<Instant>,
    issued: VecDeque<Instant>,
}

impl Throttle {
    pub fn new(request_delay: Duration, hourly_ceiling: u32) -> Self {
        Self {
            request_delay,
            hourly_ceiling: hourly_ceiling as usize,
            window: Duration::from_secs(60 * 60),
            last_request: None,
            issued: VecDeque::new(),
        }
    }

    #[cfg(test)]
    fn with_window(request_delay: Duration, hourly_ceiling: u32, window: Duration) -> Self {
        Self {
            window,
            ..Self::new(request_delay, hourly_ceiling)
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.issued.front() {
            if now.duration_since(*front) >= self.window {
                self.issued.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long a request issued at `now` would have to wait. Pure decision,
    /// no sleeping, so the schedule is testable with constructed instants.
    pub fn wait_duration(&mut self, now: Instant) -> Duration {
        self.prune(now);

        let mut wait = Duration::ZERO;
        if let Some(last) = self.last_request {
            let since = now.saturating_duration_since(last);
            if since < self.request_delay {
                wait = self.request_delay - since;
            }
        }

        if self.issued.len() >= self.hourly_ceiling {
            if let Some(oldest) = self.issued.front() {
                let window_opens = (*oldest + self.window).saturating_duration_since(now);
                wait = wait.max(window_opens);
            }
        }

        wait
    }

    /// Marks a request as issued at `now`.
    pub fn record(&mut self, now: Instant) {
        self.last_request = Some(now);
        self.issued.push_back(now);
    }

    pub fn requests_in_window(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.issued.len()
    }

    /// Blocks until the next request is admissible, records it, and returns
    /// the time actually spent waiting.
    pub fn wait_if_needed(&mut self) -> Duration {
        let wait = self.wait_duration(Instant::now());
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        self.record(Instant::now());
        wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_is_immediate() {
        let mut throttle = Throttle::new(Duration::from_millis(1500), 800);
        assert_eq!(throttle.wait_duration(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn enforces_minimum_delay_between_requests() {
        let mut throttle = Throttle::new(Duration::from_millis(1500), 800);
        let base = Instant::now();
        throttle.record(base);

        let wait = throttle.wait_duration(base + Duration::from_millis(500));
        assert_eq!(wait, Duration::from_millis(1000));

        let wait = throttle.wait_duration(base + Duration::from_millis(1500));
        assert_eq!(wait, Duration::ZERO);
    }

    #[test]
    fn blocks_when_window_budget_is_spent() {
        let window = Duration::from_secs(60);
        let mut throttle = Throttle::with_window(Duration::ZERO, 2, window);
        let base = Instant::now();
        throttle.record(base);
        throttle.record(base + Duration::from_secs(1));

        // Budget exhausted: must wait until the oldest request leaves the window.
        let now = base + Duration::from_secs(2);
        assert_eq!(throttle.wait_duration(now), Duration::from_secs(58));
        assert_eq!(throttle.requests_in_window(now), 2);

        // Once the window has rolled past the oldest request, a slot opens.
        let later = base + window + Duration::from_secs(1);
        assert_eq!(throttle.wait_duration(later), Duration::ZERO);
        assert_eq!(throttle.requests_in_window(later), 1);
    }

    #[test]
    fn window_wait_dominates_request_delay() {
        let window = Duration::from_secs(60);
        let mut throttle = Throttle::with_window(Duration::from_secs(5), 1, window);
        let base = Instant::now();
        throttle.record(base);

        let wait = throttle.wait_duration(base + Duration::from_secs(1));
        assert_eq!(wait, Duration::from_secs(59));
    }
}
