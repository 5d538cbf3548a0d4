use std::time::Duration;
use tokio::time::Instant;

/// Display refresh clock
///
/// Each call waits for the next refresh boundary after "now", measured from
/// the clock's origin. Boundaries missed while a cycle was busy are skipped,
/// never queued.
#[derive(Debug, Clone)]
pub struct RefreshClock {
    origin: Instant,
    period: Duration,
}

impl RefreshClock {
    pub fn new(refresh_hz: u32) -> Self {
        Self::with_period(Duration::from_secs_f64(1.0 / refresh_hz.max(1) as f64))
    }

    pub fn with_period(period: Duration) -> Self {
        Self {
            origin: Instant::now(),
            period: period.max(Duration::from_micros(100)),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// The first refresh boundary strictly after `now`
    pub fn next_boundary(&self, now: Instant) -> Instant {
        let period = self.period.as_nanos();
        let elapsed = now.saturating_duration_since(self.origin).as_nanos();
        let ticks = elapsed / period + 1;
        self.origin + Duration::from_nanos((ticks * period) as u64)
    }

    /// Wait for the next display refresh
    pub async fn next_frame(&self) {
        tokio::time::sleep_until(self.next_boundary(Instant::now())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_boundaries_are_aligned() {
        let clock = RefreshClock::with_period(Duration::from_millis(10));
        let origin = Instant::now();

        assert_eq!(clock.next_boundary(origin), origin + Duration::from_millis(10));
        assert_eq!(
            clock.next_boundary(origin + Duration::from_millis(13)),
            origin + Duration::from_millis(20)
        );
        // Exactly on a boundary waits for the following one
        assert_eq!(
            clock.next_boundary(origin + Duration::from_millis(20)),
            origin + Duration::from_millis(30)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_refreshes_do_not_queue() {
        let clock = RefreshClock::with_period(Duration::from_millis(10));
        let origin = Instant::now();

        // A cycle that overran several refreshes
        tokio::time::advance(Duration::from_millis(47)).await;
        clock.next_frame().await;
        assert_eq!(Instant::now() - origin, Duration::from_millis(50));

        clock.next_frame().await;
        assert_eq!(Instant::now() - origin, Duration::from_millis(60));
    }

    #[test]
    fn test_refresh_rate_period() {
        let clock = RefreshClock::new(50);
        assert_eq!(clock.period(), Duration::from_millis(20));
    }
}
