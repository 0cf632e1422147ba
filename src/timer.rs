use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Cancellable poll timer used by the watch loops.
///
/// Replaces bare sleep-and-recheck: each loop iteration awaits [`tick`],
/// which resolves `true` on the next interval boundary and `false` once the
/// shutdown token fires, letting the loop drain without a stray sleep.
///
/// [`tick`]: PollTimer::tick
#[derive(Debug)]
pub struct PollTimer {
    interval: tokio::time::Interval,
    token: CancellationToken,
}

impl PollTimer {
    pub fn new(period: Duration, token: CancellationToken) -> Self {
        let mut interval = tokio::time::interval(period);
        // A slow iteration should not be followed by a burst of catch-up ticks.
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        Self { interval, token }
    }

    /// Waits for the next tick. Returns `false` when cancelled.
    pub async fn tick(&mut self) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = self.interval.tick() => true,
        }
    }
}

/// Capped exponential backoff for transient channel errors inside loops.
/// Waits are cancellable so shutdown is never delayed by a backoff sleep.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            current: Duration::from_secs(1),
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Sleeps for the current delay, then doubles it up to the cap.
    /// Returns `false` if cancelled mid-wait.
    pub async fn wait(&mut self, token: &CancellationToken) -> bool {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
