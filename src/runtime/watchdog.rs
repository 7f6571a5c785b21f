//! Heartbeat watchdog
//!
//! Consumer side of the liveness pulse. Feed it every heartbeat; when no
//! heartbeat arrived for longer than the timeout the evaluation task is
//! considered wedged.

use std::time::Duration;

use tokio::time::Instant;

use crate::core::EngineConfig;

use super::engine::EngineEvent;

#[derive(Debug, Clone)]
pub struct Watchdog {
    timeout: Duration,
    last_beat: Instant,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_beat: Instant::now(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.watchdog_timeout())
    }

    /// Record a heartbeat
    pub fn feed(&mut self) {
        self.last_beat = Instant::now();
    }

    /// Feed on heartbeats, ignore everything else
    pub fn observe(&mut self, event: &EngineEvent) {
        if matches!(event, EngineEvent::HeartBeat) {
            self.feed();
        }
    }

    /// Time since the last heartbeat
    pub fn elapsed(&self) -> Duration {
        self.last_beat.elapsed()
    }

    pub fn is_wedged(&self) -> bool {
        self.elapsed() > self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_wedged_after_silence() {
        let mut watchdog = Watchdog::new(Duration::from_millis(100));
        assert!(!watchdog.is_wedged());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(watchdog.is_wedged());

        watchdog.observe(&EngineEvent::HeartBeat);
        assert!(!watchdog.is_wedged());

        tokio::time::advance(Duration::from_millis(150)).await;
        watchdog.observe(&EngineEvent::Evaluated { pass: 1 });
        assert!(watchdog.is_wedged());
    }
}
