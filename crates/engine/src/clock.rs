//! Clock collaborator - current time and scheduled wake-ups.

use async_trait::async_trait;
use chrono::Utc;
use rota_core::Time;
use tokio::sync::watch;

/// Source of time for the engine.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Current instant.
    fn now(&self) -> Time;

    /// Resolve once `now() >= deadline`.
    async fn sleep_until(&self, deadline: Time);
}

/// Wall clock backed by tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Time {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: Time) {
        // Re-check after waking; the wall clock can be adjusted under us.
        loop {
            let remaining = deadline - Utc::now();
            match remaining.to_std() {
                Ok(d) if !d.is_zero() => tokio::time::sleep(d).await,
                _ => return,
            }
        }
    }
}

/// Test clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: watch::Sender<Time>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Time) -> Self {
        let (now, _) = watch::channel(start);
        Self { now }
    }

    /// Move the clock forward, waking every sleeper whose deadline passed.
    pub fn advance(&self, by: chrono::Duration) {
        self.now.send_modify(|t| *t += by);
    }

    /// Jump to an instant.
    pub fn set(&self, at: Time) {
        self.now.send_replace(at);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Time {
        *self.now.borrow()
    }

    async fn sleep_until(&self, deadline: Time) {
        let mut rx = self.now.subscribe();
        loop {
            if *rx.borrow_and_update() >= deadline {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    #[tokio::test]
    async fn manual_clock_wakes_sleepers_on_advance() {
        let start: Time = "2026-03-02T14:00:00Z".parse().unwrap();
        let clock = Arc::new(ManualClock::new(start));

        let sleeper = {
            let clock = clock.clone();
            tokio::spawn(async move { clock.sleep_until(start + Duration::minutes(5)).await })
        };
        tokio::task::yield_now().await;
        assert!(!sleeper.is_finished());

        clock.advance(Duration::minutes(4));
        tokio::task::yield_now().await;
        assert!(!sleeper.is_finished());

        clock.advance(Duration::minutes(1));
        tokio::time::timeout(std::time::Duration::from_secs(1), sleeper)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(clock.now(), start + Duration::minutes(5));
    }

    #[tokio::test]
    async fn past_deadline_returns_immediately() {
        let clock = SystemClock;
        let past = clock.now() - Duration::seconds(1);
        tokio::time::timeout(std::time::Duration::from_millis(100), clock.sleep_until(past))
            .await
            .unwrap();
    }
}
