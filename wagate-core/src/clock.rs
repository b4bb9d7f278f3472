// ABOUTME: Injectable clock and timer abstraction behind every recovery delay.
// ABOUTME: TokioClock follows tokio time (pausable in tests); ManualClock is fully virtual.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Source of time for the session state machine
pub trait Clock: Send + Sync {
    /// Monotonic now, used for cooldowns and throttles
    fn now(&self) -> Instant;

    /// Wall-clock now, used for timestamps handed to collaborators
    fn wall(&self) -> DateTime<Utc>;

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Clock backed by tokio's timer, so `tokio::time::pause` drives it in tests
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Virtual clock that only moves when told to.
///
/// `sleep` advances the clock by the requested amount and returns immediately.
pub struct ManualClock {
    origin: Instant,
    wall_origin: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: Utc::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|p| p.into_inner());
        *offset += by;
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn wall(&self) -> DateTime<Utc> {
        let offset = chrono::Duration::from_std(self.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_origin + offset
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.advance(duration);
        Box::pin(std::future::ready(()))
    }
}

/// Schedules delayed and periodic tasks against a [`Clock`]
#[derive(Clone)]
pub struct Timers {
    clock: Arc<dyn Clock>,
}

impl Timers {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run `task` once after `delay`
    pub fn after<F>(&self, delay: Duration, label: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let clock = Arc::clone(&self.clock);
        tokio::spawn(async move {
            if !delay.is_zero() {
                clock.sleep(delay).await;
            }
            tracing::debug!(task = label, delay_ms = delay.as_millis() as u64, "Running scheduled task");
            task.await;
        })
    }

    /// Run `tick` every `period` until it returns false
    pub fn every<F, Fut>(&self, period: Duration, label: &'static str, mut tick: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let clock = Arc::clone(&self.clock);
        tokio::spawn(async move {
            loop {
                clock.sleep(period).await;
                if !tick().await {
                    tracing::debug!(task = label, "Periodic task stopped");
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::new();
        let start = clock.now();
        let wall_start = clock.wall();

        clock.advance(Duration::from_millis(2500));
        assert_eq!(clock.now() - start, Duration::from_millis(2500));
        assert_eq!((clock.wall() - wall_start).num_milliseconds(), 2500);
    }

    #[tokio::test]
    async fn test_manual_sleep_advances_virtual_time() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_secs(60)).await;
        assert_eq!(clock.now() - start, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_after_waits_for_delay() {
        let timers = Timers::new(Arc::new(TokioClock));
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        let handle = timers.after(Duration::from_millis(800), "test", async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(799)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        handle.await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_stops_when_tick_returns_false() {
        let timers = Timers::new(Arc::new(TokioClock));
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ticks);
        let handle = timers.every(Duration::from_secs(60), "watchdog", move || {
            let counter = Arc::clone(&counter);
            async move { counter.fetch_add(1, Ordering::SeqCst) + 1 < 3 }
        });

        handle.await.unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }
}
