//! Periodic housekeeping task
//!
//! Backends without native expiry (the in-process segments and the SQL
//! tables) accumulate expired entries until something purges them. This
//! task calls [`CacheDriver::housekeeping`] on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::domain::cache::CacheDriver;

/// Shortest interval the task accepts
pub const MIN_HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(10);

/// Spawns a background task that runs `driver.housekeeping()` every
/// `every`, raised to [`MIN_HOUSEKEEPING_INTERVAL`]. The first run happens
/// one interval after the spawn.
///
/// Abort the returned handle to stop the task during shutdown.
pub fn spawn_housekeeping_task(driver: Arc<dyn CacheDriver>, every: Duration) -> JoinHandle<()> {
    let every = every.max(MIN_HOUSEKEEPING_INTERVAL);

    tokio::spawn(async move {
        info!(
            driver = driver.name(),
            interval_secs = every.as_secs_f64(),
            "Starting cache housekeeping task"
        );

        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            driver.housekeeping().await;
            debug!(driver = driver.name(), "Housekeeping pass complete");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::{InvalidationEpoch, ManualClock};
    use crate::infrastructure::cache::shared_memory::{
        Segment, SharedMemoryConfig, SharedMemoryDriver,
    };

    fn driver(clock: &ManualClock) -> Arc<SharedMemoryDriver> {
        Arc::new(SharedMemoryDriver::new(
            SharedMemoryConfig::default(),
            InvalidationEpoch::starting_at(1),
            Arc::new(clock.clone()),
        ))
    }

    #[tokio::test]
    async fn test_housekeeping_task_purges_expired_entries() {
        let clock = ManualClock::new(1_000);
        let driver = driver(&clock);

        driver.put_data("short", Some("a"), Some(Duration::from_secs(10))).await;
        driver.put_data("long", Some("b"), Some(Duration::from_secs(3_600))).await;
        clock.advance(Duration::from_secs(60));

        let handle = spawn_housekeeping_task(driver.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        assert_eq!(driver.segment_len(Segment::User).await, 1);
        assert_eq!(driver.epoch().current(), 1);
    }

    #[tokio::test]
    async fn test_zero_interval_is_raised_to_the_minimum() {
        let clock = ManualClock::new(1_000);
        let driver = driver(&clock);
        driver.put_data("short", Some("a"), Some(Duration::from_secs(10))).await;
        clock.advance(Duration::from_secs(60));

        let handle = spawn_housekeeping_task(driver.clone(), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!handle.is_finished(), "Task should still be running");
        handle.abort();
        assert_eq!(driver.segment_len(Segment::User).await, 0);
    }

    #[tokio::test]
    async fn test_housekeeping_task_can_be_aborted() {
        let driver = driver(&ManualClock::new(0));

        let handle = spawn_housekeeping_task(driver, Duration::from_secs(1));
        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
