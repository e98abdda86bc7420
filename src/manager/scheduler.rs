//! Background auto-rotation
//!
//! Runs [`MultiKeyManager::auto_rotate`] on a fixed interval. Keys whose
//! rotation failed in one tick are simply found again in the next.

use super::MultiKeyManager;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Shortest period the task will tick at
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Spawn auto-rotation at the configured interval
pub fn spawn(manager: Arc<MultiKeyManager>) -> JoinHandle<()> {
    let every = Duration::from_secs(manager.store().config().auto_rotation_interval_secs);
    spawn_with_interval(manager, every)
}

/// Spawn auto-rotation ticking every `every`; the first tick is immediate
///
/// A zero period is raised to [`MIN_INTERVAL`].
pub fn spawn_with_interval(manager: Arc<MultiKeyManager>, every: Duration) -> JoinHandle<()> {
    let every = if every.is_zero() {
        tracing::warn!("Auto-rotation interval of 0 raised to {:?}", MIN_INTERVAL);
        MIN_INTERVAL
    } else {
        every
    };

    tokio::spawn(async move {
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let rotated = manager.auto_rotate().await;
            if !rotated.is_empty() {
                tracing::info!("Auto-rotation tick rotated {} key(s)", rotated.len());
            }
        }
    })
}
