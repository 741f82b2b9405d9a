use super::{normalize_degrees, true_heading, HeadingSource, ReadingCallback, SubscriptionHandle};
use crate::config::SourceEntry;
use crate::errors::{SourceError, SourceResult};
use crate::messages::HeadingReading;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Heading motion of the simulated device
#[derive(Debug, Clone, Copy)]
struct Motion {
    declination_deg: f64,
    accuracy_deg: f64,
    rotation_deg_per_sec: f64,
}

impl Motion {
    /// Reading produced `elapsed` after the subscription started
    fn sample(&self, elapsed: Duration) -> HeadingReading {
        let magnetic = normalize_degrees(self.rotation_deg_per_sec * elapsed.as_secs_f64());
        HeadingReading::new(
            true_heading(magnetic, self.declination_deg),
            magnetic,
            self.accuracy_deg,
        )
    }
}

/// Software compass that slowly rotates at a fixed rate.
///
/// Each subscription gets its own sampling task, which is aborted when the
/// subscription is released or the source is dropped.
pub struct SimulatedCompass {
    id: String,
    period: Duration,
    motion: Motion,
    available: bool,
    next_handle: AtomicU64,
    tasks: Mutex<HashMap<SubscriptionHandle, JoinHandle<()>>>,
}

impl SimulatedCompass {
    pub fn from_entry(entry: &SourceEntry) -> Self {
        let frequency = entry.frequency.max(1);
        Self {
            id: entry.id.clone(),
            period: Duration::from_secs_f64(1.0 / frequency as f64).max(Duration::from_millis(1)),
            motion: Motion {
                declination_deg: entry.declination_deg,
                accuracy_deg: entry.accuracy_deg,
                rotation_deg_per_sec: entry.rotation_deg_per_sec,
            },
            available: entry.available,
            next_handle: AtomicU64::new(1),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<SubscriptionHandle, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl HeadingSource for SimulatedCompass {
    async fn subscribe(&self, callback: ReadingCallback) -> SourceResult<SubscriptionHandle> {
        if !self.available {
            return Err(SourceError::Unavailable {
                source_id: self.id.clone(),
                reason: "no compass hardware present".to_string(),
            });
        }

        let handle = SubscriptionHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let source_id = self.id.clone();
        let motion = self.motion;
        let period = self.period;

        let task = tokio::spawn(async move {
            info!(
                "[source:{}] sampling at {}ms for subscription {}",
                source_id,
                period.as_millis(),
                handle.id()
            );
            let started = Instant::now();
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                callback(motion.sample(started.elapsed()));
            }
        });

        self.lock_tasks().insert(handle, task);
        Ok(handle)
    }

    fn release(&self, handle: SubscriptionHandle) {
        if let Some(task) = self.lock_tasks().remove(&handle) {
            task.abort();
            debug!("[source:{}] subscription {} released", self.id, handle.id());
        }
    }

    fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for SimulatedCompass {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, task) in tasks.drain() {
            task.abort();
        }
    }
}
