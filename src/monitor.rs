use crate::accuracy::{meets_required, AccuracyThresholds};
use crate::config::MonitorSettings;
use crate::errors::{MonitorError, MonitorResult};
use crate::messages::{AccuracyLevel, AccuracyUpdate, HeadingReading, MonitorEvent};
use crate::sources::{HeadingSource, ReadingCallback, SubscriptionHandle};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, trace, warn};

/// Receiving end of a monitoring subscription (the multi-shot response).
/// Bounded; a subscriber that lets it fill up is dropped.
pub type Subscription = mpsc::Receiver<MonitorEvent>;

/// Readings queued by the source callback, waiting to be ingested
pub type ReadingInbox = mpsc::UnboundedReceiver<TaggedReading>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Idle,
    Monitoring,
}

/// A reading stamped with the registration that produced it
#[derive(Debug, Clone, Copy)]
pub struct TaggedReading {
    pub generation: u64,
    pub reading: HeadingReading,
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    handle: SubscriptionHandle,
    generation: u64,
}

/// Snapshot of the monitor for status queries
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub state: MonitorState,
    pub required_accuracy: AccuracyLevel,
    pub subscribers: usize,
    pub current_accuracy: Option<f64>,
    pub current_level: Option<AccuracyLevel>,
}

/// Start/stop state machine over a heading source.
///
/// The monitor is owned by a single task. Source callbacks never touch it
/// directly; they queue readings into the inbox returned by [`new`], and the
/// owner feeds them back through [`ingest`].
///
/// [`new`]: HeadingAccuracyMonitor::new
/// [`ingest`]: HeadingAccuracyMonitor::ingest
pub struct HeadingAccuracyMonitor {
    source: Arc<dyn HeadingSource>,
    thresholds: AccuracyThresholds,
    required: AccuracyLevel,
    // Some iff monitoring
    registration: Option<Registration>,
    current: Option<HeadingReading>,
    last_level: Option<AccuracyLevel>,
    // Latched after the first below-required reading of a session
    calibration_requested: bool,
    subscribers: Vec<mpsc::Sender<MonitorEvent>>,
    subscriber_buffer: usize,
    generation: u64,
    inbox: mpsc::UnboundedSender<TaggedReading>,
}

impl HeadingAccuracyMonitor {
    pub fn new(source: Arc<dyn HeadingSource>, settings: &MonitorSettings) -> (Self, ReadingInbox) {
        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let monitor = Self {
            source,
            thresholds: settings.thresholds,
            required: settings.required_accuracy,
            registration: None,
            current: None,
            last_level: None,
            calibration_requested: false,
            subscribers: Vec::new(),
            subscriber_buffer: settings.subscriber_buffer.max(1),
            generation: 0,
            inbox,
        };
        (monitor, inbox_rx)
    }

    pub fn state(&self) -> MonitorState {
        if self.registration.is_some() {
            MonitorState::Monitoring
        } else {
            MonitorState::Idle
        }
    }

    pub fn current_reading(&self) -> Option<&HeadingReading> {
        self.current.as_ref()
    }

    pub fn required_accuracy(&self) -> AccuracyLevel {
        self.required
    }

    /// Subscribers whose receiving end is still attached
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.iter().filter(|tx| !tx.is_closed()).count()
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            state: self.state(),
            required_accuracy: self.required,
            subscribers: self.subscriber_count(),
            current_accuracy: self.current.map(|r| r.heading_accuracy),
            current_level: self
                .current
                .map(|r| self.thresholds.classify(r.heading_accuracy)),
        }
    }

    /// Begin (or join) monitoring.
    ///
    /// Only the first call registers with the source; later calls while
    /// monitoring just add another subscriber. Every returned subscription
    /// starts with a `Started` event.
    pub async fn start_monitoring(
        &mut self,
        required: Option<AccuracyLevel>,
    ) -> MonitorResult<Subscription> {
        if required == Some(AccuracyLevel::Unknown) {
            return Err(MonitorError::InvalidArgument {
                reason: "required accuracy must be a ranked level, got unknown".to_string(),
            });
        }

        let fresh = self.registration.is_none();

        if fresh {
            let generation = self.generation.wrapping_add(1);
            let inbox = self.inbox.clone();
            let callback: ReadingCallback = Box::new(move |reading| {
                // Inbox closes only when the monitor is gone
                let _ = inbox.send(TaggedReading { generation, reading });
            });

            let handle = self.source.subscribe(callback).await.map_err(|e| {
                warn!("[monitor] failed to start on '{}': {}", self.source.id(), e);
                MonitorError::from(e)
            })?;

            self.generation = generation;
            self.registration = Some(Registration { handle, generation });
            self.calibration_requested = false;
            info!(
                "[monitor] monitoring started on source '{}' (subscription {})",
                self.source.id(),
                handle.id()
            );
        } else {
            debug!("[monitor] already monitoring, adding subscriber");
        }

        if let Some(level) = required {
            self.required = level;
        }

        let (tx, rx) = mpsc::channel(self.subscriber_buffer);
        let _ = tx.try_send(MonitorEvent::Started {
            required_accuracy: self.required,
            current_accuracy: self.current.map(|r| r.heading_accuracy),
        });
        self.subscribers.push(tx);

        // A reading cached before monitoring began is evaluated right away
        if fresh {
            if let Some(reading) = self.current {
                debug!("[monitor] evaluating reading cached before start");
                self.forward(reading);
            }
        }

        Ok(rx)
    }

    /// Release the source registration and end every subscription.
    /// The cached reading is kept.
    pub async fn stop_monitoring(&mut self) {
        let Some(registration) = self.registration.take() else {
            debug!("[monitor] stop requested while idle");
            return;
        };

        self.source.unsubscribe(registration.handle).await;
        for tx in self.subscribers.drain(..) {
            // A full queue still ends when the sender is dropped
            let _ = tx.try_send(MonitorEvent::Stopped);
        }
        self.calibration_requested = false;
        info!("[monitor] monitoring stopped on source '{}'", self.source.id());
    }

    pub fn get_current_accuracy(&self) -> MonitorResult<f64> {
        self.current
            .map(|r| r.heading_accuracy)
            .ok_or(MonitorError::NoReadingAvailable)
    }

    /// Overwrite the cached accuracy as if the device had reported it
    pub fn simulate_accuracy_change(&mut self, heading_accuracy: f64) -> MonitorResult<()> {
        if !heading_accuracy.is_finite() {
            return Err(MonitorError::InvalidArgument {
                reason: format!("accuracy must be a finite number, got {}", heading_accuracy),
            });
        }

        let reading = match self.current {
            Some(current) => current.with_accuracy(heading_accuracy),
            None => HeadingReading::synthetic(heading_accuracy),
        };
        info!("[monitor] simulating heading accuracy {}", heading_accuracy);

        self.calibration_requested = false;
        self.store(reading);
        Ok(())
    }

    /// Accept a reading queued by the source callback.
    /// Returns false if it came from a registration that was already released.
    pub fn ingest(&mut self, tagged: TaggedReading) -> bool {
        match self.registration {
            Some(registration) if registration.generation == tagged.generation => {
                trace!(
                    "[monitor] reading true={:.1} magnetic={:.1} accuracy={}",
                    tagged.reading.true_heading,
                    tagged.reading.magnetic_heading,
                    tagged.reading.heading_accuracy
                );
                self.store(tagged.reading);
                true
            }
            _ => {
                trace!("[monitor] discarding stale reading (generation {})", tagged.generation);
                false
            }
        }
    }

    /// Release everything held on the source; used on teardown
    pub async fn shutdown(&mut self) {
        self.stop_monitoring().await;
        debug!("[monitor] shut down");
    }

    fn store(&mut self, reading: HeadingReading) {
        self.current = Some(reading);
        if self.registration.is_some() {
            self.forward(reading);
        }
    }

    fn forward(&mut self, reading: HeadingReading) {
        let level = self.thresholds.classify(reading.heading_accuracy);
        if self.last_level != Some(level) {
            info!("[monitor] heading accuracy changed to {}", level);
            self.last_level = Some(level);
        }

        let meets = meets_required(level, self.required);
        self.broadcast(MonitorEvent::AccuracyChanged(AccuracyUpdate {
            reading,
            level,
            required_accuracy: self.required,
            meets_required: meets,
        }));

        if !meets && !self.calibration_requested {
            self.calibration_requested = true;
            warn!(
                "[monitor] accuracy {} below required {}, calibration required",
                level, self.required
            );
            self.broadcast(MonitorEvent::CalibrationRequired {
                heading_accuracy: reading.heading_accuracy,
                level,
                required_accuracy: self.required,
            });
        }
    }

    fn broadcast(&mut self, event: MonitorEvent) {
        let mut detached = 0;
        let mut lagging = 0;
        self.subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                lagging += 1;
                false
            }
            Err(TrySendError::Closed(_)) => {
                detached += 1;
                false
            }
        });
        if detached > 0 {
            debug!("[monitor] pruned {} detached subscriber(s)", detached);
        }
        if lagging > 0 {
            warn!(
                "[monitor] dropped {} slow subscriber(s), queue of {} events full",
                lagging, self.subscriber_buffer
            );
        }
    }
}

impl Drop for HeadingAccuracyMonitor {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            self.source.release(registration.handle);
            debug!(
                "[monitor] dropped while monitoring, released subscription {} on '{}'",
                registration.handle.id(),
                self.source.id()
            );
        }
    }
}
