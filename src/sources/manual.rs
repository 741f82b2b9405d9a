use super::{HeadingSource, ReadingCallback, SubscriptionHandle};
use crate::errors::{SourceError, SourceResult};
use crate::messages::HeadingReading;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

/// Heading source fed explicitly by the host (or by tests) through `push`
pub struct ManualSource {
    id: String,
    available: AtomicBool,
    next_handle: AtomicU64,
    subscribe_calls: AtomicUsize,
    callbacks: Mutex<HashMap<SubscriptionHandle, ReadingCallback>>,
}

impl ManualSource {
    pub fn new(id: String) -> Self {
        Self {
            id,
            available: AtomicBool::new(true),
            next_handle: AtomicU64::new(1),
            subscribe_calls: AtomicUsize::new(0),
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    /// Make future `subscribe` calls fail, as if the hardware vanished
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Deliver a reading to every active subscription.
    /// Returns the number of callbacks invoked.
    pub fn push(&self, reading: HeadingReading) -> usize {
        let callbacks = self.lock_callbacks();
        trace!(
            "[source:{}] pushing accuracy={} to {} subscriber(s)",
            self.id,
            reading.heading_accuracy,
            callbacks.len()
        );
        for callback in callbacks.values() {
            callback(reading);
        }
        callbacks.len()
    }

    /// Number of subscriptions currently held
    pub fn active_subscriptions(&self) -> usize {
        self.lock_callbacks().len()
    }

    /// Number of successful `subscribe` calls over the source's lifetime
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    fn lock_callbacks(&self) -> MutexGuard<'_, HashMap<SubscriptionHandle, ReadingCallback>> {
        self.callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl HeadingSource for ManualSource {
    async fn subscribe(&self, callback: ReadingCallback) -> SourceResult<SubscriptionHandle> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable {
                source_id: self.id.clone(),
                reason: "source marked unavailable".to_string(),
            });
        }

        let handle = SubscriptionHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.lock_callbacks().insert(handle, callback);
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        debug!("[source:{}] subscription {} added", self.id, handle.id());
        Ok(handle)
    }

    fn release(&self, handle: SubscriptionHandle) {
        if self.lock_callbacks().remove(&handle).is_some() {
            debug!("[source:{}] subscription {} released", self.id, handle.id());
        }
    }

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_push_reaches_subscribers() {
        let source = ManualSource::new("compass0".to_string());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let handle = source
            .subscribe(Box::new(move |r: HeadingReading| {
                sink.lock().unwrap().push(r.heading_accuracy)
            }))
            .await
            .unwrap();

        assert_eq!(source.push(HeadingReading::new(1.0, 1.0, 4.0)), 1);
        source.unsubscribe(handle).await;
        assert_eq!(source.push(HeadingReading::new(1.0, 1.0, 8.0)), 0);

        assert_eq!(*seen.lock().unwrap(), vec![4.0]);
        assert_eq!(source.active_subscriptions(), 0);
        assert_eq!(source.subscribe_calls(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_source_refuses_subscription() {
        let source = ManualSource::new("compass0".to_string());
        source.set_available(false);

        let result = source.subscribe(Box::new(|_: HeadingReading| {})).await;
        assert!(matches!(result, Err(SourceError::Unavailable { .. })));
        assert_eq!(source.active_subscriptions(), 0);
    }
}
