use crate::config::SourceEntry;
use crate::errors::{SourceError, SourceResult};
use crate::messages::HeadingReading;
use async_trait::async_trait;
use std::sync::Arc;

pub mod manual;
#[cfg(feature = "simulated_source")]
pub mod simulated;

pub use manual::ManualSource;
#[cfg(feature = "simulated_source")]
pub use simulated::SimulatedCompass;

/// Invoked by a source for every new reading, possibly from another thread
pub type ReadingCallback = Box<dyn Fn(HeadingReading) + Send + Sync>;

/// Opaque token identifying one subscription on a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Capability interface over a device that produces heading readings
#[async_trait]
pub trait HeadingSource: Send + Sync {
    /// Register `callback` for every future reading.
    /// Fails if the underlying hardware cannot be acquired.
    async fn subscribe(&self, callback: ReadingCallback) -> SourceResult<SubscriptionHandle>;

    /// Release a subscription. Unknown handles are ignored.
    async fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.release(handle);
    }

    /// Synchronous release, usable from `Drop`.
    /// Must not block on the async runtime.
    fn release(&self, handle: SubscriptionHandle);

    fn id(&self) -> &str;
}

/// Wrap an angle into [0, 360)
pub fn normalize_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// True heading from a magnetic heading and the local declination (east positive)
pub fn true_heading(magnetic_heading: f64, declination_deg: f64) -> f64 {
    normalize_degrees(magnetic_heading + declination_deg)
}

pub fn create_heading_source(entry: &SourceEntry) -> SourceResult<Arc<dyn HeadingSource>> {
    match entry.driver.as_str() {
        #[cfg(feature = "simulated_source")]
        "simulated" => Ok(Arc::new(SimulatedCompass::from_entry(entry))),
        "manual" => Ok(Arc::new(ManualSource::new(entry.id.clone()))),
        _ => Err(SourceError::UnsupportedDriver {
            driver: entry.driver.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_degrees() {
        assert_eq!(normalize_degrees(0.0), 0.0);
        assert_eq!(normalize_degrees(360.0), 0.0);
        assert_eq!(normalize_degrees(370.0), 10.0);
        assert_eq!(normalize_degrees(-90.0), 270.0);
        assert!(normalize_degrees(-1e-20) < 360.0);
    }

    #[test]
    fn test_true_heading_applies_declination() {
        assert_eq!(true_heading(350.0, 15.0), 5.0);
        assert_eq!(true_heading(10.0, -20.0), 350.0);
    }

    #[test]
    fn test_unknown_driver_rejected() {
        let entry = SourceEntry {
            driver: "hmc5883".to_string(),
            ..SourceEntry::default()
        };
        match create_heading_source(&entry) {
            Err(SourceError::UnsupportedDriver { driver }) => assert_eq!(driver, "hmc5883"),
            _ => panic!("expected UnsupportedDriver"),
        }
    }

    #[test]
    fn test_manual_driver() {
        let entry = SourceEntry {
            id: "compass1".to_string(),
            driver: "manual".to_string(),
            ..SourceEntry::default()
        };
        let source = create_heading_source(&entry).unwrap();
        assert_eq!(source.id(), "compass1");
    }
}
