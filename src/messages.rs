use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// UTC timestamp in nanoseconds
pub fn now_utc_ns() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// One compass heading sample as reported by a heading source
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeadingReading {
    /// Heading relative to true north (degrees, [0, 360))
    pub true_heading: f64,
    /// Heading relative to magnetic north (degrees, [0, 360))
    pub magnetic_heading: f64,
    /// Device-reported uncertainty in degrees; negative means unreliable
    pub heading_accuracy: f64,
    /// UTC timestamp in nanoseconds
    pub t_utc_ns: u64,
}

impl HeadingReading {
    /// Create a reading stamped with the current time
    pub fn new(true_heading: f64, magnetic_heading: f64, heading_accuracy: f64) -> Self {
        Self {
            true_heading,
            magnetic_heading,
            heading_accuracy,
            t_utc_ns: now_utc_ns(),
        }
    }

    /// Reading with zeroed headings, used when an accuracy is injected before
    /// any real reading exists
    pub fn synthetic(heading_accuracy: f64) -> Self {
        Self::new(0.0, 0.0, heading_accuracy)
    }

    /// Copy of this reading carrying a different accuracy
    pub fn with_accuracy(&self, heading_accuracy: f64) -> Self {
        Self {
            heading_accuracy,
            ..*self
        }
    }
}

/// Accuracy bucket derived from the raw accuracy in degrees
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyLevel {
    Unreliable,
    Low,
    Medium,
    High,
    Unknown,
}

impl AccuracyLevel {
    /// Ordering rank (higher is better). `Unknown` has no rank.
    pub fn rank(self) -> Option<u8> {
        match self {
            AccuracyLevel::Unreliable => Some(0),
            AccuracyLevel::Low => Some(1),
            AccuracyLevel::Medium => Some(2),
            AccuracyLevel::High => Some(3),
            AccuracyLevel::Unknown => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccuracyLevel::Unreliable => "unreliable",
            AccuracyLevel::Low => "low",
            AccuracyLevel::Medium => "medium",
            AccuracyLevel::High => "high",
            AccuracyLevel::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AccuracyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccuracyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unreliable" => Ok(AccuracyLevel::Unreliable),
            "low" => Ok(AccuracyLevel::Low),
            "medium" => Ok(AccuracyLevel::Medium),
            "high" => Ok(AccuracyLevel::High),
            "unknown" => Ok(AccuracyLevel::Unknown),
            other => Err(format!("unknown accuracy level '{}'", other)),
        }
    }
}

/// A forwarded reading together with its classification
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccuracyUpdate {
    pub reading: HeadingReading,
    pub level: AccuracyLevel,
    pub required_accuracy: AccuracyLevel,
    pub meets_required: bool,
}

/// Items delivered on a monitoring subscription
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    #[serde(rename_all = "camelCase")]
    Started {
        required_accuracy: AccuracyLevel,
        current_accuracy: Option<f64>,
    },
    AccuracyChanged(AccuracyUpdate),
    #[serde(rename_all = "camelCase")]
    CalibrationRequired {
        heading_accuracy: f64,
        level: AccuracyLevel,
        required_accuracy: AccuracyLevel,
    },
    Stopped,
}

impl MonitorEvent {
    /// Reading carried by the event, if any
    pub fn reading(&self) -> Option<&HeadingReading> {
        match self {
            MonitorEvent::AccuracyChanged(update) => Some(&update.reading),
            _ => None,
        }
    }

    /// Serialize to JSON for host bridges and debugging
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_creation() {
        let reading = HeadingReading::new(92.5, 90.0, 7.5);

        assert_eq!(reading.true_heading, 92.5);
        assert_eq!(reading.magnetic_heading, 90.0);
        assert_eq!(reading.heading_accuracy, 7.5);
        assert!(reading.t_utc_ns > 0);
    }

    #[test]
    fn test_with_accuracy_keeps_headings() {
        let reading = HeadingReading::new(10.0, 12.0, 3.0);
        let updated = reading.with_accuracy(-1.0);

        assert_eq!(updated.true_heading, 10.0);
        assert_eq!(updated.magnetic_heading, 12.0);
        assert_eq!(updated.t_utc_ns, reading.t_utc_ns);
        assert_eq!(updated.heading_accuracy, -1.0);
        assert_eq!(reading.heading_accuracy, 3.0);
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("HIGH".parse::<AccuracyLevel>(), Ok(AccuracyLevel::High));
        assert_eq!("unreliable".parse::<AccuracyLevel>(), Ok(AccuracyLevel::Unreliable));
        assert!("precise".parse::<AccuracyLevel>().is_err());
        assert!(AccuracyLevel::Low.rank() < AccuracyLevel::Medium.rank());
        assert_eq!(AccuracyLevel::Unknown.rank(), None);
    }

    #[test]
    fn test_event_json_shape() {
        let event = MonitorEvent::Started {
            required_accuracy: AccuracyLevel::High,
            current_accuracy: None,
        };
        let json = event.to_json().unwrap();
        assert!(json.contains("\"type\":\"started\""));
        assert!(json.contains("\"requiredAccuracy\":\"high\""));

        let update = MonitorEvent::AccuracyChanged(AccuracyUpdate {
            reading: HeadingReading::new(1.0, 2.0, 25.0),
            level: AccuracyLevel::Medium,
            required_accuracy: AccuracyLevel::High,
            meets_required: false,
        });
        let json = update.to_json().unwrap();
        assert!(json.contains("\"type\":\"accuracy_changed\""));
        assert!(json.contains("\"headingAccuracy\":25.0"));

        let decoded: MonitorEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, update);
        assert_eq!(MonitorEvent::Stopped.to_json().unwrap(), "{\"type\":\"stopped\"}");
    }
}
