//! JSON request envelope for hosts that dispatch commands by action name.
//!
//! A host bridge hands over `{"action": "...", "args": [...]}` and gets back
//! either a single JSON reply or, for `startMonitoring`, a stream of events.

use crate::errors::{MonitorError, MonitorResult};
use crate::messages::AccuracyLevel;
use crate::monitor::Subscription;
use crate::service::MonitorHandle;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const START_MONITORING: &str = "startMonitoring";
pub const STOP_MONITORING: &str = "stopMonitoring";
pub const GET_CURRENT_ACCURACY: &str = "getCurrentAccuracy";
pub const SIMULATE_ACCURACY_CHANGE: &str = "simulateAccuracyChange";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// A validated envelope
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Request {
    StartMonitoring { required: Option<AccuracyLevel> },
    StopMonitoring,
    GetCurrentAccuracy,
    SimulateAccuracyChange { heading_accuracy: f64 },
}

/// Outcome of an executed request
#[derive(Debug)]
pub enum Reply {
    /// Multi-shot response; serialize each event with `MonitorEvent::to_json`
    Events(Subscription),
    Ack,
    Accuracy(f64),
}

impl Envelope {
    pub fn new(action: &str, args: Vec<Value>) -> Self {
        Self {
            action: action.to_string(),
            args,
        }
    }

    pub fn parse(json: &str) -> MonitorResult<Self> {
        serde_json::from_str(json).map_err(|e| MonitorError::InvalidArgument {
            reason: format!("malformed envelope: {}", e),
        })
    }

    pub fn into_request(self) -> MonitorResult<Request> {
        match self.action.as_str() {
            START_MONITORING => {
                let required = match self.args.first() {
                    None | Some(Value::Null) => None,
                    Some(Value::String(level)) => match level.parse::<AccuracyLevel>() {
                        Ok(AccuracyLevel::Unknown) => {
                            return Err(MonitorError::InvalidArgument {
                                reason: "required accuracy must be a ranked level, got unknown".to_string(),
                            })
                        }
                        Ok(level) => Some(level),
                        Err(reason) => return Err(MonitorError::InvalidArgument { reason }),
                    },
                    Some(other) => {
                        return Err(MonitorError::InvalidArgument {
                            reason: format!("required accuracy must be a level name, got {}", other),
                        })
                    }
                };
                Ok(Request::StartMonitoring { required })
            }
            STOP_MONITORING => Ok(Request::StopMonitoring),
            GET_CURRENT_ACCURACY => Ok(Request::GetCurrentAccuracy),
            SIMULATE_ACCURACY_CHANGE => {
                let heading_accuracy = self
                    .args
                    .first()
                    .and_then(Value::as_f64)
                    .ok_or_else(|| MonitorError::InvalidArgument {
                        reason: format!(
                            "simulated accuracy must be a number, got {}",
                            self.args.first().unwrap_or(&Value::Null)
                        ),
                    })?;
                Ok(Request::SimulateAccuracyChange { heading_accuracy })
            }
            other => Err(MonitorError::InvalidAction {
                action: other.to_string(),
            }),
        }
    }
}

impl Reply {
    /// JSON body of a single-shot reply; `None` for event streams
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Reply::Events(_) => None,
            Reply::Ack => Some(json!({ "type": "ack" })),
            Reply::Accuracy(accuracy) => Some(json!({ "headingAccuracy": accuracy })),
        }
    }
}

/// JSON body reported to the host for a failed request
pub fn error_json(error: &MonitorError) -> Value {
    json!({ "error": error.to_string() })
}

/// Validate and run one envelope against the monitor
pub async fn execute(handle: &MonitorHandle, envelope: Envelope) -> MonitorResult<Reply> {
    match envelope.into_request()? {
        Request::StartMonitoring { required } => {
            handle.start_monitoring(required).await.map(Reply::Events)
        }
        Request::StopMonitoring => handle.stop_monitoring().await.map(|_| Reply::Ack),
        Request::GetCurrentAccuracy => handle.get_current_accuracy().await.map(Reply::Accuracy),
        Request::SimulateAccuracyChange { heading_accuracy } => handle
            .simulate_accuracy_change(heading_accuracy)
            .await
            .map(|_| Reply::Ack),
    }
}
