use crate::errors::MonitorError;
use crate::messages::{AccuracyLevel, HeadingReading, MonitorEvent};
use crate::monitor::{MonitorState, MonitorStatus};
use crate::service::MonitorHandle;
use std::pin::Pin;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Result, Status};
use tracing::info;

// Include the generated protobuf code
pub mod compass {
    tonic::include_proto!("compass");
}

use compass::compass_accuracy_server::{CompassAccuracy, CompassAccuracyServer};
use compass::{
    monitor_event, AccuracyReply, Ack, Empty, SimulateRequest, StartRequest, StatusReply,
};

pub type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// gRPC front end over a running monitor
#[derive(Clone)]
pub struct CompassAccuracyService {
    handle: MonitorHandle,
}

impl CompassAccuracyService {
    pub fn new(handle: MonitorHandle) -> Self {
        Self { handle }
    }
}

#[tonic::async_trait]
impl CompassAccuracy for CompassAccuracyService {
    type StartMonitoringStream = ResponseStream<compass::MonitorEvent>;

    async fn start_monitoring(
        &self,
        request: Request<StartRequest>,
    ) -> Result<Response<Self::StartMonitoringStream>> {
        let required = match request.into_inner().required_accuracy {
            Some(raw) => Some(required_level_from_proto(raw)?),
            None => None,
        };
        info!("[gRPC] New monitoring stream client connected");

        let subscription = self.handle.start_monitoring(required).await?;
        let stream = ReceiverStream::new(subscription).map(|event| Ok(event_to_proto(event)));

        Ok(Response::new(Box::pin(stream)))
    }

    async fn stop_monitoring(&self, _request: Request<Empty>) -> Result<Response<Ack>> {
        let state = self.handle.stop_monitoring().await?;
        Ok(Response::new(Ack {
            monitoring: state == MonitorState::Monitoring,
        }))
    }

    async fn get_current_accuracy(&self, _request: Request<Empty>) -> Result<Response<AccuracyReply>> {
        // Accuracy and level must describe the same reading
        let status = self.handle.status().await?;
        let (heading_accuracy, level) = status
            .current_accuracy
            .zip(status.current_level)
            .ok_or(MonitorError::NoReadingAvailable)?;
        Ok(Response::new(AccuracyReply {
            heading_accuracy,
            level: level_to_proto(level),
        }))
    }

    async fn simulate_accuracy_change(&self, request: Request<SimulateRequest>) -> Result<Response<Ack>> {
        let accuracy = request.into_inner().accuracy.ok_or_else(|| {
            Status::from(MonitorError::InvalidArgument {
                reason: "accuracy is required".to_string(),
            })
        })?;
        let state = self.handle.simulate_accuracy_change(accuracy).await?;
        Ok(Response::new(Ack {
            monitoring: state == MonitorState::Monitoring,
        }))
    }

    async fn get_status(&self, _request: Request<Empty>) -> Result<Response<StatusReply>> {
        let status = self.handle.status().await?;
        Ok(Response::new(status_to_proto(&status)))
    }
}

fn level_to_proto(level: AccuracyLevel) -> i32 {
    let level = match level {
        AccuracyLevel::Unknown => compass::AccuracyLevel::Unknown,
        AccuracyLevel::Unreliable => compass::AccuracyLevel::Unreliable,
        AccuracyLevel::Low => compass::AccuracyLevel::Low,
        AccuracyLevel::Medium => compass::AccuracyLevel::Medium,
        AccuracyLevel::High => compass::AccuracyLevel::High,
    };
    level as i32
}

fn level_from_proto(raw: i32) -> Result<AccuracyLevel, Status> {
    match compass::AccuracyLevel::try_from(raw) {
        Ok(compass::AccuracyLevel::Unknown) => Ok(AccuracyLevel::Unknown),
        Ok(compass::AccuracyLevel::Unreliable) => Ok(AccuracyLevel::Unreliable),
        Ok(compass::AccuracyLevel::Low) => Ok(AccuracyLevel::Low),
        Ok(compass::AccuracyLevel::Medium) => Ok(AccuracyLevel::Medium),
        Ok(compass::AccuracyLevel::High) => Ok(AccuracyLevel::High),
        Err(_) => Err(Status::invalid_argument(format!("Unknown accuracy level {}", raw))),
    }
}

/// Level a client may require; Unknown has no rank to compare against
fn required_level_from_proto(raw: i32) -> Result<AccuracyLevel, Status> {
    match level_from_proto(raw)? {
        AccuracyLevel::Unknown => Err(Status::from(MonitorError::InvalidArgument {
            reason: "required accuracy must be a ranked level, got unknown".to_string(),
        })),
        level => Ok(level),
    }
}

fn reading_to_proto(reading: &HeadingReading) -> compass::HeadingReading {
    compass::HeadingReading {
        true_heading: reading.true_heading,
        magnetic_heading: reading.magnetic_heading,
        heading_accuracy: reading.heading_accuracy,
        t_utc_ns: reading.t_utc_ns,
    }
}

/// Convert a monitor event to its protobuf form
fn event_to_proto(event: MonitorEvent) -> compass::MonitorEvent {
    let event = match event {
        MonitorEvent::Started {
            required_accuracy,
            current_accuracy,
        } => monitor_event::Event::Started(compass::Started {
            required_accuracy: level_to_proto(required_accuracy),
            current_accuracy,
        }),
        MonitorEvent::AccuracyChanged(update) => {
            monitor_event::Event::AccuracyChanged(compass::AccuracyChanged {
                reading: Some(reading_to_proto(&update.reading)),
                level: level_to_proto(update.level),
                required_accuracy: level_to_proto(update.required_accuracy),
                meets_required: update.meets_required,
            })
        }
        MonitorEvent::CalibrationRequired {
            heading_accuracy,
            level,
            required_accuracy,
        } => monitor_event::Event::CalibrationRequired(compass::CalibrationRequired {
            heading_accuracy,
            level: level_to_proto(level),
            required_accuracy: level_to_proto(required_accuracy),
        }),
        MonitorEvent::Stopped => monitor_event::Event::Stopped(compass::Stopped {}),
    };
    compass::MonitorEvent { event: Some(event) }
}

fn status_to_proto(status: &MonitorStatus) -> StatusReply {
    StatusReply {
        monitoring: status.state == MonitorState::Monitoring,
        required_accuracy: level_to_proto(status.required_accuracy),
        subscribers: status.subscribers as u32,
        current_accuracy: status.current_accuracy,
        current_level: level_to_proto(status.current_level.unwrap_or(AccuracyLevel::Unknown)),
    }
}

/// Create and configure gRPC server
pub fn create_grpc_server(service: CompassAccuracyService) -> CompassAccuracyServer<CompassAccuracyService> {
    CompassAccuracyServer::new(service)
        .max_encoding_message_size(64 * 1024)
        .max_decoding_message_size(64 * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accuracy::AccuracyThresholds;
    use crate::config::MonitorSettings;
    use crate::monitor::HeadingAccuracyMonitor;
    use crate::service::spawn_monitor;
    use crate::sources::ManualSource;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    fn service() -> (CompassAccuracyService, MonitorHandle, JoinHandle<()>, Arc<ManualSource>) {
        let source = Arc::new(ManualSource::new("compass0".to_string()));
        let (monitor, inbox) = HeadingAccuracyMonitor::new(source.clone(), &MonitorSettings::default());
        let (handle, task) = spawn_monitor(monitor, inbox, 8);
        (CompassAccuracyService::new(handle.clone()), handle, task, source)
    }

    #[test]
    fn test_level_conversion() {
        for level in [
            AccuracyLevel::Unknown,
            AccuracyLevel::Unreliable,
            AccuracyLevel::Low,
            AccuracyLevel::Medium,
            AccuracyLevel::High,
        ] {
            assert_eq!(level_from_proto(level_to_proto(level)).unwrap(), level);
        }
        assert_eq!(level_from_proto(42).unwrap_err().code(), tonic::Code::InvalidArgument);
        assert_eq!(
            required_level_from_proto(compass::AccuracyLevel::Unknown as i32)
                .unwrap_err()
                .code(),
            tonic::Code::InvalidArgument
        );
        assert_eq!(
            required_level_from_proto(compass::AccuracyLevel::Low as i32).unwrap(),
            AccuracyLevel::Low
        );
    }

    #[tokio::test]
    async fn test_stream_delivers_readings() {
        let (svc, handle, task, source) = service();

        let response = svc
            .start_monitoring(Request::new(StartRequest {
                required_accuracy: Some(compass::AccuracyLevel::Medium as i32),
            }))
            .await
            .unwrap();
        let mut stream = response.into_inner();

        match stream.next().await.unwrap().unwrap().event {
            Some(monitor_event::Event::Started(started)) => {
                assert_eq!(started.required_accuracy, compass::AccuracyLevel::Medium as i32);
                assert_eq!(started.current_accuracy, None);
            }
            other => panic!("unexpected event {:?}", other),
        }

        source.push(HeadingReading::new(30.0, 28.0, 9.0));
        match stream.next().await.unwrap().unwrap().event {
            Some(monitor_event::Event::AccuracyChanged(changed)) => {
                assert_eq!(changed.reading.unwrap().heading_accuracy, 9.0);
                assert_eq!(changed.level, compass::AccuracyLevel::High as i32);
                assert!(changed.meets_required);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let ack = svc.stop_monitoring(Request::new(Empty {})).await.unwrap();
        assert!(!ack.into_inner().monitoring);
        match stream.next().await.unwrap().unwrap().event {
            Some(monitor_event::Event::Stopped(_)) => {}
            other => panic!("unexpected event {:?}", other),
        }
        assert!(stream.next().await.is_none());

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_accuracy_queries() {
        let (svc, handle, task, _source) = service();

        let status = svc
            .get_current_accuracy(Request::new(Empty {}))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);

        let status = svc
            .simulate_accuracy_change(Request::new(SimulateRequest { accuracy: None }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let ack = svc
            .simulate_accuracy_change(Request::new(SimulateRequest {
                accuracy: Some(12.5),
            }))
            .await
            .unwrap();
        assert!(!ack.into_inner().monitoring);

        let reply = svc
            .get_current_accuracy(Request::new(Empty {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(reply.heading_accuracy, 12.5);
        assert_eq!(reply.level, compass::AccuracyLevel::High as i32);

        let status = svc.get_status(Request::new(Empty {})).await.unwrap().into_inner();
        assert!(!status.monitoring);
        assert_eq!(status.current_accuracy, Some(12.5));
        assert_eq!(status.subscribers, 0);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_required_level_rejected() {
        let (svc, handle, task, source) = service();

        let status = svc
            .start_monitoring(Request::new(StartRequest {
                required_accuracy: Some(compass::AccuracyLevel::Unknown as i32),
            }))
            .await
            .err()
            .unwrap();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert_eq!(source.subscribe_calls(), 0);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_accuracy_reply_consistent_while_readings_change() {
        let (svc, handle, task, source) = service();
        // Keep monitoring with no subscriber attached
        handle.start_monitoring(None).await.unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let pusher = {
            let running = running.clone();
            let source = source.clone();
            std::thread::spawn(move || {
                let mut i = 0u64;
                while running.load(Ordering::Relaxed) {
                    let accuracy = if i % 2 == 0 { 5.0 } else { 40.0 };
                    source.push(HeadingReading::new(0.0, 0.0, accuracy));
                    i += 1;
                    std::thread::sleep(Duration::from_micros(20));
                }
            })
        };

        handle.simulate_accuracy_change(5.0).await.unwrap();
        let thresholds = AccuracyThresholds::default();
        for _ in 0..500 {
            let reply = svc
                .get_current_accuracy(Request::new(Empty {}))
                .await
                .unwrap()
                .into_inner();
            assert_eq!(
                reply.level,
                level_to_proto(thresholds.classify(reply.heading_accuracy))
            );
        }

        running.store(false, Ordering::Relaxed);
        pusher.join().unwrap();
        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unavailable_source_status() {
        let (svc, handle, task, source) = service();
        source.set_available(false);

        let status = svc
            .start_monitoring(Request::new(StartRequest {
                required_accuracy: None,
            }))
            .await
            .err()
            .unwrap();
        assert_eq!(status.code(), tonic::Code::Unavailable);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }
}
