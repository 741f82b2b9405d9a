use crate::errors::{MonitorError, MonitorResult};
use crate::messages::AccuracyLevel;
use crate::monitor::{HeadingAccuracyMonitor, MonitorState, MonitorStatus, ReadingInbox, Subscription};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Requests processed by the monitor task, each carrying its reply channel
#[derive(Debug)]
pub enum Command {
    Start {
        required: Option<AccuracyLevel>,
        reply: oneshot::Sender<MonitorResult<Subscription>>,
    },
    Stop {
        reply: oneshot::Sender<MonitorState>,
    },
    GetCurrentAccuracy {
        reply: oneshot::Sender<MonitorResult<f64>>,
    },
    SimulateAccuracyChange {
        heading_accuracy: f64,
        reply: oneshot::Sender<MonitorResult<MonitorState>>,
    },
    Status {
        reply: oneshot::Sender<MonitorStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable front end to a running monitor task
#[derive(Clone, Debug)]
pub struct MonitorHandle {
    tx: mpsc::Sender<Command>,
}

impl MonitorHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> MonitorResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| MonitorError::ServiceClosed)?;
        rx.await.map_err(|_| MonitorError::ServiceClosed)
    }

    /// Start (or join) monitoring; events arrive on the returned subscription
    pub async fn start_monitoring(&self, required: Option<AccuracyLevel>) -> MonitorResult<Subscription> {
        self.request(|reply| Command::Start { required, reply }).await?
    }

    pub async fn stop_monitoring(&self) -> MonitorResult<MonitorState> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn get_current_accuracy(&self) -> MonitorResult<f64> {
        self.request(|reply| Command::GetCurrentAccuracy { reply }).await?
    }

    /// Simulate a reading; replies with the state the change was applied in
    pub async fn simulate_accuracy_change(&self, heading_accuracy: f64) -> MonitorResult<MonitorState> {
        self.request(|reply| Command::SimulateAccuracyChange {
            heading_accuracy,
            reply,
        })
        .await?
    }

    pub async fn status(&self) -> MonitorResult<MonitorStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Release the source and stop the task
    pub async fn shutdown(&self) -> MonitorResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

/// Spawn the task that owns `monitor`.
///
/// Commands and source readings are handled one at a time on this task.
/// The task ends on `Shutdown` or once every handle is dropped, releasing
/// the source registration on either path.
pub fn spawn_monitor(
    monitor: HeadingAccuracyMonitor,
    inbox: ReadingInbox,
    command_buffer: usize,
) -> (MonitorHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(command_buffer.max(1));
    let task = tokio::spawn(run_monitor(monitor, inbox, rx));
    (MonitorHandle { tx }, task)
}

async fn run_monitor(
    mut monitor: HeadingAccuracyMonitor,
    mut inbox: ReadingInbox,
    mut commands: mpsc::Receiver<Command>,
) {
    info!("[service] monitor task running");

    loop {
        tokio::select! {
            // Commands first so a stop is never starved by a busy source
            biased;
            command = commands.recv() => match command {
                Some(command) => {
                    if !handle_command(&mut monitor, command).await {
                        break;
                    }
                }
                None => {
                    debug!("[service] all handles dropped");
                    break;
                }
            },
            Some(tagged) = inbox.recv() => {
                monitor.ingest(tagged);
            }
        }
    }

    // No-op if a Shutdown command already released the source
    monitor.shutdown().await;
    info!("[service] monitor task finished");
}

/// Apply one command. Returns false once the task should stop.
async fn handle_command(monitor: &mut HeadingAccuracyMonitor, command: Command) -> bool {
    // A caller that gave up on its reply is not an error
    match command {
        Command::Start { required, reply } => {
            let _ = reply.send(monitor.start_monitoring(required).await);
        }
        Command::Stop { reply } => {
            monitor.stop_monitoring().await;
            let _ = reply.send(monitor.state());
        }
        Command::GetCurrentAccuracy { reply } => {
            let _ = reply.send(monitor.get_current_accuracy());
        }
        Command::SimulateAccuracyChange {
            heading_accuracy,
            reply,
        } => {
            let result = monitor
                .simulate_accuracy_change(heading_accuracy)
                .map(|()| monitor.state());
            let _ = reply.send(result);
        }
        Command::Status { reply } => {
            let _ = reply.send(monitor.status());
        }
        Command::Shutdown { reply } => {
            monitor.shutdown().await;
            let _ = reply.send(());
            return false;
        }
    }
    true
}
