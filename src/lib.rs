// Public modules
pub mod accuracy;
pub mod config;
pub mod envelope;
pub mod errors;
pub mod grpc_service;
pub mod messages;
pub mod monitor;
pub mod service;
pub mod sources;

// Re-export commonly used types
pub use config::{load_hub_config, HubConfig};
pub use errors::{MonitorError, MonitorResult};
pub use grpc_service::{create_grpc_server, CompassAccuracyService};
pub use messages::{AccuracyLevel, HeadingReading, MonitorEvent};
pub use monitor::{HeadingAccuracyMonitor, MonitorState};
pub use service::{spawn_monitor, MonitorHandle};
pub use sources::{create_heading_source, HeadingSource};

use std::net::SocketAddr;
use tonic::transport::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Initialize tracing with RUST_LOG support and an INFO default
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

/// Listen address from GRPC_HOST / GRPC_PORT
pub fn grpc_addr() -> errors::ServiceResult<SocketAddr> {
    let host = std::env::var("GRPC_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("GRPC_PORT").unwrap_or_else(|_| "50051".to_string());
    let addr = format!("{}:{}", host, port);
    addr.parse()
        .map_err(|_| errors::ServiceError::InvalidAddress { addr })
}

/// Run the compass accuracy hub with the given configuration directory
pub async fn run_compass_hub(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!("[CompassAccuracyHub] starting up...");

    let hub_config_path = format!("{}/monitor.toml", config_path);
    let hub_config = load_hub_config(&hub_config_path)?;
    info!(
        "[config] source '{}' (driver={}), required accuracy {}",
        hub_config.source.id, hub_config.source.driver, hub_config.monitor.required_accuracy
    );

    let source = create_heading_source(&hub_config.source)?;
    info!("[registry] heading source '{}' ready", source.id());

    let (monitor, inbox) = HeadingAccuracyMonitor::new(source, &hub_config.monitor);
    let (handle, monitor_task) = spawn_monitor(monitor, inbox, hub_config.monitor.command_buffer);
    info!("[main] monitor task launched");

    let addr = grpc_addr()?;
    let server = create_grpc_server(CompassAccuracyService::new(handle.clone()));
    info!("[gRPC] Server starting on {}", addr);

    let served = Server::builder()
        .add_service(server)
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("[main] shutdown signal received");
        })
        .await;

    // Release the source even when the server failed
    if handle.shutdown().await.is_ok() {
        let _ = monitor_task.await;
    }

    if let Err(e) = served {
        error!("[gRPC] Server failed: {}", e);
        return Err(Box::new(errors::ServiceError::from(e)));
    }

    info!("[main] stopped");
    Ok(())
}
