use thiserror::Error;

/// Errors returned to callers of the monitor command surface
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    #[error("Heading source '{source_id}' unavailable: {reason}")]
    SensorUnavailable { source_id: String, reason: String },

    #[error("No heading reading available yet")]
    NoReadingAvailable,

    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("Invalid action: '{action}'")]
    InvalidAction { action: String },

    #[error("Monitor service is no longer running")]
    ServiceClosed,
}

/// Errors raised by heading sources
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Heading source '{source_id}' could not be acquired: {reason}")]
    Unavailable { source_id: String, reason: String },

    #[error("Unsupported heading source driver: '{driver}'")]
    UnsupportedDriver { driver: String },
}

impl From<SourceError> for MonitorError {
    fn from(error: SourceError) -> Self {
        match error {
            SourceError::Unavailable { source_id, reason } => {
                MonitorError::SensorUnavailable { source_id, reason }
            }
            SourceError::UnsupportedDriver { driver } => MonitorError::InvalidArgument {
                reason: format!("unsupported heading source driver '{}'", driver),
            },
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from '{path}': {source}")]
    LoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration format: {0}")]
    FormatError(#[from] toml::de::Error),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// gRPC service errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("gRPC server failed to start: {0}")]
    ServerStartError(#[from] tonic::transport::Error),

    #[error("Invalid listen address '{addr}'")]
    InvalidAddress { addr: String },
}

impl From<MonitorError> for tonic::Status {
    fn from(error: MonitorError) -> Self {
        let message = error.to_string();
        match error {
            MonitorError::SensorUnavailable { .. } => tonic::Status::unavailable(message),
            MonitorError::NoReadingAvailable => tonic::Status::failed_precondition(message),
            MonitorError::InvalidArgument { .. } | MonitorError::InvalidAction { .. } => {
                tonic::Status::invalid_argument(message)
            }
            MonitorError::ServiceClosed => tonic::Status::internal(message),
        }
    }
}

/// Result type aliases for convenience
pub type MonitorResult<T> = Result<T, MonitorError>;
pub type SourceResult<T> = Result<T, SourceError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type ServiceResult<T> = Result<T, ServiceError>;
