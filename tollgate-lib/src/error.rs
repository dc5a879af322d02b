use thiserror::Error;

/// Errors that can occur while building or running the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),

    #[error("Counter store error: {0}")]
    CounterStore(#[from] crate::ratelimit::CounterStoreError),

    #[error("Usage sink error: {0}")]
    Sink(#[from] crate::usage::SinkError),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("No services configured")]
    NoServices,
}

pub type Result<T> = std::result::Result<T, GatewayError>;
