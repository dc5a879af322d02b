#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod proxy;
pub mod ratelimit;
pub mod telemetry;
pub mod tenant;
pub mod usage;

pub use config::{load_from_path, Config, Service};
pub use error::{GatewayError, Result};
pub use proxy::{run, Collaborators, Gateway};
