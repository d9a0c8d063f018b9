pub mod env;
pub mod config;
pub mod error;
pub mod record;
pub mod entity;
pub mod context;
pub mod request;
pub mod processor;
pub mod renderer;
pub mod failure;
pub mod logger;
pub mod bridge;
pub mod init;

#[cfg(feature = "axum")]
pub mod access_log;

pub use config::LoggingConfig;
pub use env::Environment;
pub use error::InitError;
pub use init::{configure_logger, configure_logger_with};
pub use logger::{Fields, Logger};
pub use record::{FieldValue, Level, LogEvent, Method};
