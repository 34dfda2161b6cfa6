pub mod command;
pub mod config;
pub mod cron;
pub mod error;
pub mod events;
pub mod integrity;
pub mod job;
pub mod log_sanitize;
pub mod logging;
pub mod packager;
pub mod pipeline;
pub mod producer;
pub mod retention;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use error::{Error, ErrorKind, Result};
