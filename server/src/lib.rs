//! Kawach server: configuration and wiring for the `kawach-server` binary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod dispatch;

pub use app::{App, build_app};
pub use config::{Config, ConfigError};
