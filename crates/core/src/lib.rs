// Jobpool Core - Domain Logic, Ports & Worker Pool
// NO infrastructure dependencies: stores and binaries live in adapter crates

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
