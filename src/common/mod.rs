//! Common utilities shared between the REPL and DAP front ends

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, ErrorInfo, Result};
