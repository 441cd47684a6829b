//! Jsonnet debugger
//!
//! A debug session protocol layer for Jsonnet programs: a state machine
//! accepting client commands, an execution controller owning the evaluator on
//! its own thread, and two front ends (a line-oriented REPL and a Debug
//! Adapter Protocol server) translating to one internal command model.

pub mod cli;
pub mod commands;
pub mod common;
pub mod dap;
pub mod engine;
pub mod repl;
pub mod session;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use session::{Command, Request, Response, Router, SessionEvent, SessionState};
