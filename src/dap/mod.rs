//! Debug Adapter Protocol (DAP) front end
//!
//! The server speaks DAP to editors over stdio or TCP and forwards requests
//! into a debug session. The client drives that server from the scenario
//! runner and the tests.

pub mod client;
pub mod codec;
pub mod server;
pub mod translate;
pub mod types;

pub use client::DapClient;
pub use server::{run_session, serve_listener, serve_stdio, serve_tcp};
pub use types::*;
