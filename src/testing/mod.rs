//! Scenario test runner
//!
//! Reads YAML test scenarios and runs them against an in-process DAP
//! session, asserting on structured protocol data rather than on
//! printed text.

mod config;
mod runner;

pub use config::*;
pub use runner::{run_scenario, run_scenarios, TestResult};
