//! Test scenario configuration types
//!
//! Defines the data structures for deserializing YAML test scenarios.

use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;

/// A complete test scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct TestScenario {
    /// Name of the test scenario
    pub name: String,
    /// Optional description of what the test verifies
    pub description: Option<String>,
    /// The program to debug
    pub target: TargetConfig,
    /// The sequence of test steps to execute
    pub steps: Vec<TestStep>,
}

/// The program under test and its launch arguments
#[derive(Deserialize, Debug)]
pub struct TargetConfig {
    /// Path to the program, relative to the scenario file
    pub program: PathBuf,
    /// Library search directories, relative to the scenario file
    #[serde(default)]
    pub jpath: Vec<PathBuf>,
    /// External variables as a JSON object (values are code)
    pub ext_code: Option<Value>,
    /// Top-level arguments as a JSON object (values are code)
    pub tla_code: Option<Value>,
    /// Whether to stop at the first statement
    #[serde(default)]
    pub stop_on_entry: bool,
}

/// A single test step in the execution flow
#[derive(Deserialize, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Execute a debugger command, in REPL syntax (e.g. "break 3", "run")
    Command {
        command: String,
        expect: Option<CommandExpectation>,
    },
    /// Wait for the next stop or for termination
    Await {
        /// Timeout in seconds (default from config)
        timeout: Option<u64>,
        expect: Option<StopExpectation>,
    },
    /// Inspect variables of the innermost frame's first scope
    InspectLocals { asserts: Vec<VariableAssertion> },
    /// Inspect the call stack
    InspectStack { asserts: Vec<FrameAssertion> },
    /// Check everything the program printed so far
    CheckOutput {
        contains: Option<String>,
        equals: Option<String>,
    },
    /// Evaluate an expression in the innermost frame
    Evaluate {
        expression: String,
        expect: Option<EvaluateExpectation>,
    },
}

/// Expectations for a command result
#[derive(Deserialize, Debug)]
pub struct CommandExpectation {
    /// Whether the request should succeed
    pub success: Option<bool>,
    /// Error code of a failed request (e.g. "INVALID_STATE")
    pub error_code: Option<String>,
}

/// Expectations for a stop or termination
#[derive(Deserialize, Debug)]
pub struct StopExpectation {
    /// Stop reason ("breakpoint", "step", "entry", ...) or "terminated"
    pub reason: Option<String>,
    /// Source file of the top frame (partial match)
    pub file: Option<String>,
    /// Line of the top frame
    pub line: Option<u32>,
    /// Exit code, when the session terminated
    pub exit_code: Option<i64>,
}

/// Assertion for a variable
#[derive(Deserialize, Debug)]
pub struct VariableAssertion {
    pub name: String,
    /// Expected value (exact match)
    pub value: Option<String>,
    /// Expected value substring (partial match)
    pub value_contains: Option<String>,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
}

/// Assertion for a stack frame
#[derive(Deserialize, Debug)]
pub struct FrameAssertion {
    /// Frame index (0 = innermost)
    pub index: usize,
    /// Expected frame name (partial match)
    pub name: Option<String>,
    /// Expected source file (partial match)
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// Expectations for an evaluate result
#[derive(Deserialize, Debug)]
pub struct EvaluateExpectation {
    /// Whether the evaluation should succeed (default: true)
    pub success: Option<bool>,
    pub result: Option<String>,
    pub result_contains: Option<String>,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scenario() {
        let yaml = r#"
name: stop at a breakpoint
target:
  program: fixtures/basic.jsonnet
  ext_code:
    env: prod
steps:
  - action: command
    command: break 3
  - action: command
    command: run
  - action: await
    expect:
      reason: breakpoint
      line: 3
  - action: evaluate
    expression: std.extVar('env')
    expect:
      result: '"prod"'
      type: string
  - action: command
    command: pause
    expect:
      success: false
      error_code: INVALID_STATE
"#;
        let scenario: TestScenario = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(scenario.name, "stop at a breakpoint");
        assert_eq!(scenario.steps.len(), 5);
        assert!(!scenario.target.stop_on_entry);
        assert!(matches!(
            &scenario.steps[2],
            TestStep::Await { expect: Some(StopExpectation { line: Some(3), .. }), .. }
        ));
        assert!(matches!(
            &scenario.steps[4],
            TestStep::Command { expect: Some(CommandExpectation { success: Some(false), .. }), .. }
        ));
    }
}
