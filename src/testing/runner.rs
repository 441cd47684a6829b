//! Test runner implementation
//!
//! Executes test scenarios against an in-process DAP session, driving it
//! through [`DapClient`] over an in-memory stream, so assertions are made
//! against protocol data rather than printed text.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use colored::Colorize;
use serde_json::{json, Value};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

use crate::common::{paths, Error, Result};
use crate::dap::{
    self, DapClient, EvaluateResponseBody, Event, LaunchArguments, ResponseMessage, StackFrame,
    Variable,
};
use crate::engine::OutlineEngine;
use crate::repl::{LineLocation, ReplCommand};
use crate::session::protocol::THREAD_ID;

use super::config::{
    CommandExpectation, EvaluateExpectation, FrameAssertion, StopExpectation, TestScenario,
    TestStep, VariableAssertion,
};

type Client = DapClient<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// Result of a test run
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub steps_run: usize,
    pub steps_total: usize,
    pub error: Option<String>,
}

/// Scenario state shared between steps
struct Runner {
    client: Client,
    program: PathBuf,
    /// Breakpoint lines per file, so `break` adds instead of replacing
    breakpoints: HashMap<PathBuf, BTreeSet<u32>>,
    await_timeout: u64,
    verbose: bool,
}

/// Run every scenario; returns whether all of them passed
pub async fn run_scenarios(paths: &[PathBuf], verbose: bool, await_timeout: u64) -> Result<bool> {
    let mut results = Vec::new();
    for path in paths {
        let result = match run_scenario(path, verbose, await_timeout).await {
            Ok(result) => result,
            Err(e) => TestResult {
                name: path.display().to_string(),
                passed: false,
                steps_run: 0,
                steps_total: 0,
                error: Some(e.to_string()),
            },
        };
        if let Some(error) = result.error.as_ref().filter(|_| !result.passed) {
            println!("\n{} {}\n  {}", "✗".red().bold(), "Test Failed".red().bold(), error);
        }
        results.push(result);
    }

    let passed = results.iter().filter(|r| r.passed).count();
    let summary = format!("{}/{} scenarios passed", passed, results.len());
    if passed == results.len() {
        println!("{}", summary.green().bold());
    } else {
        println!("{}", summary.red().bold());
        for result in results.iter().filter(|r| !r.passed) {
            println!(
                "  {} {} (step {}/{})",
                "✗".red(),
                result.name,
                result.steps_run,
                result.steps_total
            );
        }
    }
    Ok(passed == results.len())
}

/// Run a test scenario from a YAML file
pub async fn run_scenario(path: &Path, verbose: bool, await_timeout: u64) -> Result<TestResult> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read test scenario '{}': {}",
            path.display(),
            e
        ))
    })?;

    let scenario: TestScenario = serde_yaml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse test scenario: {}", e)))?;

    let steps_total = scenario.steps.len();

    println!(
        "\n{} {}",
        "Running Test:".blue().bold(),
        scenario.name.white().bold()
    );
    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }

    // Paths in a scenario are relative to the scenario file
    let scenario_dir = path.parent().unwrap_or(Path::new("."));
    let resolve = |p: &Path| {
        if p.is_relative() {
            scenario_dir.join(p)
        } else {
            p.to_path_buf()
        }
    };
    let program = paths::normalize(&resolve(&scenario.target.program));

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server_io);
    let session = tokio::spawn(dap::run_session(
        server_read,
        server_write,
        OutlineEngine::new(),
    ));
    let (client_read, client_write) = tokio::io::split(client_io);

    let mut runner = Runner {
        client: DapClient::new(client_read, client_write),
        program: program.clone(),
        breakpoints: HashMap::new(),
        await_timeout,
        verbose,
    };

    println!("\n{}", "Starting debug session...".cyan());
    let launch = LaunchArguments {
        program: program.display().to_string(),
        jpath: scenario
            .target
            .jpath
            .iter()
            .map(|p| resolve(p).display().to_string())
            .collect(),
        ext_vars: None,
        ext_code: scenario.target.ext_code.clone(),
        tla_code: scenario.target.tla_code.clone(),
        stop_on_entry: scenario.target.stop_on_entry,
    };
    runner.client.initialize("jsonnet-debugger-test").await?;
    runner.client.launch(launch).await?;
    runner.client.wait_event("initialized").await?;
    if verbose {
        println!("  Program: {}", program.display().to_string().dimmed());
    }
    println!("  {} Session started", "✓".green());

    println!("\n{}", "Steps:".cyan());
    let mut failure = None;
    let mut steps_run = 0;
    for (i, step) in scenario.steps.iter().enumerate() {
        let step_num = i + 1;
        steps_run = step_num;
        if let Err(e) = runner.execute_step(step, step_num).await {
            println!("  {} Step {}: {}", "✗".red(), step_num, e);
            failure = Some(e.to_string());
            break;
        }
    }

    // Cleanup: end the debug session
    let _ = runner.client.request_raw("disconnect", None).await;
    drop(runner);
    match session.await {
        Ok(Err(e)) => tracing::warn!(error = %e, "Scenario session failed"),
        Err(e) => tracing::warn!(error = %e, "Scenario session panicked"),
        Ok(Ok(())) => {}
    }

    if failure.is_none() {
        println!(
            "\n{} {}\n",
            "✓".green().bold(),
            "Test Passed".green().bold()
        );
    }

    Ok(TestResult {
        name: scenario.name,
        passed: failure.is_none(),
        steps_run,
        steps_total,
        error: failure,
    })
}

impl Runner {
    async fn execute_step(&mut self, step: &TestStep, step_num: usize) -> Result<()> {
        match step {
            TestStep::Command { command, expect } => {
                self.command_step(command, expect.as_ref(), step_num).await
            }
            TestStep::Await { timeout, expect } => {
                self.await_step(*timeout, expect.as_ref(), step_num).await
            }
            TestStep::InspectLocals { asserts } => self.inspect_locals_step(asserts, step_num).await,
            TestStep::InspectStack { asserts } => self.inspect_stack_step(asserts, step_num).await,
            TestStep::CheckOutput { contains, equals } => {
                self.check_output_step(contains.as_deref(), equals.as_deref(), step_num)
            }
            TestStep::Evaluate { expression, expect } => {
                self.evaluate_step(expression, expect.as_ref(), step_num).await
            }
        }
    }

    /// Execute a command step
    async fn command_step(
        &mut self,
        command_str: &str,
        expect: Option<&CommandExpectation>,
        step_num: usize,
    ) -> Result<()> {
        let command = ReplCommand::parse(command_str)?;
        let Some((name, arguments)) = self.to_request(&command)? else {
            return Err(Error::Config(format!(
                "'{}' is not a scenario command",
                command_str
            )));
        };

        let response = self.client.request_raw(name, arguments).await?;
        if response.success {
            self.track(&command);
        }

        let expect_success = expect.and_then(|e| e.success).unwrap_or(true);
        if response.success != expect_success {
            return Err(Error::TestAssertion(format!(
                "Command '{}' expected success={}, got success={}{}",
                command_str,
                expect_success,
                response.success,
                failure_text(&response)
            )));
        }

        if let Some(code) = expect.and_then(|e| e.error_code.as_ref()) {
            let actual = response.message.as_deref().unwrap_or("");
            if actual != code {
                return Err(Error::TestAssertion(format!(
                    "Command '{}' expected error code '{}', got '{}'",
                    command_str, code, actual
                )));
            }
        }

        let note = if response.success { "" } else { " (expected failure)" };
        println!(
            "  {} Step {}: {}{}",
            "✓".green(),
            step_num,
            command_str.dimmed(),
            note
        );
        if self.verbose {
            if let Some(body) = &response.body {
                println!("      {}", body.to_string().dimmed());
            }
        }
        Ok(())
    }

    /// Map a REPL command onto a DAP request
    fn to_request(&self, command: &ReplCommand) -> Result<Option<(&'static str, Option<Value>)>> {
        let thread = Some(json!({ "threadId": THREAD_ID }));
        let request = match command {
            ReplCommand::Break(location) => {
                let (file, line) = self.resolve(location);
                let mut lines = self.breakpoints.get(&file).cloned().unwrap_or_default();
                lines.insert(line);
                ("setBreakpoints", Some(set_breakpoints_args(&file, &lines)))
            }
            ReplCommand::Clear(Some(location)) => {
                let (file, line) = self.resolve(location);
                let mut lines = self.breakpoints.get(&file).cloned().unwrap_or_default();
                lines.remove(&line);
                ("setBreakpoints", Some(set_breakpoints_args(&file, &lines)))
            }
            ReplCommand::Clear(None) => (
                "setBreakpoints",
                Some(set_breakpoints_args(&self.program, &BTreeSet::new())),
            ),
            ReplCommand::Run => ("configurationDone", None),
            ReplCommand::Continue => ("continue", thread),
            ReplCommand::Next => ("next", thread),
            ReplCommand::Step => ("stepIn", thread),
            ReplCommand::Finish => ("stepOut", thread),
            ReplCommand::Pause => ("pause", thread),
            ReplCommand::Backtrace => ("stackTrace", thread),
            ReplCommand::Scopes(frame_id) => ("scopes", Some(json!({ "frameId": frame_id }))),
            ReplCommand::Vars(reference) => (
                "variables",
                Some(json!({ "variablesReference": reference })),
            ),
            ReplCommand::Print(expression) => (
                "evaluate",
                Some(json!({ "expression": expression, "context": "repl" })),
            ),
            ReplCommand::Quit => ("disconnect", None),
            ReplCommand::Breakpoints
            | ReplCommand::Locals
            | ReplCommand::Help
            | ReplCommand::Empty => return Ok(None),
        };
        Ok(Some(request))
    }

    /// Remember breakpoint lines once the session accepted them
    fn track(&mut self, command: &ReplCommand) {
        match command {
            ReplCommand::Break(location) => {
                let (file, line) = self.resolve(location);
                self.breakpoints.entry(file).or_default().insert(line);
            }
            ReplCommand::Clear(Some(location)) => {
                let (file, line) = self.resolve(location);
                if let Some(lines) = self.breakpoints.get_mut(&file) {
                    lines.remove(&line);
                }
            }
            ReplCommand::Clear(None) => {
                self.breakpoints.remove(&self.program);
            }
            _ => {}
        }
    }

    fn resolve(&self, location: &LineLocation) -> (PathBuf, u32) {
        match location {
            LineLocation::Line(line) => (self.program.clone(), *line),
            LineLocation::FileLine { file, line } => (paths::normalize(file), *line),
        }
    }

    /// Execute an await step
    async fn await_step(
        &mut self,
        timeout: Option<u64>,
        expect: Option<&StopExpectation>,
        step_num: usize,
    ) -> Result<()> {
        let timeout_secs = timeout.unwrap_or(self.await_timeout);
        let event = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.client.wait_stopped_or_terminated(),
        )
        .await
        .map_err(|_| Error::Timeout(timeout_secs))??;

        let (reason, description) = match &event {
            Event::Stopped(body) => (body.reason.clone(), body.description.clone()),
            _ => ("terminated".to_string(), None),
        };

        let mut location = "end of program".to_string();
        let mut top: Option<StackFrame> = None;
        if matches!(event, Event::Stopped(_)) {
            top = self.stack().await?.into_iter().next();
            if let Some(frame) = &top {
                location = format!("{}:{}", frame_file(frame), frame.line);
            }
        }

        if let Some(exp) = expect {
            if let Some(expected_reason) = &exp.reason {
                let matches = reason == *expected_reason
                    || (reason == "terminated" && expected_reason == "exited");
                if !matches {
                    return Err(Error::TestAssertion(format!(
                        "Expected stop reason '{}', got '{}'{}",
                        expected_reason,
                        reason,
                        description.map(|d| format!(" ({})", d)).unwrap_or_default()
                    )));
                }
            }

            if let Some(expected_file) = &exp.file {
                let actual_file = top.as_ref().map(frame_file).unwrap_or_default();
                if !actual_file.contains(expected_file.as_str()) {
                    return Err(Error::TestAssertion(format!(
                        "Expected file '{}', got '{}'",
                        expected_file, actual_file
                    )));
                }
            }

            if let Some(expected_line) = exp.line {
                let actual_line = top.as_ref().map(|f| f.line).unwrap_or(0);
                if expected_line != actual_line {
                    return Err(Error::TestAssertion(format!(
                        "Expected line {}, got {}",
                        expected_line, actual_line
                    )));
                }
            }

            if let Some(expected_code) = exp.exit_code {
                let actual = self.client.exit_code();
                if actual != Some(expected_code) {
                    return Err(Error::TestAssertion(format!(
                        "Expected exit code {}, got {:?}",
                        expected_code, actual
                    )));
                }
            }
        }

        println!(
            "  {} Step {}: await ({} at {})",
            "✓".green(),
            step_num,
            reason.dimmed(),
            location.dimmed()
        );
        Ok(())
    }

    /// Execute an inspect locals step
    async fn inspect_locals_step(
        &mut self,
        asserts: &[VariableAssertion],
        step_num: usize,
    ) -> Result<()> {
        let frame = self
            .stack()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::TestAssertion("No stack frames".to_string()))?;
        let scopes = self.client.scopes(frame.id).await?;
        let scope = scopes
            .first()
            .ok_or_else(|| Error::TestAssertion("Frame has no scopes".to_string()))?;
        let vars: Vec<Variable> = self.client.variables(scope.variables_reference).await?;

        for assertion in asserts {
            let Some(v) = vars.iter().find(|v| v.name == assertion.name) else {
                let available: Vec<&str> = vars.iter().map(|v| v.name.as_str()).collect();
                return Err(Error::TestAssertion(format!(
                    "Variable '{}' not found. Available: {:?}",
                    assertion.name, available
                )));
            };

            if let Some(expected_value) = &assertion.value {
                if &v.value != expected_value {
                    return Err(Error::TestAssertion(format!(
                        "Variable '{}': expected value '{}', got '{}'",
                        assertion.name, expected_value, v.value
                    )));
                }
            }

            if let Some(expected_substr) = &assertion.value_contains {
                if !v.value.contains(expected_substr.as_str()) {
                    return Err(Error::TestAssertion(format!(
                        "Variable '{}': expected value containing '{}', got '{}'",
                        assertion.name, expected_substr, v.value
                    )));
                }
            }

            if let Some(expected_type) = &assertion.type_name {
                let actual_type = v.type_name.as_deref().unwrap_or("");
                if actual_type != expected_type {
                    return Err(Error::TestAssertion(format!(
                        "Variable '{}': expected type '{}', got '{}'",
                        assertion.name, expected_type, actual_type
                    )));
                }
            }
        }

        let checked: Vec<&str> = asserts.iter().map(|a| a.name.as_str()).collect();
        println!(
            "  {} Step {}: inspect locals ({:?})",
            "✓".green(),
            step_num,
            checked
        );
        Ok(())
    }

    /// Execute an inspect stack step
    async fn inspect_stack_step(&mut self, asserts: &[FrameAssertion], step_num: usize) -> Result<()> {
        let frames = self.stack().await?;

        for assertion in asserts {
            let Some(frame) = frames.get(assertion.index) else {
                return Err(Error::TestAssertion(format!(
                    "Frame {} does not exist (only {} frames)",
                    assertion.index,
                    frames.len()
                )));
            };

            if let Some(expected_name) = &assertion.name {
                if !frame.name.contains(expected_name.as_str()) {
                    return Err(Error::TestAssertion(format!(
                        "Frame {}: expected name '{}', got '{}'",
                        assertion.index, expected_name, frame.name
                    )));
                }
            }

            if let Some(expected_file) = &assertion.file {
                let actual_file = frame_file(frame);
                if !actual_file.contains(expected_file.as_str()) {
                    return Err(Error::TestAssertion(format!(
                        "Frame {}: expected file '{}', got '{}'",
                        assertion.index, expected_file, actual_file
                    )));
                }
            }

            if let Some(expected_line) = assertion.line {
                if expected_line != frame.line {
                    return Err(Error::TestAssertion(format!(
                        "Frame {}: expected line {}, got {}",
                        assertion.index, expected_line, frame.line
                    )));
                }
            }
        }

        println!(
            "  {} Step {}: inspect stack ({} frames checked)",
            "✓".green(),
            step_num,
            asserts.len()
        );
        Ok(())
    }

    /// Execute a check output step
    fn check_output_step(
        &self,
        contains: Option<&str>,
        equals: Option<&str>,
        step_num: usize,
    ) -> Result<()> {
        let output = self.client.output();

        if let Some(expected_substr) = contains {
            if !output.contains(expected_substr) {
                return Err(Error::TestAssertion(format!(
                    "Output does not contain '{}'. Got: '{}'",
                    expected_substr,
                    truncate(output, 200)
                )));
            }
        }

        if let Some(expected_exact) = equals {
            if output.trim() != expected_exact.trim() {
                return Err(Error::TestAssertion(format!(
                    "Output mismatch. Expected: '{}', got: '{}'",
                    expected_exact, output
                )));
            }
        }

        println!("  {} Step {}: check output", "✓".green(), step_num);
        Ok(())
    }

    /// Execute an evaluate step
    async fn evaluate_step(
        &mut self,
        expression: &str,
        expect: Option<&EvaluateExpectation>,
        step_num: usize,
    ) -> Result<()> {
        let response = self
            .client
            .request_raw(
                "evaluate",
                Some(json!({ "expression": expression, "context": "watch" })),
            )
            .await?;

        let expect_success = expect.and_then(|e| e.success).unwrap_or(true);
        if !expect_success {
            if response.success {
                return Err(Error::TestAssertion(format!(
                    "Evaluate '{}': expected failure but it succeeded",
                    expression
                )));
            }
            println!(
                "  {} Step {}: evaluate '{}' (expected failure)",
                "✓".green(),
                step_num,
                expression.dimmed()
            );
            return Ok(());
        }

        if !response.success {
            return Err(Error::TestAssertion(format!(
                "Evaluate '{}' failed{}",
                expression,
                failure_text(&response)
            )));
        }
        let eval_result: EvaluateResponseBody =
            serde_json::from_value(response.body.unwrap_or(Value::Null)).map_err(|e| {
                Error::TestAssertion(format!("Failed to parse evaluate result: {}", e))
            })?;

        if let Some(exp) = expect {
            if let Some(expected_result) = &exp.result {
                if &eval_result.result != expected_result {
                    return Err(Error::TestAssertion(format!(
                        "Evaluate '{}': expected '{}', got '{}'",
                        expression, expected_result, eval_result.result
                    )));
                }
            }

            if let Some(expected_substr) = &exp.result_contains {
                if !eval_result.result.contains(expected_substr.as_str()) {
                    return Err(Error::TestAssertion(format!(
                        "Evaluate '{}': expected result containing '{}', got '{}'",
                        expression, expected_substr, eval_result.result
                    )));
                }
            }

            if let Some(expected_type) = &exp.type_name {
                let actual_type = eval_result.type_name.as_deref().unwrap_or("");
                if actual_type != expected_type {
                    return Err(Error::TestAssertion(format!(
                        "Evaluate '{}': expected type '{}', got '{}'",
                        expression, expected_type, actual_type
                    )));
                }
            }
        }

        println!(
            "  {} Step {}: evaluate '{}' = {}",
            "✓".green(),
            step_num,
            expression.dimmed(),
            eval_result.result.dimmed()
        );
        Ok(())
    }

    async fn stack(&mut self) -> Result<Vec<StackFrame>> {
        self.client.stack_trace().await
    }
}

fn set_breakpoints_args(file: &Path, lines: &BTreeSet<u32>) -> Value {
    let breakpoints: Vec<Value> = lines.iter().map(|line| json!({ "line": line })).collect();
    json!({
        "source": { "path": file.display().to_string() },
        "breakpoints": breakpoints,
    })
}

fn frame_file(frame: &StackFrame) -> String {
    frame
        .source
        .as_ref()
        .and_then(|s| s.path.clone().or_else(|| s.name.clone()))
        .unwrap_or_default()
}

fn failure_text(response: &ResponseMessage) -> String {
    let detail = response
        .body
        .as_ref()
        .and_then(|b| b.pointer("/error/format"))
        .and_then(Value::as_str);
    match (&response.message, detail) {
        (Some(code), Some(detail)) => format!(" ({}: {})", code, detail),
        (Some(code), None) => format!(" ({})", code),
        _ => String::new(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
