//! Line-oriented debugger REPL
//!
//! Reads one command per line and drives a debug session synchronously: a
//! control command waits for the resulting stop or termination and prints it
//! before the next prompt. Ctrl-C while the program runs sends `pause`.

mod parse;

pub use parse::{LineLocation, ReplCommand, HELP};

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::common::config::ReplConfig;
use crate::common::{paths, ErrorInfo, Result};
use crate::engine::{Evaluator, Location, SourceInput, StopReason};
use crate::session::{
    self, Breakpoint, Command, ExecutionEvent, LaunchConfig, Reply, Request, Router, SessionEvent,
    SessionState,
};

/// Run a REPL session over `input`/`output` until `quit`, end of input, or
/// termination of the program. Returns the program's exit code.
pub async fn run<E, R, W>(
    engine: E,
    launch: LaunchConfig,
    settings: &ReplConfig,
    input: R,
    output: W,
) -> Result<i64>
where
    E: Evaluator,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (router, execution_events, session_events) = session::spawn(engine)?;

    let mut sources = HashMap::new();
    if let SourceInput::Code { name, code } = &launch.source {
        sources.insert(PathBuf::from(name), code.lines().map(str::to_string).collect());
    }

    let mut repl = Repl {
        router,
        execution_events,
        session_events,
        input,
        output,
        prompt: settings.prompt.clone(),
        context_lines: settings.context_lines,
        sources,
        exit_code: 0,
    };

    let result = repl.run(launch).await;
    let exit_code = repl.exit_code;
    repl.router.shutdown().await;
    result.map(|_| exit_code)
}

struct Repl<R, W> {
    router: Router,
    execution_events: mpsc::UnboundedReceiver<ExecutionEvent>,
    session_events: mpsc::UnboundedReceiver<SessionEvent>,
    input: R,
    output: W,
    prompt: String,
    context_lines: usize,
    /// Source lines by normalized path, for stop listings
    sources: HashMap<PathBuf, Vec<String>>,
    exit_code: i64,
}

impl<R, W> Repl<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn run(&mut self, launch: LaunchConfig) -> Result<()> {
        let stop_on_entry = launch.stop_on_entry;
        match self.send(Command::Launch(launch)).await {
            Ok(Reply::Launched { program }) => {
                self.say(format!(
                    "Loaded {}. Type 'help' for commands, 'run' to start.",
                    program.display()
                ))
                .await?;
            }
            Ok(_) => {}
            Err(e) => {
                self.error(&e).await?;
                self.exit_code = 1;
                return Ok(());
            }
        }
        self.drain().await?;

        if stop_on_entry {
            self.control(Command::ConfigurationDone).await?;
        }

        let mut line = String::new();
        while self.router.state() != SessionState::Terminated {
            let prompt = self.prompt.clone();
            self.write(&prompt).await?;
            line.clear();
            if self.input.read_line(&mut line).await? == 0 {
                self.write("\n").await?;
                break;
            }

            let command = match ReplCommand::parse(&line) {
                Ok(command) => command,
                Err(e) => {
                    self.error(&ErrorInfo::from(&e)).await?;
                    continue;
                }
            };

            tracing::debug!(?command, "REPL command");
            if command == ReplCommand::Quit {
                break;
            }
            self.execute(command).await?;
        }

        if self.router.state() != SessionState::Terminated {
            self.send(Command::Disconnect).await.ok();
            self.drain().await?;
        }
        Ok(())
    }

    async fn execute(&mut self, command: ReplCommand) -> Result<()> {
        match command {
            ReplCommand::Empty | ReplCommand::Quit => Ok(()),
            ReplCommand::Help => self.say(HELP).await,

            // === Breakpoints ===
            ReplCommand::Break(location) => {
                let Some((file, line)) = self.resolve(&location) else {
                    return self.say("error: no program loaded").await;
                };
                let mut lines = self.lines_of(&file);
                lines.insert(line);
                match self.set_breakpoints(&file, lines).await {
                    Ok(breakpoints) => {
                        for bp in breakpoints.iter().filter(|bp| bp.line == line) {
                            let text = describe_breakpoint(bp);
                            self.say(format!("Breakpoint {}", text)).await?;
                        }
                        Ok(())
                    }
                    Err(e) => self.error(&e).await,
                }
            }

            ReplCommand::Clear(None) => {
                let files: BTreeSet<PathBuf> =
                    self.router.breakpoints().into_iter().map(|bp| bp.file).collect();
                for file in files {
                    if let Err(e) = self.set_breakpoints(&file, BTreeSet::new()).await {
                        return self.error(&e).await;
                    }
                }
                self.say("All breakpoints removed").await
            }

            ReplCommand::Clear(Some(location)) => {
                let Some((file, line)) = self.resolve(&location) else {
                    return self.say("error: no program loaded").await;
                };
                let mut lines = self.lines_of(&file);
                if !lines.remove(&line) {
                    return self
                        .say(format!("No breakpoint at {}:{}", file.display(), line))
                        .await;
                }
                match self.set_breakpoints(&file, lines).await {
                    Ok(_) => {
                        self.say(format!("Breakpoint at {}:{} removed", file.display(), line))
                            .await
                    }
                    Err(e) => self.error(&e).await,
                }
            }

            ReplCommand::Breakpoints => {
                let breakpoints = self.router.breakpoints();
                if breakpoints.is_empty() {
                    return self.say("No breakpoints set").await;
                }
                let mut text = String::from("Breakpoints:");
                for bp in &breakpoints {
                    let _ = write!(text, "\n  {}", describe_breakpoint(bp));
                }
                self.say(text).await
            }

            // === Execution Control ===
            ReplCommand::Run => self.control(Command::ConfigurationDone).await,
            ReplCommand::Continue => self.control(Command::Continue).await,
            ReplCommand::Next => self.control(Command::Next).await,
            ReplCommand::Step => self.control(Command::StepIn).await,
            ReplCommand::Finish => self.control(Command::StepOut).await,
            ReplCommand::Pause => match self.send(Command::Pause).await {
                Ok(_) => self.say("Pausing execution...").await,
                Err(e) => self.error(&e).await,
            },

            // === State Inspection ===
            ReplCommand::Backtrace => {
                let frames = match self.send(stack_trace()).await {
                    Ok(Reply::StackTrace { frames, .. }) => frames,
                    Ok(_) => Vec::new(),
                    Err(e) => return self.error(&e).await,
                };
                if frames.is_empty() {
                    return self.say("No stack frames").await;
                }
                let mut text = String::new();
                for (i, frame) in frames.iter().enumerate() {
                    if i > 0 {
                        text.push('\n');
                    }
                    let _ = write!(
                        text,
                        "#{} {} at {} (frame {})",
                        i, frame.name, frame.location, frame.id
                    );
                }
                self.say(text).await
            }

            ReplCommand::Scopes(frame_id) => match self.send(Command::Scopes { frame_id }).await {
                Ok(Reply::Scopes(scopes)) => {
                    let mut text = String::new();
                    for (i, scope) in scopes.iter().enumerate() {
                        if i > 0 {
                            text.push('\n');
                        }
                        let _ = write!(text, "  {} (vars {})", scope.name, scope.variables_reference);
                    }
                    self.say(text).await
                }
                Ok(_) => Ok(()),
                Err(e) => self.error(&e).await,
            },

            ReplCommand::Vars(reference) => self.print_variables(reference).await,

            ReplCommand::Locals => {
                let frame_id = match self.send(stack_trace()).await {
                    Ok(Reply::StackTrace { frames, .. }) => frames.first().map(|f| f.id),
                    Ok(_) => None,
                    Err(e) => return self.error(&e).await,
                };
                let Some(frame_id) = frame_id else {
                    return self.say("No stack frames").await;
                };
                let scope = match self.send(Command::Scopes { frame_id }).await {
                    Ok(Reply::Scopes(scopes)) => scopes.into_iter().next(),
                    Ok(_) => None,
                    Err(e) => return self.error(&e).await,
                };
                match scope {
                    Some(scope) => self.print_variables(scope.variables_reference).await,
                    None => self.say("No local variables").await,
                }
            }

            ReplCommand::Print(expression) => {
                let command = Command::Evaluate {
                    expression,
                    frame_id: None,
                };
                match self.send(command).await {
                    Ok(Reply::Evaluated(result)) => self.say(result.value).await,
                    Ok(_) => Ok(()),
                    Err(e) => self.error(&e).await,
                }
            }
        }
    }

    async fn print_variables(&mut self, reference: i64) -> Result<()> {
        let variables = match self.send(Command::Variables { reference }).await {
            Ok(Reply::Variables(variables)) => variables,
            Ok(_) => Vec::new(),
            Err(e) => return self.error(&e).await,
        };
        if variables.is_empty() {
            return self.say("No variables").await;
        }

        let mut text = String::new();
        for (i, var) in variables.iter().enumerate() {
            if i > 0 {
                text.push('\n');
            }
            let _ = write!(text, "  {} = {}", var.name, var.value);
            if let Some(type_name) = &var.type_name {
                let _ = write!(text, " ({})", type_name);
            }
            if var.variables_reference > 0 {
                let _ = write!(text, " [vars {}]", var.variables_reference);
            }
        }
        self.say(text).await
    }

    /// Send a resuming command and wait for the stop or termination it causes
    async fn control(&mut self, command: Command) -> Result<()> {
        if let Err(e) = self.send(command).await {
            return self.error(&e).await;
        }
        self.drain().await?;

        while self.router.state() == SessionState::Running {
            tokio::select! {
                event = self.execution_events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    self.router.on_execution_event(event).await;
                    self.drain().await?;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupt received, pausing");
                    if let Err(e) = self.send(Command::Pause).await {
                        self.error(&e).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn send(&mut self, command: Command) -> std::result::Result<Reply, ErrorInfo> {
        self.router.dispatch(Request::new(command)).await.outcome
    }

    async fn set_breakpoints(
        &mut self,
        file: &Path,
        lines: BTreeSet<u32>,
    ) -> std::result::Result<Vec<Breakpoint>, ErrorInfo> {
        let command = Command::SetBreakpoints {
            file: file.to_path_buf(),
            lines: lines.into_iter().collect(),
        };
        match self.send(command).await? {
            Reply::Breakpoints(breakpoints) => Ok(breakpoints),
            _ => Ok(Vec::new()),
        }
    }

    fn resolve(&self, location: &LineLocation) -> Option<(PathBuf, u32)> {
        match location {
            LineLocation::Line(line) => self.router.program().map(|p| (p.to_path_buf(), *line)),
            LineLocation::FileLine { file, line } => Some((paths::normalize(file), *line)),
        }
    }

    fn lines_of(&self, file: &Path) -> BTreeSet<u32> {
        self.router
            .breakpoints()
            .into_iter()
            .filter(|bp| bp.file == file)
            .map(|bp| bp.line)
            .collect()
    }

    /// Print every pending session event
    async fn drain(&mut self) -> Result<()> {
        while let Ok(event) = self.session_events.try_recv() {
            match event {
                SessionEvent::Initialized => {}
                SessionEvent::Stopped {
                    reason,
                    description,
                    location,
                    hit_breakpoint_ids,
                } => {
                    let text = self.describe_stop(reason, description, &location, &hit_breakpoint_ids);
                    self.say(text).await?;
                }
                SessionEvent::Output { output, .. } => self.write(&output).await?,
                SessionEvent::BreakpointChanged(bp) => {
                    self.say(format!("Breakpoint changed: {}", describe_breakpoint(&bp)))
                        .await?;
                }
                SessionEvent::Exited { exit_code } => {
                    self.exit_code = exit_code;
                }
                SessionEvent::Terminated => {
                    self.say("Program terminated").await?;
                }
            }
        }
        Ok(())
    }

    fn describe_stop(
        &mut self,
        reason: StopReason,
        description: Option<String>,
        location: &Location,
        hit_breakpoint_ids: &[u32],
    ) -> String {
        let mut text = match reason {
            StopReason::Breakpoint if !hit_breakpoint_ids.is_empty() => {
                let ids: Vec<String> = hit_breakpoint_ids.iter().map(u32::to_string).collect();
                format!("Stopped at breakpoint {} at {}", ids.join(", "), location)
            }
            StopReason::Breakpoint => format!("Stopped at breakpoint at {}", location),
            StopReason::Step => format!("Step completed at {}", location),
            StopReason::Pause => format!("Paused at {}", location),
            StopReason::Entry => format!("Stopped at entry point {}", location),
            StopReason::Exception => format!(
                "Stopped on error at {}: {}",
                location,
                description.as_deref().unwrap_or("unknown error")
            ),
        };

        let current = location.line as usize;
        let first = current.saturating_sub(self.context_lines).max(1);
        let last = current + self.context_lines;
        if let Some(lines) = self.source(&location.file) {
            for number in first..=last.min(lines.len()) {
                let marker = if number == current { "->" } else { "  " };
                let _ = write!(text, "\n{} {:>4} | {}", marker, number, lines[number - 1]);
            }
        }
        text
    }

    /// Lines of a source file, read once and cached
    fn source(&mut self, file: &Path) -> Option<&Vec<String>> {
        if !self.sources.contains_key(file) {
            let content = std::fs::read_to_string(file).ok()?;
            self.sources.insert(
                file.to_path_buf(),
                content.lines().map(str::to_string).collect(),
            );
        }
        self.sources.get(file)
    }

    async fn error(&mut self, error: &ErrorInfo) -> Result<()> {
        self.say(format!("error: {}", error.message)).await
    }

    async fn say(&mut self, text: impl AsRef<str>) -> Result<()> {
        let mut line = text.as_ref().to_string();
        line.push('\n');
        self.write(&line).await
    }

    async fn write(&mut self, text: &str) -> Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.flush().await?;
        Ok(())
    }
}

fn stack_trace() -> Command {
    Command::StackTrace {
        start_frame: 0,
        levels: None,
    }
}

fn describe_breakpoint(bp: &Breakpoint) -> String {
    let mut text = format!("{} at {}:{}", bp.id, bp.file.display(), bp.line);
    if !bp.verified {
        let _ = write!(
            text,
            " (unverified: {})",
            bp.message.as_deref().unwrap_or("no executable statement")
        );
    }
    text
}
