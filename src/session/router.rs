//! Request router
//!
//! Validates each command against the state machine, forwards it to the
//! execution controller, and shapes the reply. Session events (initialized,
//! stopped, output, exited, terminated) go out on a separate queue that the
//! transport drains after each response.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use crate::common::{paths, ErrorInfo, Result};
use crate::engine::{Halt, ResumeMode, StopReason};

use super::breakpoints::Breakpoint;
use super::controller::{ExecutionController, ExecutionEvent};
use super::protocol::{
    Command, OutputCategory, Reply, Request, Response, SessionEvent, ThreadInfo, THREAD_ID,
    THREAD_NAME,
};
use super::state::{SessionState, SessionStateMachine};

/// Maps commands onto the controller for one debug session
pub struct Router {
    state: SessionStateMachine,
    controller: ExecutionController,
    events: mpsc::UnboundedSender<SessionEvent>,
    program: Option<PathBuf>,
    stop_on_entry: bool,
}

impl Router {
    pub fn new(controller: ExecutionController, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            state: SessionStateMachine::new(),
            controller,
            events,
            program: None,
            stop_on_entry: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.state()
    }

    /// Normalized path of the loaded program
    pub fn program(&self) -> Option<&Path> {
        self.program.as_deref()
    }

    /// All breakpoints, ordered by id
    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.controller.breakpoints().list()
    }

    /// Handle one request
    pub async fn dispatch(&mut self, request: Request) -> Response {
        let command = request.command.name();
        let outcome = match self.handle(request.command).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                tracing::debug!(command, code = e.code(), error = %e, "Command failed");
                if e.is_fatal() {
                    self.finish(1, Some(e.to_string()));
                }
                Err(ErrorInfo::from(&e))
            }
        };

        Response {
            correlation: request.correlation,
            command,
            outcome,
        }
    }

    async fn handle(&mut self, command: Command) -> Result<Reply> {
        self.state.check(&command)?;

        match command {
            // === Session Management ===
            Command::Initialize { client_id } => {
                tracing::info!(client = client_id.as_deref().unwrap_or("unknown"), "Client connected");
                Ok(Reply::Capabilities)
            }

            Command::Launch(config) => {
                let stop_on_entry = config.stop_on_entry;
                let program = self.controller.load(config).await?;

                tracing::info!(program = %program.display(), stop_on_entry, "Program loaded");
                self.program = Some(program.clone());
                self.stop_on_entry = stop_on_entry;
                self.state.launched();
                self.emit(SessionEvent::Initialized);

                Ok(Reply::Launched { program })
            }

            Command::Disconnect => {
                if !self.controller.is_finished() {
                    self.controller.terminate();
                }
                self.finish(0, None);
                Ok(Reply::Disconnected)
            }

            // === Breakpoints ===
            Command::SetBreakpoints { file, lines } => {
                let file = paths::normalize(&file);
                let breakpoints = self.controller.set_breakpoints(file, lines).await?;
                Ok(Reply::Breakpoints(breakpoints))
            }

            Command::ConfigurationDone => {
                let mode = if self.stop_on_entry {
                    ResumeMode::Entry
                } else {
                    ResumeMode::Continue
                };
                self.resume(mode)?;
                Ok(Reply::Ack)
            }

            // === Execution Control ===
            Command::Continue => self.resume(ResumeMode::Continue).map(|_| Reply::Continued),
            Command::Next => self.resume(ResumeMode::StepOver).map(|_| Reply::Continued),
            Command::StepIn => self.resume(ResumeMode::StepIn).map(|_| Reply::Continued),
            Command::StepOut => self.resume(ResumeMode::StepOut).map(|_| Reply::Continued),

            Command::Pause => {
                self.controller.pause()?;
                Ok(Reply::Ack)
            }

            // === State Inspection ===
            Command::Threads => Ok(Reply::Threads(vec![ThreadInfo {
                id: THREAD_ID,
                name: THREAD_NAME.to_string(),
            }])),

            Command::StackTrace {
                start_frame,
                levels,
            } => {
                let frames = self.controller.stack_trace().await?;
                let total = frames.len();
                let levels = levels.filter(|l| *l > 0).unwrap_or(usize::MAX);
                let frames = frames.into_iter().skip(start_frame).take(levels).collect();
                Ok(Reply::StackTrace { frames, total })
            }

            Command::Scopes { frame_id } => {
                Ok(Reply::Scopes(self.controller.scopes(frame_id).await?))
            }

            Command::Variables { reference } => {
                Ok(Reply::Variables(self.controller.variables(reference).await?))
            }

            Command::Evaluate {
                expression,
                frame_id,
            } => Ok(Reply::Evaluated(
                self.controller.evaluate(expression, frame_id).await?,
            )),
        }
    }

    fn resume(&mut self, mode: ResumeMode) -> Result<()> {
        self.controller.resume(mode)?;
        self.state.resumed();
        Ok(())
    }

    /// React to a halt or failure reported by the execution thread
    pub async fn on_execution_event(&mut self, event: ExecutionEvent) {
        self.controller.on_event(&event);
        if self.state() == SessionState::Terminated {
            tracing::debug!(?event, "Ignoring execution event after termination");
            return;
        }

        match event {
            ExecutionEvent::Halted(Halt::Stopped {
                reason,
                location,
                description,
            }) => {
                match self.controller.apply_pending_breakpoints().await {
                    Ok(changed) => {
                        for bp in changed {
                            self.emit(SessionEvent::BreakpointChanged(bp));
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to apply queued breakpoints");
                        if e.is_fatal() {
                            self.finish(1, Some(e.to_string()));
                            return;
                        }
                    }
                }

                let hit_breakpoint_ids = if reason == StopReason::Breakpoint {
                    self.controller.hit_breakpoints(&location)
                } else {
                    Vec::new()
                };

                tracing::info!(%reason, %location, "Stopped");
                self.state.halted();
                self.emit(SessionEvent::Stopped {
                    reason,
                    description,
                    location,
                    hit_breakpoint_ids,
                });
            }
            ExecutionEvent::Halted(Halt::Finished { result }) => {
                if let Some(mut result) = result {
                    result.push('\n');
                    self.emit(SessionEvent::Output {
                        category: OutputCategory::Stdout,
                        output: result,
                    });
                }
                self.finish(0, None);
            }
            ExecutionEvent::Halted(Halt::Failed { message }) => {
                self.finish(1, Some(format!("RUNTIME ERROR: {}", message)));
            }
            ExecutionEvent::Halted(Halt::Interrupted) => {
                self.finish(0, None);
            }
            ExecutionEvent::Fatal(message) => {
                self.finish(1, Some(message));
            }
        }
    }

    /// Enter Terminated once, reporting `exited` and `terminated`
    fn finish(&mut self, exit_code: i64, diagnostic: Option<String>) {
        if !self.state.terminate() {
            return;
        }
        self.controller.terminate();

        if let Some(mut diagnostic) = diagnostic {
            tracing::warn!(%diagnostic, "Session ended with an error");
            diagnostic.push('\n');
            self.emit(SessionEvent::Output {
                category: OutputCategory::Stderr,
                output: diagnostic,
            });
        }
        tracing::info!(exit_code, "Session terminated");
        self.emit(SessionEvent::Exited { exit_code });
        self.emit(SessionEvent::Terminated);
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Session event dropped: no listener");
        }
    }

    /// Terminate the evaluator and wait for its thread
    pub async fn shutdown(self) {
        self.controller.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{OutlineEngine, SourceInput};
    use crate::session::protocol::LaunchConfig;
    use std::time::Duration;

    const PROGRAM: &str = "local a = 1;\nlocal b = 2;\n{\n  x: a,\n  y: b,\n}\n";

    struct Harness {
        router: Router,
        exec: mpsc::UnboundedReceiver<ExecutionEvent>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let (router, exec, events) = crate::session::spawn(OutlineEngine::new()).unwrap();
            Self {
                router,
                exec,
                events,
            }
        }

        async fn send(&mut self, command: Command) -> Response {
            self.router.dispatch(Request::new(command)).await
        }

        async fn launch(&mut self, stop_on_entry: bool) {
            let mut config = LaunchConfig::new(SourceInput::Code {
                name: "<cmdline>".to_string(),
                code: PROGRAM.to_string(),
            });
            config.stop_on_entry = stop_on_entry;
            let response = self.send(Command::Launch(config)).await;
            assert!(response.is_success(), "{:?}", response);
        }

        /// Feed the next execution event through the router
        async fn pump(&mut self) {
            let event = tokio::time::timeout(Duration::from_secs(5), self.exec.recv())
                .await
                .expect("timed out waiting for execution event")
                .expect("execution channel closed");
            self.router.on_execution_event(event).await;
        }

        fn drain(&mut self) -> Vec<SessionEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn error_code(response: &Response) -> &str {
        match &response.outcome {
            Err(info) => info.code.as_str(),
            Ok(reply) => panic!("Expected failure, got {:?}", reply),
        }
    }

    #[tokio::test]
    async fn test_breakpoint_stop_after_configuration() {
        let mut h = Harness::new();
        h.launch(false).await;
        assert_eq!(h.drain(), vec![SessionEvent::Initialized]);

        let response = h
            .send(Command::SetBreakpoints {
                file: PathBuf::from("<cmdline>"),
                lines: vec![4],
            })
            .await;
        assert!(response.is_success());

        h.send(Command::ConfigurationDone).await;
        assert_eq!(h.router.state(), SessionState::Running);
        h.pump().await;

        let events = h.drain();
        assert!(matches!(
            &events[..],
            [SessionEvent::Stopped { reason: StopReason::Breakpoint, location, hit_breakpoint_ids, .. }]
                if location.line == 4 && hit_breakpoint_ids == &vec![1]
        ));
        assert_eq!(h.router.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_pause_racing_a_stop_does_not_stop_next_run() {
        let mut h = Harness::new();
        h.launch(false).await;
        h.send(Command::SetBreakpoints {
            file: PathBuf::from("<cmdline>"),
            lines: vec![4],
        })
        .await;
        h.send(Command::ConfigurationDone).await;

        // The evaluator has already halted but the router has not seen it
        let halt = tokio::time::timeout(Duration::from_secs(5), h.exec.recv())
            .await
            .expect("timed out waiting for execution event")
            .expect("execution channel closed");
        let response = h.send(Command::Pause).await;
        assert!(response.is_success(), "{:?}", response);
        h.router.on_execution_event(halt).await;
        h.drain();

        let response = h.send(Command::Continue).await;
        assert!(response.is_success(), "{:?}", response);
        h.pump().await;

        let events = h.drain();
        assert!(
            !events.iter().any(|e| matches!(e, SessionEvent::Stopped { .. })),
            "{:?}",
            events
        );
        assert_eq!(
            events[events.len() - 2..],
            [SessionEvent::Exited { exit_code: 0 }, SessionEvent::Terminated]
        );
    }

    #[tokio::test]
    async fn test_breakpoints_set_while_running_apply_at_next_stop() {
        let mut h = Harness::new();
        h.launch(false).await;
        h.drain();
        h.send(Command::SetBreakpoints {
            file: PathBuf::from("<cmdline>"),
            lines: vec![4],
        })
        .await;
        h.send(Command::ConfigurationDone).await;

        let response = h
            .send(Command::SetBreakpoints {
                file: PathBuf::from("<cmdline>"),
                lines: vec![4, 5],
            })
            .await;
        let bps = match response.outcome {
            Ok(Reply::Breakpoints(bps)) => bps,
            other => panic!("Expected breakpoints, got {:?}", other),
        };
        assert_eq!(bps.len(), 2);
        assert_eq!(bps[0].id, 1);
        assert!(bps[0].verified);
        assert_eq!(bps[1].id, 2);
        assert!(!bps[1].verified);
        assert_eq!(bps[1].message.as_deref(), Some("pending"));

        h.pump().await;
        let events = h.drain();
        assert_eq!(events.len(), 3, "{:?}", events);
        assert!(matches!(
            &events[0],
            SessionEvent::BreakpointChanged(bp) if bp.id == 1 && bp.verified
        ));
        assert!(matches!(
            &events[1],
            SessionEvent::BreakpointChanged(bp) if bp.id == 2 && bp.verified && bp.message.is_none()
        ));
        assert!(matches!(
            &events[2],
            SessionEvent::Stopped { location, hit_breakpoint_ids, .. }
                if location.line == 4 && hit_breakpoint_ids == &vec![1]
        ));

        h.send(Command::Continue).await;
        h.pump().await;
        let events = h.drain();
        assert!(matches!(
            &events[..],
            [SessionEvent::Stopped { reason: StopReason::Breakpoint, location, hit_breakpoint_ids, .. }]
                if location.line == 5 && hit_breakpoint_ids == &vec![2]
        ));
    }

    #[tokio::test]
    async fn test_pause_while_configuring_is_rejected() {
        let mut h = Harness::new();
        h.launch(false).await;

        let response = h.send(Command::Pause).await;
        assert_eq!(error_code(&response), "INVALID_STATE");
        assert_eq!(h.router.state(), SessionState::Configuring);
    }

    #[tokio::test]
    async fn test_completion_reports_exit_and_termination() {
        let mut h = Harness::new();
        h.launch(false).await;
        h.drain();

        h.send(Command::ConfigurationDone).await;
        h.pump().await;

        let events = h.drain();
        assert_eq!(
            events[events.len() - 2..],
            [SessionEvent::Exited { exit_code: 0 }, SessionEvent::Terminated]
        );

        let response = h.send(Command::Continue).await;
        assert_eq!(error_code(&response), "INVALID_STATE");

        let response = h.send(Command::Disconnect).await;
        assert!(response.is_success());
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn test_introspection_while_stopped() {
        let mut h = Harness::new();
        h.launch(true).await;
        h.send(Command::ConfigurationDone).await;
        h.pump().await;
        h.send(Command::Next).await;
        h.pump().await;

        let response = h
            .send(Command::StackTrace {
                start_frame: 0,
                levels: Some(1),
            })
            .await;
        let (frames, total) = match response.outcome {
            Ok(Reply::StackTrace { frames, total }) => (frames, total),
            other => panic!("Expected stack trace, got {:?}", other),
        };
        assert_eq!(frames.len(), 1);
        assert_eq!(total, 1);
        assert_eq!(frames[0].location.line, 2);

        let response = h
            .send(Command::Evaluate {
                expression: "a".to_string(),
                frame_id: Some(frames[0].id),
            })
            .await;
        let result = match response.outcome {
            Ok(Reply::Evaluated(result)) => result,
            other => panic!("Expected evaluation, got {:?}", other),
        };
        assert_eq!(result.value, "1");

        let response = h.send(Command::Scopes { frame_id: 999 }).await;
        assert_eq!(error_code(&response), "UNKNOWN_REFERENCE");
    }

    #[tokio::test]
    async fn test_disconnect_before_run_terminates() {
        let mut h = Harness::new();
        h.launch(false).await;
        h.drain();

        let response = h.send(Command::Disconnect).await;
        assert!(response.is_success());
        assert_eq!(h.router.state(), SessionState::Terminated);
        assert_eq!(
            h.drain(),
            vec![SessionEvent::Exited { exit_code: 0 }, SessionEvent::Terminated]
        );
    }

    #[tokio::test]
    async fn test_launch_failure_keeps_session_uninitialized() {
        let mut h = Harness::new();
        let config = LaunchConfig::new(SourceInput::File(PathBuf::from(
            "/nonexistent/missing.jsonnet",
        )));
        let response = h.send(Command::Launch(config)).await;
        assert_eq!(error_code(&response), "SOURCE_LOAD_FAILED");
        assert_eq!(h.router.state(), SessionState::Uninitialized);
        assert!(h.drain().is_empty());
    }
}
