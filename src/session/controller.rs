//! Execution controller
//!
//! Owns the evaluator by moving it onto a dedicated execution thread. Every
//! evaluator call is a job on one queue, drained in arrival order, so a
//! resume and an introspection request can never interleave. Halts come back
//! on an event channel; pause and terminate bypass the queue through the
//! shared [`Interrupt`].

use std::path::PathBuf;
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};

use crate::common::{Error, Result};
use crate::engine::{
    EvalResult, Evaluator, Frame, Halt, Interrupt, LineStatus, Location, ResumeMode, Scope,
    Variable,
};

use super::breakpoints::{Breakpoint, BreakpointStore};
use super::protocol::LaunchConfig;

/// Something the execution thread reports without being asked
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// A resume ended
    Halted(Halt),
    /// The evaluator failed in a way the session cannot recover from
    Fatal(String),
}

/// Work for the execution thread
enum Job {
    Load {
        config: Box<LaunchConfig>,
        reply: oneshot::Sender<Result<PathBuf>>,
    },
    SetBreakpoints {
        file: PathBuf,
        lines: Vec<u32>,
        reply: oneshot::Sender<Vec<LineStatus>>,
    },
    Resume {
        mode: ResumeMode,
    },
    StackTrace {
        reply: oneshot::Sender<Result<Vec<Frame>>>,
    },
    Scopes {
        frame_id: i64,
        reply: oneshot::Sender<Result<Vec<Scope>>>,
    },
    Variables {
        reference: i64,
        reply: oneshot::Sender<Result<Vec<Variable>>>,
    },
    Evaluate {
        expression: String,
        frame_id: Option<i64>,
        reply: oneshot::Sender<Result<EvalResult>>,
    },
}

/// Execution phase as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Loaded (or not yet), never resumed
    Idle,
    /// A resume is in flight
    Running,
    /// Suspended at a stop
    Suspended,
    /// Completed, failed, or terminated
    Finished,
}

/// Serializes all access to one evaluator session
pub struct ExecutionController {
    jobs: mpsc::UnboundedSender<Job>,
    interrupt: Interrupt,
    breakpoints: BreakpointStore,
    phase: Phase,
    thread: Option<JoinHandle<()>>,
}

impl ExecutionController {
    /// Move `engine` onto a new execution thread
    pub fn spawn<E: Evaluator>(
        engine: E,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ExecutionEvent>)> {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let interrupt = Interrupt::new();

        let thread_interrupt = interrupt.clone();
        let thread = std::thread::Builder::new()
            .name("evaluator".to_string())
            .spawn(move || run_jobs(engine, jobs_rx, events_tx, thread_interrupt))?;

        tracing::debug!("Execution thread started");

        Ok((
            Self {
                jobs: jobs_tx,
                interrupt,
                breakpoints: BreakpointStore::new(),
                phase: Phase::Idle,
                thread: Some(thread),
            },
            events_rx,
        ))
    }

    /// Bind variables and load the program
    pub async fn load(&mut self, config: LaunchConfig) -> Result<PathBuf> {
        self.call(|reply| Job::Load {
            config: Box::new(config),
            reply,
        })
        .await?
    }

    /// Replace the breakpoints of `file`
    ///
    /// While a resume is in flight the change is only recorded; it reaches the
    /// evaluator through [`apply_pending_breakpoints`](Self::apply_pending_breakpoints).
    pub async fn set_breakpoints(&mut self, file: PathBuf, lines: Vec<u32>) -> Result<Vec<Breakpoint>> {
        if self.phase == Phase::Running {
            tracing::debug!(file = %file.display(), ?lines, "Queueing breakpoints until next stop");
            return Ok(self.breakpoints.replace_pending(&file, &lines));
        }

        let statuses = self
            .call(|reply| Job::SetBreakpoints {
                file: file.clone(),
                lines: lines.clone(),
                reply,
            })
            .await?;
        Ok(self
            .breakpoints
            .replace(&file, &lines, |line| status_of(&lines, &statuses, line)))
    }

    /// Push queued breakpoint changes to the evaluator; returns the re-verified entries
    pub async fn apply_pending_breakpoints(&mut self) -> Result<Vec<Breakpoint>> {
        let mut changed = Vec::new();
        for file in self.breakpoints.take_pending() {
            let lines = self.breakpoints.lines(&file);
            let statuses = self
                .call(|reply| Job::SetBreakpoints {
                    file: file.clone(),
                    lines: lines.clone(),
                    reply,
                })
                .await?;
            changed.extend(
                self.breakpoints
                    .verify(&file, |line| status_of(&lines, &statuses, line)),
            );
        }
        Ok(changed)
    }

    /// Start a resume; the halt arrives later as an [`ExecutionEvent`]
    pub fn resume(&mut self, mode: ResumeMode) -> Result<()> {
        match self.phase {
            Phase::Running => return Err(Error::invalid_state(&mode.to_string(), "running")),
            Phase::Finished => return Err(Error::invalid_state(&mode.to_string(), "terminated")),
            Phase::Idle | Phase::Suspended => {}
        }

        // A pause that raced with the last halt must not stop this run
        if self.interrupt.take_pause() {
            tracing::debug!("Dropped stale pause request");
        }
        self.jobs
            .send(Job::Resume { mode })
            .map_err(|_| thread_gone())?;
        self.phase = Phase::Running;
        tracing::debug!(%mode, "Resumed evaluator");
        Ok(())
    }

    /// Ask a running evaluator to stop at its next step boundary
    pub fn pause(&self) -> Result<()> {
        if self.phase != Phase::Running {
            return Err(Error::invalid_state("pause", "not running"));
        }
        self.interrupt.request_pause();
        tracing::debug!("Pause requested");
        Ok(())
    }

    /// Abandon execution; the evaluator notices at its next step boundary
    pub fn terminate(&mut self) {
        self.interrupt.request_terminate();
        self.phase = Phase::Finished;
    }

    /// Track the phase from an execution event
    pub fn on_event(&mut self, event: &ExecutionEvent) {
        self.phase = match event {
            ExecutionEvent::Halted(Halt::Stopped { .. }) if self.phase != Phase::Finished => {
                Phase::Suspended
            }
            _ => Phase::Finished,
        };
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Innermost-first frames at the current stop
    pub async fn stack_trace(&mut self) -> Result<Vec<Frame>> {
        self.require_suspended()?;
        self.call(|reply| Job::StackTrace { reply }).await?
    }

    pub async fn scopes(&mut self, frame_id: i64) -> Result<Vec<Scope>> {
        if self.phase != Phase::Suspended {
            return Err(Error::unknown_reference("frame", frame_id));
        }
        self.call(|reply| Job::Scopes { frame_id, reply }).await?
    }

    pub async fn variables(&mut self, reference: i64) -> Result<Vec<Variable>> {
        if self.phase != Phase::Suspended {
            return Err(Error::unknown_reference("variables", reference));
        }
        self.call(|reply| Job::Variables { reference, reply }).await?
    }

    /// Evaluate without resuming; failures are never fatal
    pub async fn evaluate(&mut self, expression: String, frame_id: Option<i64>) -> Result<EvalResult> {
        self.require_suspended()?;
        self.call(|reply| Job::Evaluate {
            expression,
            frame_id,
            reply,
        })
        .await?
        .map_err(|e| match e {
            Error::FatalEvaluator(message) => Error::Evaluation(message),
            other => other,
        })
    }

    /// Breakpoint ids at a stop location
    pub fn hit_breakpoints(&self, location: &Location) -> Vec<u32> {
        self.breakpoints.hits(location)
    }

    pub fn breakpoints(&self) -> &BreakpointStore {
        &self.breakpoints
    }

    /// Terminate and wait for the execution thread to exit
    pub async fn shutdown(mut self) {
        self.terminate();
        let Some(thread) = self.thread.take() else {
            return;
        };
        drop(self);
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => tracing::debug!("Execution thread joined"),
            Ok(Err(_)) => tracing::warn!("Execution thread panicked"),
            Err(e) => tracing::warn!(error = %e, "Failed to join execution thread"),
        }
    }

    fn require_suspended(&self) -> Result<()> {
        if self.phase == Phase::Suspended {
            Ok(())
        } else {
            Err(Error::NoActiveStack)
        }
    }

    async fn call<T>(&self, job: impl FnOnce(oneshot::Sender<T>) -> Job) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.jobs.send(job(tx)).map_err(|_| thread_gone())?;
        rx.await.map_err(|_| thread_gone())
    }
}

impl Drop for ExecutionController {
    fn drop(&mut self) {
        // The job sender drops with us; a running resume still needs the flag
        self.interrupt.request_terminate();
    }
}

fn thread_gone() -> Error {
    Error::FatalEvaluator("execution thread stopped".to_string())
}

fn status_of(lines: &[u32], statuses: &[LineStatus], line: u32) -> LineStatus {
    lines
        .iter()
        .position(|l| *l == line)
        .and_then(|i| statuses.get(i))
        .cloned()
        .unwrap_or(LineStatus::Unknown)
}

/// Body of the execution thread
fn run_jobs<E: Evaluator>(
    mut engine: E,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    events: mpsc::UnboundedSender<ExecutionEvent>,
    interrupt: Interrupt,
) {
    while let Some(job) = jobs.blocking_recv() {
        match job {
            Job::Load { config, reply } => {
                let result = load(&mut engine, *config);
                let _ = reply.send(result);
            }
            Job::SetBreakpoints { file, lines, reply } => {
                engine.set_breakpoints(&file, &lines);
                let statuses = lines.iter().map(|l| engine.check_line(&file, *l)).collect();
                let _ = reply.send(statuses);
            }
            Job::Resume { mode } => {
                let event = match engine.resume(mode, &interrupt) {
                    Ok(halt) => {
                        tracing::debug!(?halt, "Evaluator halted");
                        ExecutionEvent::Halted(halt)
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Evaluator failed");
                        ExecutionEvent::Fatal(e.to_string())
                    }
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            Job::StackTrace { reply } => {
                let _ = reply.send(engine.current_stack());
            }
            Job::Scopes { frame_id, reply } => {
                let _ = reply.send(engine.scopes(frame_id));
            }
            Job::Variables { reference, reply } => {
                let _ = reply.send(engine.variables(reference));
            }
            Job::Evaluate {
                expression,
                frame_id,
                reply,
            } => {
                let _ = reply.send(engine.evaluate(&expression, frame_id));
            }
        }
    }
    tracing::debug!("Execution thread exiting");
}

fn load<E: Evaluator>(engine: &mut E, config: LaunchConfig) -> Result<PathBuf> {
    engine.set_external_bindings(config.ext_code)?;
    engine.set_top_level_args(config.tla_code)?;
    engine.load_source(config.source, &config.search_paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Bindings, SourceInput, StopReason};
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Engine that replays scripted halts and records calls
    struct ScriptedEngine {
        halts: VecDeque<Halt>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedEngine {
        fn new(halts: Vec<Halt>) -> (Self, Arc<Mutex<Vec<String>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    halts: halts.into(),
                    calls: calls.clone(),
                },
                calls,
            )
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl Evaluator for ScriptedEngine {
        fn set_external_bindings(&mut self, _: Bindings) -> Result<()> {
            Ok(())
        }

        fn set_top_level_args(&mut self, _: Bindings) -> Result<()> {
            Ok(())
        }

        fn load_source(&mut self, _: SourceInput, _: &[PathBuf]) -> Result<PathBuf> {
            Ok(PathBuf::from("/work/main.jsonnet"))
        }

        fn check_line(&self, _: &Path, line: u32) -> LineStatus {
            if line == 1 {
                LineStatus::NotExecutable("comment".to_string())
            } else {
                LineStatus::Executable
            }
        }

        fn set_breakpoints(&mut self, file: &Path, lines: &[u32]) {
            self.record(format!("set_breakpoints {} {:?}", file.display(), lines));
        }

        fn resume(&mut self, mode: ResumeMode, _: &Interrupt) -> Result<Halt> {
            self.record(format!("resume {}", mode));
            self.halts
                .pop_front()
                .ok_or_else(|| Error::FatalEvaluator("script exhausted".to_string()))
        }

        fn current_stack(&mut self) -> Result<Vec<Frame>> {
            self.record("current_stack".to_string());
            Ok(vec![Frame {
                id: 1,
                name: "<top-level>".to_string(),
                location: stop_location(3),
            }])
        }

        fn scopes(&mut self, frame_id: i64) -> Result<Vec<Scope>> {
            Err(Error::unknown_reference("frame", frame_id))
        }

        fn variables(&mut self, reference: i64) -> Result<Vec<Variable>> {
            Err(Error::unknown_reference("variables", reference))
        }

        fn evaluate(&self, expression: &str, _: Option<i64>) -> Result<EvalResult> {
            Err(Error::Evaluation(format!("cannot evaluate {}", expression)))
        }
    }

    /// Engine that runs until paused or terminated
    struct SpinEngine;

    impl Evaluator for SpinEngine {
        fn set_external_bindings(&mut self, _: Bindings) -> Result<()> {
            Ok(())
        }

        fn set_top_level_args(&mut self, _: Bindings) -> Result<()> {
            Ok(())
        }

        fn load_source(&mut self, _: SourceInput, _: &[PathBuf]) -> Result<PathBuf> {
            Ok(PathBuf::from("/work/loop.jsonnet"))
        }

        fn check_line(&self, _: &Path, _: u32) -> LineStatus {
            LineStatus::Unknown
        }

        fn set_breakpoints(&mut self, _: &Path, _: &[u32]) {}

        fn resume(&mut self, _: ResumeMode, interrupt: &Interrupt) -> Result<Halt> {
            loop {
                if interrupt.is_terminated() {
                    return Ok(Halt::Interrupted);
                }
                if interrupt.take_pause() {
                    return Ok(Halt::Stopped {
                        reason: StopReason::Pause,
                        location: stop_location(2),
                        description: None,
                    });
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }

        fn current_stack(&mut self) -> Result<Vec<Frame>> {
            Ok(Vec::new())
        }

        fn scopes(&mut self, frame_id: i64) -> Result<Vec<Scope>> {
            Err(Error::unknown_reference("frame", frame_id))
        }

        fn variables(&mut self, reference: i64) -> Result<Vec<Variable>> {
            Err(Error::unknown_reference("variables", reference))
        }

        fn evaluate(&self, _: &str, _: Option<i64>) -> Result<EvalResult> {
            Err(Error::Evaluation("unsupported".to_string()))
        }
    }

    fn stop_location(line: u32) -> Location {
        Location {
            file: PathBuf::from("/work/main.jsonnet"),
            line,
            column: 1,
        }
    }

    fn breakpoint_stop(line: u32) -> Halt {
        Halt::Stopped {
            reason: StopReason::Breakpoint,
            location: stop_location(line),
            description: None,
        }
    }

    fn launch_config() -> LaunchConfig {
        LaunchConfig::new(SourceInput::File(PathBuf::from("/work/main.jsonnet")))
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ExecutionEvent>) -> ExecutionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for execution event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_resume_reports_halt_and_enables_stack() {
        let (engine, calls) = ScriptedEngine::new(vec![breakpoint_stop(3)]);
        let (mut controller, mut events) = ExecutionController::spawn(engine).unwrap();
        controller.load(launch_config()).await.unwrap();

        assert!(matches!(controller.stack_trace().await, Err(Error::NoActiveStack)));

        controller.resume(ResumeMode::Continue).unwrap();
        let event = next_event(&mut events).await;
        controller.on_event(&event);
        assert_eq!(event, ExecutionEvent::Halted(breakpoint_stop(3)));

        let frames = controller.stack_trace().await.unwrap();
        assert_eq!(frames[0].location.line, 3);
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &["resume continue".to_string(), "current_stack".to_string()]
        );
    }

    #[tokio::test]
    async fn test_resume_rejected_while_in_flight_and_after_finish() {
        let (mut controller, mut events) = ExecutionController::spawn(SpinEngine).unwrap();
        controller.load(launch_config()).await.unwrap();

        controller.resume(ResumeMode::Continue).unwrap();
        let err = controller.resume(ResumeMode::StepIn).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");

        controller.terminate();
        let event = next_event(&mut events).await;
        controller.on_event(&event);
        assert_eq!(event, ExecutionEvent::Halted(Halt::Interrupted));

        let err = controller.resume(ResumeMode::Continue).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[tokio::test]
    async fn test_pause_interrupts_running_evaluator() {
        let (mut controller, mut events) = ExecutionController::spawn(SpinEngine).unwrap();
        controller.load(launch_config()).await.unwrap();

        assert!(controller.pause().is_err());
        controller.resume(ResumeMode::Continue).unwrap();
        controller.pause().unwrap();

        let event = next_event(&mut events).await;
        assert!(matches!(
            event,
            ExecutionEvent::Halted(Halt::Stopped {
                reason: StopReason::Pause,
                ..
            })
        ));
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_pause_racing_a_halt_is_dropped_on_resume() {
        let (engine, _) = ScriptedEngine::new(vec![breakpoint_stop(3), breakpoint_stop(4)]);
        let (mut controller, mut events) = ExecutionController::spawn(engine).unwrap();
        controller.load(launch_config()).await.unwrap();

        controller.resume(ResumeMode::Continue).unwrap();
        let event = next_event(&mut events).await;
        // Halt is delivered but not yet processed, so the phase still reads running
        controller.pause().unwrap();
        controller.on_event(&event);

        controller.resume(ResumeMode::Continue).unwrap();
        assert!(!controller.interrupt.take_pause());
        let event = next_event(&mut events).await;
        assert_eq!(event, ExecutionEvent::Halted(breakpoint_stop(4)));
    }

    #[tokio::test]
    async fn test_breakpoints_queued_while_running() {
        let (engine, calls) = ScriptedEngine::new(vec![breakpoint_stop(3), breakpoint_stop(4)]);
        let (mut controller, mut events) = ExecutionController::spawn(engine).unwrap();
        controller.load(launch_config()).await.unwrap();
        let file = PathBuf::from("/work/main.jsonnet");

        let initial = controller.set_breakpoints(file.clone(), vec![1, 3]).await.unwrap();
        assert!(!initial[0].verified);
        assert!(initial[1].verified);

        controller.resume(ResumeMode::Continue).unwrap();
        let pending = controller.set_breakpoints(file.clone(), vec![3, 4]).await.unwrap();
        assert_eq!(pending[0].id, initial[1].id);
        assert_eq!(pending[1].message.as_deref(), Some("pending"));

        let event = next_event(&mut events).await;
        controller.on_event(&event);
        let applied = controller.apply_pending_breakpoints().await.unwrap();
        assert_eq!(applied.len(), 2);
        assert!(applied.iter().all(|bp| bp.verified));

        let calls = calls.lock().unwrap();
        let resume_at = calls.iter().position(|c| c == "resume continue").unwrap();
        let queued_at = calls
            .iter()
            .position(|c| c.ends_with("[3, 4]"))
            .unwrap();
        assert!(queued_at > resume_at);
    }

    #[tokio::test]
    async fn test_evaluate_failure_is_not_fatal() {
        let (engine, _) = ScriptedEngine::new(vec![breakpoint_stop(3)]);
        let (mut controller, mut events) = ExecutionController::spawn(engine).unwrap();
        controller.load(launch_config()).await.unwrap();
        controller.resume(ResumeMode::Continue).unwrap();
        let event = next_event(&mut events).await;
        controller.on_event(&event);

        let err = controller.evaluate("x +".to_string(), None).await.unwrap_err();
        assert_eq!(err.code(), "EVALUATION_ERROR");
        assert!(controller.stack_trace().await.is_ok());
    }

    #[tokio::test]
    async fn test_exhausted_engine_is_fatal() {
        let (engine, _) = ScriptedEngine::new(Vec::new());
        let (mut controller, mut events) = ExecutionController::spawn(engine).unwrap();
        controller.load(launch_config()).await.unwrap();
        controller.resume(ResumeMode::Continue).unwrap();

        let event = next_event(&mut events).await;
        assert!(matches!(event, ExecutionEvent::Fatal(_)));
        controller.on_event(&event);
        assert!(controller.is_finished());
    }
}
