//! Evaluator capability interface
//!
//! The debugger never evaluates Jsonnet itself. It drives an engine through
//! the [`Evaluator`] trait: execution control (`resume` in one of several
//! modes, interrupted through [`Interrupt`]) plus introspection of the
//! suspended state. Any engine satisfying the trait can back a session.

pub mod bindings;
pub mod outline;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::common::Result;

pub use bindings::Bindings;
pub use outline::OutlineEngine;

/// Where the program text comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInput {
    /// A file on disk
    File(PathBuf),
    /// Inline code with a display name such as `<cmdline>` or `<stdin>`
    Code { name: String, code: String },
}

/// How far the evaluator runs before it stops again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Stop at the first statement (stop-on-entry)
    Entry,
    /// Run until a breakpoint, error, pause, or completion
    Continue,
    /// Stop at the next statement, entering nested scopes
    StepIn,
    /// Stop at the next statement at the same or an outer depth
    StepOver,
    /// Stop at the next statement in an outer scope
    StepOut,
}

impl fmt::Display for ResumeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry => write!(f, "entry"),
            Self::Continue => write!(f, "continue"),
            Self::StepIn => write!(f, "step-in"),
            Self::StepOver => write!(f, "step-over"),
            Self::StepOut => write!(f, "step-out"),
        }
    }
}

/// Why the evaluator stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    Entry,
    Breakpoint,
    Step,
    Pause,
    Exception,
}

impl StopReason {
    /// DAP reason string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Breakpoint => "breakpoint",
            Self::Step => "step",
            Self::Pause => "pause",
            Self::Exception => "exception",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A position in a source file (1-based line and column)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

/// One entry of the evaluation stack at a suspended point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: i64,
    pub name: String,
    pub location: Location,
}

/// A named set of variables belonging to a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub name: String,
    pub variables_reference: i64,
    pub expensive: bool,
}

/// A variable; `variables_reference > 0` means it can be expanded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub type_name: Option<String>,
    pub variables_reference: i64,
}

/// Result of evaluating an expression in a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalResult {
    pub value: String,
    pub type_name: Option<String>,
    pub variables_reference: i64,
}

/// Outcome of a static executable-line check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineStatus {
    Executable,
    NotExecutable(String),
    /// The engine cannot tell (e.g. a file it has not loaded)
    Unknown,
}

/// How a `resume` call ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    /// Suspended; the stack can be inspected
    Stopped {
        reason: StopReason,
        location: Location,
        description: Option<String>,
    },
    /// Evaluation completed; `result` is the manifested output if known
    Finished { result: Option<String> },
    /// Evaluation failed with an uncaught error that was already reported
    Failed { message: String },
    /// Terminated through [`Interrupt::request_terminate`]
    Interrupted,
}

/// Signals delivered to a running evaluator from outside its thread
///
/// Engines poll these at step boundaries. A pause request is consumed by the
/// next stop, whatever its reason, or discarded when the next resume starts.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    pause: Arc<AtomicBool>,
    terminate: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the evaluator to stop at the next step boundary
    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    /// Ask the evaluator to abandon execution
    pub fn request_terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    /// Consume a pending pause request
    pub fn take_pause(&self) -> bool {
        self.pause.swap(false, Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }
}

/// Execution-control and introspection primitives of a language engine
///
/// All methods are called from a single execution thread; implementations do
/// not need to be reentrant. Introspection is only called while suspended.
pub trait Evaluator: Send + 'static {
    /// Bind external variables (`std.extVar`); values are Jsonnet code
    fn set_external_bindings(&mut self, bindings: Bindings) -> Result<()>;

    /// Bind top-level function arguments; values are Jsonnet code
    fn set_top_level_args(&mut self, args: Bindings) -> Result<()>;

    /// Load the program; returns the normalized path used in locations
    fn load_source(&mut self, input: SourceInput, search_paths: &[PathBuf]) -> Result<PathBuf>;

    /// Static check whether a line holds an executable statement
    fn check_line(&self, file: &Path, line: u32) -> LineStatus;

    /// Replace the breakpoint lines for one file
    fn set_breakpoints(&mut self, file: &Path, lines: &[u32]);

    /// Run until the next halt. Errors are evaluator failures, not user errors.
    fn resume(&mut self, mode: ResumeMode, interrupt: &Interrupt) -> Result<Halt>;

    /// Frames at the current stop, innermost first
    fn current_stack(&mut self) -> Result<Vec<Frame>>;

    /// Scopes of a frame from the current stop
    fn scopes(&mut self, frame_id: i64) -> Result<Vec<Scope>>;

    /// Children of a scope or expandable variable
    fn variables(&mut self, reference: i64) -> Result<Vec<Variable>>;

    /// Evaluate an expression in a frame without resuming execution
    fn evaluate(&self, expression: &str, frame_id: Option<i64>) -> Result<EvalResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_request_is_consumed_once() {
        let interrupt = Interrupt::new();
        let remote = interrupt.clone();
        remote.request_pause();
        assert!(interrupt.take_pause());
        assert!(!interrupt.take_pause());
    }

    #[test]
    fn test_terminate_is_sticky() {
        let interrupt = Interrupt::new();
        interrupt.clone().request_terminate();
        assert!(interrupt.is_terminated());
        assert!(interrupt.is_terminated());
    }
}
