//! Internal command protocol
//!
//! Both front ends translate client input into a [`Request`] and render the
//! [`Response`] and [`SessionEvent`]s produced by the router. Neither front
//! end talks to the evaluator directly.

use std::path::PathBuf;

use crate::common::ErrorInfo;
use crate::engine::{Bindings, EvalResult, Frame, Location, Scope, SourceInput, StopReason, Variable};

use super::breakpoints::Breakpoint;

/// The evaluator runs on a single logical thread
pub const THREAD_ID: i64 = 1;
pub const THREAD_NAME: &str = "jsonnet";

/// Everything needed to load a program
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchConfig {
    pub source: SourceInput,
    /// Library search paths (`-J`), in lookup order
    pub search_paths: Vec<PathBuf>,
    /// External variables, as Jsonnet code
    pub ext_code: Bindings,
    /// Top-level arguments, as Jsonnet code
    pub tla_code: Bindings,
    pub stop_on_entry: bool,
}

impl LaunchConfig {
    pub fn new(source: SourceInput) -> Self {
        Self {
            source,
            search_paths: Vec::new(),
            ext_code: Bindings::new(),
            tla_code: Bindings::new(),
            stop_on_entry: false,
        }
    }
}

/// Commands accepted by a debug session
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // === Session Management ===
    /// Negotiate capabilities
    Initialize { client_id: Option<String> },

    /// Load a program and enter configuration
    Launch(LaunchConfig),

    /// End the session, terminating the program if it is still running
    Disconnect,

    // === Breakpoints ===
    /// Replace all breakpoints of one file
    SetBreakpoints { file: PathBuf, lines: Vec<u32> },

    /// Configuration finished; start evaluation
    ConfigurationDone,

    // === Execution Control ===
    /// Run until the next breakpoint
    Continue,

    /// Step over nested scopes
    Next,

    /// Step into nested scopes
    StepIn,

    /// Run until the current scope is left
    StepOut,

    /// Interrupt a running evaluation
    Pause,

    // === State Inspection ===
    /// List threads
    Threads,

    /// Get the stack at the current stop
    StackTrace {
        start_frame: usize,
        levels: Option<usize>,
    },

    /// Get scopes of a frame
    Scopes { frame_id: i64 },

    /// Get the children of a variables reference
    Variables { reference: i64 },

    /// Evaluate an expression without resuming
    Evaluate {
        expression: String,
        frame_id: Option<i64>,
    },
}

impl Command {
    /// Wire name of the command (DAP request name)
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "initialize",
            Self::Launch(_) => "launch",
            Self::Disconnect => "disconnect",
            Self::SetBreakpoints { .. } => "setBreakpoints",
            Self::ConfigurationDone => "configurationDone",
            Self::Continue => "continue",
            Self::Next => "next",
            Self::StepIn => "stepIn",
            Self::StepOut => "stepOut",
            Self::Pause => "pause",
            Self::Threads => "threads",
            Self::StackTrace { .. } => "stackTrace",
            Self::Scopes { .. } => "scopes",
            Self::Variables { .. } => "variables",
            Self::Evaluate { .. } => "evaluate",
        }
    }
}

/// A command plus the client's correlation id (DAP `seq`; none for the REPL)
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub correlation: Option<i64>,
    pub command: Command,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self {
            correlation: None,
            command,
        }
    }

    pub fn correlated(seq: i64, command: Command) -> Self {
        Self {
            correlation: Some(seq),
            command,
        }
    }
}

/// Thread information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: i64,
    pub name: String,
}

/// Successful outcome of a command
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Capabilities,
    Launched { program: PathBuf },
    Breakpoints(Vec<Breakpoint>),
    /// Accepted; nothing to report (`configurationDone`, `pause`)
    Ack,
    /// Execution resumed; the next stop arrives as an event
    Continued,
    Threads(Vec<ThreadInfo>),
    StackTrace { frames: Vec<Frame>, total: usize },
    Scopes(Vec<Scope>),
    Variables(Vec<Variable>),
    Evaluated(EvalResult),
    Disconnected,
}

/// Result of one request
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub correlation: Option<i64>,
    pub command: &'static str,
    pub outcome: std::result::Result<Reply, ErrorInfo>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Output stream of an `output` event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCategory {
    Console,
    Stdout,
    Stderr,
}

impl OutputCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Console => "console",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Notifications sent to the client independently of responses
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The program is loaded and breakpoints may be configured
    Initialized,
    Stopped {
        reason: StopReason,
        description: Option<String>,
        location: Location,
        hit_breakpoint_ids: Vec<u32>,
    },
    Output {
        category: OutputCategory,
        output: String,
    },
    /// A deferred breakpoint change was applied
    BreakpointChanged(Breakpoint),
    Exited { exit_code: i64 },
    Terminated,
}
