//! Session state machine
//!
//! The only place that mutates [`SessionState`]. The router asks
//! [`SessionStateMachine::check`] before acting on a command and reports
//! transitions afterwards, so a rejected command leaves the state untouched.

use crate::common::{Error, Result};

use super::protocol::Command;

/// Debug session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for `initialize`/`launch`
    Uninitialized,
    /// Program loaded; setting initial breakpoints
    Configuring,
    /// Evaluator is executing
    Running,
    /// Evaluator is suspended (breakpoint, step, pause, exception, entry)
    Stopped,
    /// Session is over
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Configuring => write!(f, "configuring"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Validates commands against the current state and applies transitions
#[derive(Debug)]
pub struct SessionStateMachine {
    state: SessionState,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether `command` is legal in the current state
    pub fn is_legal(&self, command: &Command) -> bool {
        use SessionState::*;

        match command {
            Command::Initialize { .. } | Command::Launch(_) => self.state == Uninitialized,
            Command::SetBreakpoints { .. } => {
                matches!(self.state, Configuring | Running | Stopped)
            }
            Command::ConfigurationDone => self.state == Configuring,
            Command::Continue | Command::Next | Command::StepIn | Command::StepOut => {
                matches!(self.state, Configuring | Stopped)
            }
            Command::Pause => self.state == Running,
            Command::Threads => self.state != Terminated,
            Command::StackTrace { .. }
            | Command::Scopes { .. }
            | Command::Variables { .. }
            | Command::Evaluate { .. } => self.state == Stopped,
            Command::Disconnect => true,
        }
    }

    /// Fail with `INVALID_STATE` if `command` is not legal now
    pub fn check(&self, command: &Command) -> Result<()> {
        if self.is_legal(command) {
            Ok(())
        } else {
            Err(Error::invalid_state(command.name(), self.state))
        }
    }

    /// Program loaded
    pub fn launched(&mut self) {
        self.transition(SessionState::Configuring);
    }

    /// Evaluator resumed
    pub fn resumed(&mut self) {
        self.transition(SessionState::Running);
    }

    /// Evaluator suspended
    pub fn halted(&mut self) {
        self.transition(SessionState::Stopped);
    }

    /// Session over; returns false if it already was
    pub fn terminate(&mut self) -> bool {
        if self.state == SessionState::Terminated {
            return false;
        }
        self.transition(SessionState::Terminated);
        true
    }

    fn transition(&mut self, to: SessionState) {
        if self.state == SessionState::Terminated {
            tracing::debug!(to = %to, "Ignoring transition out of terminated session");
            return;
        }
        tracing::debug!(from = %self.state, to = %to, "Session state transition");
        self.state = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SourceInput;
    use crate::session::protocol::LaunchConfig;
    use std::path::PathBuf;

    fn all_commands() -> Vec<Command> {
        vec![
            Command::Initialize { client_id: None },
            Command::Launch(LaunchConfig::new(SourceInput::Code {
                name: "<cmdline>".to_string(),
                code: "{}".to_string(),
            })),
            Command::SetBreakpoints {
                file: PathBuf::from("a.jsonnet"),
                lines: vec![1],
            },
            Command::ConfigurationDone,
            Command::Continue,
            Command::Next,
            Command::StepIn,
            Command::StepOut,
            Command::Pause,
            Command::Threads,
            Command::StackTrace {
                start_frame: 0,
                levels: None,
            },
            Command::Scopes { frame_id: 1 },
            Command::Variables { reference: 1 },
            Command::Evaluate {
                expression: "x".to_string(),
                frame_id: None,
            },
            Command::Disconnect,
        ]
    }

    fn machine_in(state: SessionState) -> SessionStateMachine {
        SessionStateMachine { state }
    }

    #[test]
    fn test_terminated_only_accepts_disconnect() {
        let machine = machine_in(SessionState::Terminated);
        for command in all_commands() {
            let legal = machine.is_legal(&command);
            assert_eq!(legal, command == Command::Disconnect, "{}", command.name());
        }
    }

    #[test]
    fn test_rejection_carries_invalid_state_code() {
        let machine = machine_in(SessionState::Configuring);
        let err = machine.check(&Command::Pause).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
        assert_eq!(machine.state(), SessionState::Configuring);
    }

    #[test]
    fn test_introspection_only_while_stopped() {
        for state in [
            SessionState::Uninitialized,
            SessionState::Configuring,
            SessionState::Running,
            SessionState::Terminated,
        ] {
            let machine = machine_in(state);
            assert!(!machine.is_legal(&Command::StackTrace {
                start_frame: 0,
                levels: None
            }));
        }
        assert!(machine_in(SessionState::Stopped).is_legal(&Command::Scopes { frame_id: 1 }));
    }

    #[test]
    fn test_breakpoints_accepted_while_running() {
        let command = Command::SetBreakpoints {
            file: PathBuf::from("a.jsonnet"),
            lines: vec![3],
        };
        assert!(machine_in(SessionState::Running).is_legal(&command));
        assert!(!machine_in(SessionState::Uninitialized).is_legal(&command));
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut machine = SessionStateMachine::new();
        machine.launched();
        assert_eq!(machine.state(), SessionState::Configuring);
        machine.resumed();
        machine.halted();
        assert_eq!(machine.state(), SessionState::Stopped);

        assert!(machine.terminate());
        assert!(!machine.terminate());
        machine.resumed();
        assert_eq!(machine.state(), SessionState::Terminated);
    }
}
