//! Debug session protocol layer
//!
//! One session drives one evaluator: the [`Router`] validates commands
//! against the [`SessionStateMachine`](state::SessionStateMachine), the
//! [`ExecutionController`] owns the evaluator on its own thread, and the
//! [`BreakpointStore`] tracks breakpoints. Front ends feed [`Request`]s in
//! and drain [`SessionEvent`]s out.

pub mod breakpoints;
pub mod controller;
pub mod protocol;
pub mod router;
pub mod state;

use tokio::sync::mpsc;

use crate::common::Result;
use crate::engine::Evaluator;

pub use breakpoints::{Breakpoint, BreakpointStore};
pub use controller::{ExecutionController, ExecutionEvent};
pub use protocol::{Command, LaunchConfig, Reply, Request, Response, SessionEvent};
pub use router::Router;
pub use state::SessionState;

/// Start a session around `engine`
///
/// Returns the router plus the two streams a front end must drain: execution
/// events (feed them back through [`Router::on_execution_event`]) and session
/// events (forward them to the client).
pub fn spawn<E: Evaluator>(
    engine: E,
) -> Result<(
    Router,
    mpsc::UnboundedReceiver<ExecutionEvent>,
    mpsc::UnboundedReceiver<SessionEvent>,
)> {
    let (controller, execution_events) = ExecutionController::spawn(engine)?;
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    Ok((Router::new(controller, events_tx), execution_events, events_rx))
}
