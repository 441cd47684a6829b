//! DAP client for talking to a debug adapter
//!
//! Drives the server side of this crate over any byte stream pair. The
//! scenario runner and the integration tests use it against an in-process
//! session; nothing here assumes a particular transport.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use crate::common::{Error, Result};
use crate::session::protocol::THREAD_ID;

use super::codec;
use super::types::*;

/// How long to wait for any single message by default
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// DAP client for communicating with a debug adapter
pub struct DapClient<R, W> {
    reader: BufReader<R>,
    writer: W,
    /// Sequence number for the next request
    seq: i64,
    /// Adapter capabilities (populated after initialize)
    pub capabilities: Capabilities,
    /// Responses that arrived while waiting for a different one
    responses: HashMap<i64, ResponseMessage>,
    /// Events not yet consumed
    events: VecDeque<Event>,
    /// Everything the adapter printed through `output` events
    output: String,
    /// Set once an `exited` event arrives
    exit_code: Option<i64>,
    timeout: Duration,
}

impl<R, W> DapClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            seq: 1,
            capabilities: Capabilities::default(),
            responses: HashMap::new(),
            events: VecDeque::new(),
            output: String::new(),
            exit_code: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-message timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Text collected from `output` events so far
    pub fn output(&self) -> &str {
        &self.output
    }

    /// Exit code reported by the `exited` event, if any
    pub fn exit_code(&self) -> Option<i64> {
        self.exit_code
    }

    /// Send a request and return its sequence number
    pub async fn send_request(&mut self, command: &str, arguments: Option<Value>) -> Result<i64> {
        let seq = self.seq;
        self.seq += 1;

        let request = ProtocolMessage::Request(RequestMessage {
            seq,
            command: command.to_string(),
            arguments,
        });
        let json = serde_json::to_string(&request)?;
        tracing::debug!(%json, "DAP client send");

        codec::write_message(&mut self.writer, &json).await?;
        Ok(seq)
    }

    /// Read the next message, filing events and stray responses away
    async fn pump(&mut self) -> Result<()> {
        let json = tokio::time::timeout(self.timeout, codec::read_message(&mut self.reader))
            .await
            .map_err(|_| Error::Timeout(self.timeout.as_secs()))??;
        tracing::debug!(%json, "DAP client receive");

        match serde_json::from_str::<ProtocolMessage>(&json)? {
            ProtocolMessage::Response(response) => {
                self.responses.insert(response.request_seq, response);
            }
            ProtocolMessage::Event(message) => {
                let event = Event::from_message(&message);
                match &event {
                    Event::Output(body) => self.output.push_str(&body.output),
                    Event::Exited(body) => self.exit_code = Some(body.exit_code),
                    _ => {}
                }
                self.events.push_back(event);
            }
            ProtocolMessage::Request(request) => {
                tracing::warn!(command = %request.command, "Ignoring reverse request");
            }
        }
        Ok(())
    }

    /// Wait for the response to request `seq`
    pub async fn wait_response(&mut self, seq: i64) -> Result<ResponseMessage> {
        loop {
            if let Some(response) = self.responses.remove(&seq) {
                return Ok(response);
            }
            self.pump().await?;
        }
    }

    /// Send a request and wait for its response, successful or not
    pub async fn request_raw(
        &mut self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<ResponseMessage> {
        let seq = self.send_request(command, arguments).await?;
        self.wait_response(seq).await
    }

    /// Send a request and decode the body of a successful response
    pub async fn request<T: serde::de::DeserializeOwned>(
        &mut self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<T> {
        let response = self.request_raw(command, arguments).await?;
        if !response.success {
            let message = response
                .message
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(Error::dap_request_failed(command, &message));
        }

        let body = response.body.unwrap_or(Value::Null);
        serde_json::from_value(body).map_err(|e| {
            Error::Transport(format!("Failed to parse {} response: {}", command, e))
        })
    }

    /// Next event in arrival order
    pub async fn next_event(&mut self) -> Result<Event> {
        loop {
            if let Some(event) = self.events.pop_front() {
                return Ok(event);
            }
            self.pump().await?;
        }
    }

    /// Skip events until one named `name` arrives
    pub async fn wait_event(&mut self, name: &str) -> Result<Event> {
        loop {
            let event = self.next_event().await?;
            if event.name() == name {
                return Ok(event);
            }
            tracing::trace!(event = event.name(), wanted = name, "Skipping event");
        }
    }

    /// Wait until the program stops or the session terminates
    pub async fn wait_stopped_or_terminated(&mut self) -> Result<Event> {
        loop {
            let event = self.next_event().await?;
            if matches!(event, Event::Stopped(_) | Event::Terminated) {
                return Ok(event);
            }
        }
    }

    /// Initialize the adapter
    pub async fn initialize(&mut self, client_id: &str) -> Result<Capabilities> {
        let args = InitializeArguments {
            client_id: Some(client_id.to_string()),
            adapter_id: Some("jsonnet".to_string()),
            ..Default::default()
        };

        let caps: Capabilities = self
            .request("initialize", Some(serde_json::to_value(&args)?))
            .await?;

        self.capabilities = caps.clone();
        Ok(caps)
    }

    /// Launch a program; the `initialized` event follows
    pub async fn launch(&mut self, args: LaunchArguments) -> Result<()> {
        self.request::<Value>("launch", Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    /// Signal that configuration is done
    pub async fn configuration_done(&mut self) -> Result<()> {
        self.request::<Value>("configurationDone", None).await?;
        Ok(())
    }

    /// Replace the breakpoints of one source file
    pub async fn set_breakpoints(
        &mut self,
        source_path: &Path,
        lines: &[u32],
    ) -> Result<Vec<Breakpoint>> {
        let args = SetBreakpointsArguments {
            source: Source {
                path: Some(source_path.to_string_lossy().into_owned()),
                ..Default::default()
            },
            breakpoints: lines
                .iter()
                .map(|&line| SourceBreakpoint { line, column: None })
                .collect(),
            lines: Vec::new(),
        };

        let response: SetBreakpointsResponseBody = self
            .request("setBreakpoints", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.breakpoints)
    }

    /// Continue execution
    pub async fn continue_execution(&mut self) -> Result<bool> {
        let response: ContinueResponseBody = self
            .request("continue", Some(json!({ "threadId": THREAD_ID })))
            .await?;
        Ok(response.all_threads_continued)
    }

    /// Step over (next)
    pub async fn next(&mut self) -> Result<()> {
        self.thread_request("next").await
    }

    /// Step into
    pub async fn step_in(&mut self) -> Result<()> {
        self.thread_request("stepIn").await
    }

    /// Step out
    pub async fn step_out(&mut self) -> Result<()> {
        self.thread_request("stepOut").await
    }

    /// Pause execution
    pub async fn pause(&mut self) -> Result<()> {
        self.thread_request("pause").await
    }

    async fn thread_request(&mut self, command: &str) -> Result<()> {
        let args = ThreadArguments {
            thread_id: THREAD_ID,
        };
        self.request::<Value>(command, Some(serde_json::to_value(&args)?))
            .await?;
        Ok(())
    }

    /// Get the stack trace of the single thread
    pub async fn stack_trace(&mut self) -> Result<Vec<StackFrame>> {
        let args = StackTraceArguments {
            thread_id: THREAD_ID,
            ..Default::default()
        };

        let response: StackTraceResponseBody = self
            .request("stackTrace", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.stack_frames)
    }

    /// Get threads
    pub async fn threads(&mut self) -> Result<Vec<Thread>> {
        let response: ThreadsResponseBody = self.request("threads", None).await?;
        Ok(response.threads)
    }

    /// Get scopes for a frame
    pub async fn scopes(&mut self, frame_id: i64) -> Result<Vec<Scope>> {
        let args = ScopesArguments { frame_id };

        let response: ScopesResponseBody = self
            .request("scopes", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.scopes)
    }

    /// Get variables
    pub async fn variables(&mut self, variables_reference: i64) -> Result<Vec<Variable>> {
        let args = VariablesArguments {
            variables_reference,
        };

        let response: VariablesResponseBody = self
            .request("variables", Some(serde_json::to_value(&args)?))
            .await?;

        Ok(response.variables)
    }

    /// Evaluate an expression
    pub async fn evaluate(
        &mut self,
        expression: &str,
        frame_id: Option<i64>,
    ) -> Result<EvaluateResponseBody> {
        let args = EvaluateArguments {
            expression: expression.to_string(),
            frame_id,
            context: Some("repl".to_string()),
        };

        self.request("evaluate", Some(serde_json::to_value(&args)?))
            .await
    }

    /// Disconnect, waiting for the acknowledgement
    pub async fn disconnect(&mut self) -> Result<()> {
        self.request::<Value>("disconnect", Some(json!({ "terminateDebuggee": true })))
            .await?;
        Ok(())
    }
}
