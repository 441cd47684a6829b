//! Translation between DAP messages and session commands
//!
//! Requests decode into [`Command`]s; [`Response`]s and [`SessionEvent`]s
//! encode back into DAP messages. Sequence numbers are left at zero and
//! assigned by the writer.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::common::{paths, Error, Result};
use crate::engine::{bindings, Bindings, Frame, SourceInput};
use crate::session::protocol::{LaunchConfig, Reply, Response, SessionEvent, THREAD_ID};
use crate::session::{Breakpoint, Command};

use super::types::{
    Breakpoint as DapBreakpoint, BreakpointEventBody, Capabilities, ContinueResponseBody,
    ErrorResponseBody, EvaluateArguments, EvaluateResponseBody, EventMessage, ExitedEventBody,
    InitializeArguments, LaunchArguments, Message, OutputEventBody, ProtocolMessage,
    RequestMessage, ResponseMessage, Scope, ScopesArguments, ScopesResponseBody,
    SetBreakpointsArguments, SetBreakpointsResponseBody, Source, StackFrame,
    StackTraceArguments, StackTraceResponseBody, StoppedEventBody, Thread, ThreadsResponseBody,
    Variable, VariablesArguments, VariablesResponseBody,
};

/// Decode a DAP request into a session command
pub fn decode_request(request: &RequestMessage) -> Result<Command> {
    let command = match request.command.as_str() {
        "initialize" => {
            let args: InitializeArguments = optional(request)?;
            Command::Initialize {
                client_id: args.client_id.or(args.client_name),
            }
        }
        "launch" => Command::Launch(launch_config(required(request)?)?),
        "disconnect" => Command::Disconnect,
        "setBreakpoints" => {
            let args: SetBreakpointsArguments = required(request)?;
            let file = args
                .source
                .path
                .or(args.source.name)
                .ok_or_else(|| Error::invalid_arguments("setBreakpoints", "source has no path"))?;
            let lines = if args.breakpoints.is_empty() {
                args.lines
            } else {
                args.breakpoints.iter().map(|bp| bp.line).collect()
            };
            Command::SetBreakpoints {
                file: PathBuf::from(file),
                lines,
            }
        }
        "configurationDone" => Command::ConfigurationDone,
        "continue" => Command::Continue,
        "next" => Command::Next,
        "stepIn" => Command::StepIn,
        "stepOut" => Command::StepOut,
        "pause" => Command::Pause,
        "threads" => Command::Threads,
        "stackTrace" => {
            let args: StackTraceArguments = optional(request)?;
            Command::StackTrace {
                start_frame: args.start_frame.unwrap_or(0).max(0) as usize,
                levels: args.levels.filter(|l| *l > 0).map(|l| l as usize),
            }
        }
        "scopes" => {
            let args: ScopesArguments = required(request)?;
            Command::Scopes {
                frame_id: args.frame_id,
            }
        }
        "variables" => {
            let args: VariablesArguments = required(request)?;
            Command::Variables {
                reference: args.variables_reference,
            }
        }
        "evaluate" => {
            let args: EvaluateArguments = required(request)?;
            Command::Evaluate {
                expression: args.expression,
                frame_id: args.frame_id,
            }
        }
        other => return Err(Error::UnsupportedCommand(other.to_string())),
    };
    Ok(command)
}

/// Build the launch configuration from `launch` arguments
///
/// The program's directory is searched after the explicit `jpath` entries.
pub fn launch_config(args: LaunchArguments) -> Result<LaunchConfig> {
    if args.program.is_empty() {
        return Err(Error::invalid_arguments("launch", "'program' is required"));
    }
    let program = PathBuf::from(&args.program);

    let mut search_paths: Vec<PathBuf> = args.jpath.iter().map(PathBuf::from).collect();
    if let Some(dir) = program.parent().filter(|d| !d.as_os_str().is_empty()) {
        search_paths.push(dir.to_path_buf());
    }

    let mut ext_code = match &args.ext_vars {
        Some(vars) => bindings::ext_vars(vars)?,
        None => Bindings::new(),
    };
    if let Some(code) = args.ext_code {
        bindings::merge_value(&mut ext_code, code)?;
    }
    let mut tla_code = Bindings::new();
    if let Some(code) = args.tla_code {
        bindings::merge_value(&mut tla_code, code)?;
    }

    Ok(LaunchConfig {
        source: SourceInput::File(program),
        search_paths,
        ext_code,
        tla_code,
        stop_on_entry: args.stop_on_entry,
    })
}

/// Failure response for a request that never became a command
pub fn error_response(request_seq: i64, command: &str, error: &Error) -> ProtocolMessage {
    ProtocolMessage::Response(ResponseMessage {
        seq: 0,
        request_seq,
        success: false,
        command: command.to_string(),
        message: Some(error.code().to_string()),
        body: body(ErrorResponseBody {
            error: Message {
                id: error.numeric_id(),
                format: error.to_string(),
                show_user: true,
            },
        }),
    })
}

/// Encode a session response
pub fn encode_response(response: &Response) -> ProtocolMessage {
    let request_seq = response.correlation.unwrap_or(0);
    let (success, message, payload) = match &response.outcome {
        Ok(reply) => (true, None, reply_body(reply)),
        Err(info) => (
            false,
            Some(info.code.clone()),
            body(ErrorResponseBody {
                error: Message {
                    id: info.id,
                    format: info.message.clone(),
                    show_user: true,
                },
            }),
        ),
    };

    ProtocolMessage::Response(ResponseMessage {
        seq: 0,
        request_seq,
        success,
        command: response.command.to_string(),
        message,
        body: payload,
    })
}

fn reply_body(reply: &Reply) -> Option<Value> {
    match reply {
        Reply::Capabilities => body(Capabilities::server()),
        Reply::Launched { .. } | Reply::Ack | Reply::Disconnected => None,
        Reply::Breakpoints(bps) => body(SetBreakpointsResponseBody {
            breakpoints: bps.iter().map(dap_breakpoint).collect(),
        }),
        Reply::Continued => body(ContinueResponseBody {
            all_threads_continued: true,
        }),
        Reply::Threads(threads) => body(ThreadsResponseBody {
            threads: threads
                .iter()
                .map(|t| Thread {
                    id: t.id,
                    name: t.name.clone(),
                })
                .collect(),
        }),
        Reply::StackTrace { frames, total } => body(StackTraceResponseBody {
            stack_frames: frames.iter().map(stack_frame).collect(),
            total_frames: Some(*total as i64),
        }),
        Reply::Scopes(scopes) => body(ScopesResponseBody {
            scopes: scopes
                .iter()
                .map(|s| Scope {
                    name: s.name.clone(),
                    variables_reference: s.variables_reference,
                    expensive: s.expensive,
                })
                .collect(),
        }),
        Reply::Variables(vars) => body(VariablesResponseBody {
            variables: vars
                .iter()
                .map(|v| Variable {
                    name: v.name.clone(),
                    value: v.value.clone(),
                    type_name: v.type_name.clone(),
                    variables_reference: v.variables_reference,
                })
                .collect(),
        }),
        Reply::Evaluated(result) => body(EvaluateResponseBody {
            result: result.value.clone(),
            type_name: result.type_name.clone(),
            variables_reference: result.variables_reference,
        }),
    }
}

/// Encode a session event
pub fn encode_event(event: &SessionEvent) -> ProtocolMessage {
    let (name, payload) = match event {
        SessionEvent::Initialized => ("initialized", None),
        SessionEvent::Stopped {
            reason,
            description,
            hit_breakpoint_ids,
            ..
        } => (
            "stopped",
            body(StoppedEventBody {
                reason: reason.as_str().to_string(),
                description: description.clone(),
                thread_id: Some(THREAD_ID),
                all_threads_stopped: true,
                hit_breakpoint_ids: hit_breakpoint_ids.clone(),
                text: None,
            }),
        ),
        SessionEvent::Output { category, output } => (
            "output",
            body(OutputEventBody {
                category: Some(category.as_str().to_string()),
                output: output.clone(),
            }),
        ),
        SessionEvent::BreakpointChanged(bp) => (
            "breakpoint",
            body(BreakpointEventBody {
                reason: "changed".to_string(),
                breakpoint: dap_breakpoint(bp),
            }),
        ),
        SessionEvent::Exited { exit_code } => (
            "exited",
            body(ExitedEventBody {
                exit_code: *exit_code,
            }),
        ),
        SessionEvent::Terminated => ("terminated", None),
    };

    ProtocolMessage::Event(EventMessage {
        seq: 0,
        event: name.to_string(),
        body: payload,
    })
}

/// Stamp an outgoing message with its sequence number
pub fn set_seq(message: &mut ProtocolMessage, seq: i64) {
    match message {
        ProtocolMessage::Request(m) => m.seq = seq,
        ProtocolMessage::Response(m) => m.seq = seq,
        ProtocolMessage::Event(m) => m.seq = seq,
    }
}

fn dap_breakpoint(bp: &Breakpoint) -> DapBreakpoint {
    DapBreakpoint {
        id: Some(bp.id),
        verified: bp.verified,
        message: bp.message.clone(),
        source: Some(source(&bp.file)),
        line: Some(bp.line),
    }
}

fn stack_frame(frame: &Frame) -> StackFrame {
    StackFrame {
        id: frame.id,
        name: frame.name.clone(),
        source: Some(source(&frame.location.file)),
        line: frame.location.line,
        column: frame.location.column,
    }
}

fn source(file: &Path) -> Source {
    if paths::is_pseudo_file(file) {
        return Source {
            name: Some(file.display().to_string()),
            path: None,
        };
    }
    Source {
        name: file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned()),
        path: Some(file.display().to_string()),
    }
}

fn body<T: Serialize>(value: T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

fn required<T: DeserializeOwned>(request: &RequestMessage) -> Result<T> {
    let args = request
        .arguments
        .clone()
        .ok_or_else(|| Error::invalid_arguments(&request.command, "missing arguments"))?;
    serde_json::from_value(args).map_err(|e| Error::invalid_arguments(&request.command, e))
}

fn optional<T: DeserializeOwned + Default>(request: &RequestMessage) -> Result<T> {
    match &request.arguments {
        None | Some(Value::Null) => Ok(T::default()),
        Some(args) => serde_json::from_value(args.clone())
            .map_err(|e| Error::invalid_arguments(&request.command, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorInfo;
    use crate::engine::{Location, StopReason};
    use serde_json::json;

    fn request(command: &str, arguments: Option<Value>) -> RequestMessage {
        RequestMessage {
            seq: 7,
            command: command.to_string(),
            arguments,
        }
    }

    #[test]
    fn test_decode_set_breakpoints() {
        let command = decode_request(&request(
            "setBreakpoints",
            Some(json!({
                "source": {"path": "/work/a.jsonnet"},
                "breakpoints": [{"line": 3}, {"line": 7}]
            })),
        ))
        .unwrap();
        assert_eq!(
            command,
            Command::SetBreakpoints {
                file: PathBuf::from("/work/a.jsonnet"),
                lines: vec![3, 7],
            }
        );
    }

    #[test]
    fn test_decode_launch_merges_bindings() {
        let command = decode_request(&request(
            "launch",
            Some(json!({
                "program": "/work/main.jsonnet",
                "jpath": ["/work/lib"],
                "extVars": {"env": "prod"},
                "extCode": {"replicas": 3},
                "tlaCode": {"name": "api"}
            })),
        ))
        .unwrap();

        let Command::Launch(config) = command else {
            panic!("Expected launch");
        };
        assert_eq!(
            config.search_paths,
            vec![PathBuf::from("/work/lib"), PathBuf::from("/work")]
        );
        assert_eq!(config.ext_code.get("env"), Some(&json!("prod")));
        assert_eq!(config.ext_code.get("replicas"), Some(&json!(3)));
        assert_eq!(config.tla_code.get("name"), Some(&json!("api")));
    }

    #[test]
    fn test_decode_rejects_non_string_ext_vars() {
        let err = decode_request(&request(
            "launch",
            Some(json!({"program": "main.jsonnet", "extVars": {"n": 1}})),
        ))
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_BINDINGS");
    }

    #[test]
    fn test_decode_unknown_and_malformed() {
        let err = decode_request(&request("restart", None)).unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_COMMAND");

        let err = decode_request(&request("scopes", Some(json!({"frame": 1})))).unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENTS");
    }

    #[test]
    fn test_encode_failure_response() {
        let error = Error::invalid_state("pause", "configuring");
        let response = Response {
            correlation: Some(5),
            command: "pause",
            outcome: Err(ErrorInfo::from(&error)),
        };

        let ProtocolMessage::Response(message) = encode_response(&response) else {
            panic!("Expected response");
        };
        assert!(!message.success);
        assert_eq!(message.request_seq, 5);
        assert_eq!(message.message.as_deref(), Some("INVALID_STATE"));
        let body = message.body.unwrap();
        assert_eq!(body["error"]["id"], 1001);
        assert_eq!(body["error"]["showUser"], true);
    }

    #[test]
    fn test_encode_stopped_event() {
        let event = SessionEvent::Stopped {
            reason: StopReason::Breakpoint,
            description: None,
            location: Location {
                file: PathBuf::from("/work/a.jsonnet"),
                line: 3,
                column: 1,
            },
            hit_breakpoint_ids: vec![1],
        };
        let ProtocolMessage::Event(message) = encode_event(&event) else {
            panic!("Expected event");
        };
        assert_eq!(message.event, "stopped");
        let body = message.body.unwrap();
        assert_eq!(body["reason"], "breakpoint");
        assert_eq!(body["threadId"], 1);
        assert_eq!(body["hitBreakpointIds"], json!([1]));
    }

    #[test]
    fn test_pseudo_files_have_no_path() {
        let source = source(Path::new("<stdin>"));
        assert_eq!(source.name.as_deref(), Some("<stdin>"));
        assert!(source.path.is_none());
    }
}
