//! DAP server
//!
//! Runs one debug session per client connection, over stdio or TCP. A
//! reader task decodes framed messages, a writer task stamps sequence numbers
//! and writes responses and events, and the session loop in between feeds
//! requests and execution events to the router.

use std::net::SocketAddr;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::common::{Error, Result};
use crate::engine::Evaluator;
use crate::session::{self, Command, Request, Router, SessionEvent, SessionState};

use super::codec;
use super::translate::{self, decode_request, encode_event, encode_response, error_response};
use super::types::ProtocolMessage;

/// Serve a single session over this process's stdin/stdout
pub async fn serve_stdio<E: Evaluator>(engine: E) -> Result<()> {
    tracing::info!("Serving DAP over stdio");
    run_session(tokio::io::stdin(), tokio::io::stdout(), engine).await
}

/// Listen on `host:port` and serve sessions one after another until Ctrl+C
pub async fn serve_tcp<E, F>(host: &str, port: u16, make_engine: F) -> Result<()>
where
    E: Evaluator,
    F: FnMut() -> E,
{
    let listener = TcpListener::bind((host, port)).await?;
    serve_listener(listener, make_engine).await
}

/// Serve sessions from an already bound listener
pub async fn serve_listener<E, F>(listener: TcpListener, mut make_engine: F) -> Result<()>
where
    E: Evaluator,
    F: FnMut() -> E,
{
    let local: Option<SocketAddr> = listener.local_addr().ok();
    tracing::info!(address = ?local, "DAP server listening");
    eprintln!(
        "DAP server listening on {}",
        local.map(|a| a.to_string()).unwrap_or_default()
    );

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };
                tracing::info!(%peer, "Client connected");

                let (reader, writer) = stream.into_split();
                tokio::select! {
                    result = run_session(reader, writer, make_engine()) => {
                        if let Err(e) = result {
                            tracing::warn!(%peer, error = %e, "Session ended with error");
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Interrupted, shutting down");
                        break;
                    }
                }
                tracing::info!(%peer, "Session closed");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Run one debug session over a byte stream pair
///
/// Returns after the client disconnects (request or EOF). Malformed messages
/// get a failure response and the session continues.
pub async fn run_session<R, W, E>(reader: R, writer: W, engine: E) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    E: Evaluator,
{
    let (mut router, mut execution_events, mut session_events) = session::spawn(engine)?;

    let (incoming_tx, mut incoming) = mpsc::channel::<Result<String>>(64);
    let reader_task = tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        loop {
            let result = codec::read_message(&mut reader).await;
            let closed = matches!(result, Err(Error::ClientDisconnected) | Err(Error::Io(_)));
            if incoming_tx.send(result).await.is_err() || closed {
                break;
            }
        }
    });

    let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<ProtocolMessage>();
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        let mut seq: i64 = 1;
        while let Some(mut message) = outgoing_rx.recv().await {
            translate::set_seq(&mut message, seq);
            seq += 1;

            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize DAP message");
                    continue;
                }
            };
            tracing::trace!(%json, "DAP send");
            if let Err(e) = codec::write_message(&mut writer, &json).await {
                tracing::warn!(error = %e, "Failed to write DAP message");
                break;
            }
        }
    });

    let send = |message: ProtocolMessage| {
        if outgoing.send(message).is_err() {
            tracing::debug!("Writer closed, dropping message");
        }
    };

    loop {
        tokio::select! {
            next = incoming.recv() => {
                let Some(next) = next else {
                    break;
                };
                match next {
                    Ok(raw) => {
                        let (response, done) = handle_message(&mut router, &raw).await;
                        send(response);
                        drain(&mut session_events, &send);
                        if done {
                            break;
                        }
                    }
                    Err(Error::ClientDisconnected) => {
                        tracing::info!("Client closed the connection");
                        break;
                    }
                    Err(Error::Io(e)) => {
                        tracing::warn!(error = %e, "Read failed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Malformed DAP message");
                        send(error_response(0, "unknown", &e));
                    }
                }
            }
            Some(event) = execution_events.recv() => {
                router.on_execution_event(event).await;
                drain(&mut session_events, &send);
            }
        }
    }

    // A client that vanished without `disconnect` still ends the program
    if router.state() != SessionState::Terminated {
        router.dispatch(Request::new(Command::Disconnect)).await;
        drain(&mut session_events, &send);
    }
    router.shutdown().await;

    drop(send);
    drop(outgoing);
    if let Err(e) = writer_task.await {
        tracing::warn!(error = %e, "Writer task failed");
    }
    reader_task.abort();

    tracing::debug!("DAP session finished");
    Ok(())
}

/// Decode, dispatch, and encode one raw message; `true` once the client disconnected
async fn handle_message(router: &mut Router, raw: &str) -> (ProtocolMessage, bool) {
    let request = match serde_json::from_str::<ProtocolMessage>(raw) {
        Ok(ProtocolMessage::Request(request)) => request,
        Ok(_) => {
            let error = Error::Transport("expected a request".to_string());
            return (error_response(0, "unknown", &error), false);
        }
        Err(e) => {
            // Salvage seq/command so the client can correlate the failure
            let value: Option<Value> = serde_json::from_str(raw).ok();
            let seq = value
                .as_ref()
                .and_then(|v| v.get("seq"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let command = value
                .as_ref()
                .and_then(|v| v.get("command"))
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let error = Error::Transport(e.to_string());
            return (error_response(seq, &command, &error), false);
        }
    };

    tracing::debug!(seq = request.seq, command = %request.command, "DAP request");

    match decode_request(&request) {
        Ok(command) => {
            let done = matches!(command, Command::Disconnect);
            let response = router
                .dispatch(Request::correlated(request.seq, command))
                .await;
            (encode_response(&response), done)
        }
        Err(e) => {
            tracing::debug!(command = %request.command, error = %e, "Rejected DAP request");
            (error_response(request.seq, &request.command, &e), false)
        }
    }
}

fn drain(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    send: &impl Fn(ProtocolMessage),
) {
    while let Ok(event) = events.try_recv() {
        tracing::debug!(?event, "Session event");
        send(encode_event(&event));
    }
}
