//! WebSocket connection and event loop.
//!
//! This module owns one live WebSocket to the realtime server. The
//! connection spawns a tokio task that handles:
//!
//! - Incoming text frames, parsed into [`Event`]s and forwarded in order
//! - Outgoing [`Command`]s from the adapter
//! - Graceful shutdown
//!
//! When the loop ends it reports why, and hands back every command it had
//! accepted but not yet written so the adapter can queue them again.

// ============================================================================
// Imports
// ============================================================================

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{from_str, to_string};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, trace, warn};

use crate::protocol::{Command, Event};

// ============================================================================
// LoopExit
// ============================================================================

/// Outcome of a finished event loop.
#[derive(Debug, Default)]
pub struct LoopExit {
    /// Why the loop stopped.
    pub reason: String,
    /// Commands accepted by the loop but never written, in send order.
    pub unsent: Vec<Command>,
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write a command to the socket.
    Send(Command),
    /// Close the socket.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// Handle to a live WebSocket event loop.
///
/// Cloning is cheap; all clones talk to the same loop.
#[derive(Clone)]
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
}

impl Connection {
    /// Spawns the event loop for an established WebSocket.
    ///
    /// Returns the handle, the ordered stream of inbound events, and the
    /// loop task. The event stream ends when the loop ends.
    pub(crate) fn spawn<S>(
        ws_stream: WebSocketStream<S>,
    ) -> (Self, mpsc::UnboundedReceiver<Event>, JoinHandle<LoopExit>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(Self::run_event_loop(ws_stream, command_rx, events_tx));

        (Self { command_tx }, events_rx, handle)
    }

    /// Queues a command for writing.
    ///
    /// Returns the command back if the loop has already stopped.
    pub(crate) fn try_send(&self, command: Command) -> Result<(), Command> {
        self.command_tx
            .send(ConnectionCommand::Send(command))
            .or_else(|err| match err.0 {
                ConnectionCommand::Send(command) => Err(command),
                ConnectionCommand::Shutdown => Ok(()),
            })
    }

    /// Returns `true` while the event loop is running.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.command_tx.is_closed()
    }

    /// Asks the loop to close the socket.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        events_tx: mpsc::UnboundedSender<Event>,
    ) -> LoopExit
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();
        let mut unsent = Vec::new();

        let reason = loop {
            tokio::select! {
                // Incoming frames from the server
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_message(&text, &events_tx);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break "closed by server".to_string();
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break e.to_string();
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break "stream ended".to_string();
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from the adapter
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(command)) => {
                            if let Err(e) = Self::handle_send_command(&command, &mut ws_write).await {
                                warn!(error = %e, event = command.name(), "Failed to write command");
                                unsent.push(command);
                                break e.to_string();
                            }
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break "shutdown".to_string();
                        }

                        None => {
                            debug!("Command channel closed");
                            break "command channel closed".to_string();
                        }
                    }
                }
            }
        };

        // Hand back anything accepted but not written
        command_rx.close();
        while let Ok(command) = command_rx.try_recv() {
            if let ConnectionCommand::Send(command) = command {
                unsent.push(command);
            }
        }

        if !unsent.is_empty() {
            debug!(count = unsent.len(), "Returning unsent commands");
        }
        debug!(%reason, "Event loop terminated");

        LoopExit { reason, unsent }
    }

    /// Handles an incoming text frame.
    fn handle_incoming_message(text: &str, events_tx: &mpsc::UnboundedSender<Event>) {
        match from_str::<Event>(text) {
            Ok(event) => {
                trace!(event = %event.event, "Event received");
                let _ = events_tx.send(event);
            }
            Err(e) => {
                warn!(error = %e, text = %text, "Failed to parse incoming frame");
            }
        }
    }

    /// Serializes and writes one command.
    async fn handle_send_command<S>(
        command: &Command,
        ws_write: &mut SplitSink<WebSocketStream<S>, Message>,
    ) -> Result<(), WsError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let json = match to_string(command) {
            Ok(j) => j,
            Err(e) => {
                error!(error = %e, event = command.name(), "Failed to serialize command");
                return Ok(());
            }
        };

        ws_write.send(Message::Text(json.into())).await?;
        trace!(event = command.name(), "Command sent");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::Value;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{accept_async, connect_async};

    use crate::identifiers::StarId;

    async fn pair() -> (
        WebSocketStream<TcpStream>,
        WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            accept_async(stream).await.expect("handshake")
        });
        let (client, _) = connect_async(format!("ws://{addr}")).await.expect("connect");
        (server.await.expect("join"), client)
    }

    #[tokio::test]
    async fn test_send_writes_envelope() {
        let (mut server, client) = pair().await;
        let (connection, _events, _handle) = Connection::spawn(client);

        connection
            .try_send(Command::ClaimStar {
                star_id: StarId::from("s1"),
            })
            .expect("loop running");

        let frame = server.next().await.expect("frame").expect("ok");
        let value: Value = serde_json::from_str(frame.to_text().expect("text")).expect("json");
        assert_eq!(value["event"], "claim_star");
        assert_eq!(value["data"]["star_id"], "s1");
    }

    #[tokio::test]
    async fn test_incoming_frames_forwarded_in_order() {
        let (mut server, client) = pair().await;
        let (_connection, mut events, _handle) = Connection::spawn(client);

        for n in 0..3 {
            let frame = format!(r#"{{"event":"timer_update","data":{{"remaining_seconds":{n}}}}}"#);
            server.send(Message::Text(frame.into())).await.expect("send");
        }
        server
            .send(Message::Text("not json".to_string().into()))
            .await
            .expect("send");

        for n in 0..3u64 {
            let event = events.recv().await.expect("event");
            assert_eq!(event.event, "timer_update");
            assert_eq!(event.data["remaining_seconds"].as_u64(), Some(n));
        }
    }

    #[tokio::test]
    async fn test_loop_exit_on_server_close() {
        let (mut server, client) = pair().await;
        let (connection, mut events, handle) = Connection::spawn(client);

        server.close(None).await.expect("close");

        assert!(events.recv().await.is_none());
        let exit = handle.await.expect("join");
        assert!(exit.unsent.is_empty());
        assert!(!connection.is_open());
    }

    #[tokio::test]
    async fn test_send_after_exit_returns_command() {
        let (mut server, client) = pair().await;
        let (connection, _events, handle) = Connection::spawn(client);

        server.close(None).await.expect("close");
        let _ = handle.await.expect("join");

        let command = Command::LeaveKnot {
            room_id: "R1".into(),
        };
        let returned = connection.try_send(command.clone()).expect_err("loop stopped");
        assert_eq!(returned, command);
    }
}
