//! TCP connection server.
//!
//! Clients exchange newline-delimited JSON: one request document per line, one
//! reply line per request, in order. Each connection runs on its own task.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Decoder, Encoder, Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::Result;
use crate::handler::{handle_message, Dispatch};
use crate::state::AppState;

/// Accepts client connections and serves them until shutdown.
pub struct ConnectionServer {
    listener: TcpListener,
    state: Arc<AppState>,
    connections: TaskTracker,
}

impl ConnectionServer {
    /// Bind the listener on `server.host:server.port`.
    pub async fn bind(state: Arc<AppState>) -> Result<Self> {
        let addr = state.config.server.bind_addr();
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Inference bridge listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            state,
            connections: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Accept connections until shutdown, then wait for open connections to
    /// finish their current request.
    pub async fn serve(self) -> Result<()> {
        let shutdown = self.state.shutdown.clone();

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    tracing::info!(peer = %peer, "Client connected");
                    self.connections
                        .spawn(serve_connection(stream, peer, self.state.clone()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                }
            }
        }

        drop(self.listener);
        self.connections.close();
        tracing::info!(
            open = self.connections.len(),
            "Stopped accepting connections, draining"
        );
        self.connections.wait().await;
        tracing::info!("Inference bridge stopped");

        Ok(())
    }
}

/// Line codec that yields oversize and non-UTF-8 lines as items.
///
/// `LinesCodec` has already skipped the offending line when it reports either
/// error, so decoding can go on with the bytes that follow it. Returning them
/// as items keeps `Framed` out of its errored state, which would otherwise
/// stall lines already buffered behind the bad one.
struct MessageCodec {
    lines: LinesCodec,
}

impl MessageCodec {
    fn new(max_bytes: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_bytes),
        }
    }

    fn recover(
        decoded: std::result::Result<Option<String>, LinesCodecError>,
    ) -> std::result::Result<Option<std::result::Result<String, LinesCodecError>>, LinesCodecError> {
        match decoded {
            Ok(line) => Ok(line.map(Ok)),
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                Ok(Some(Err(LinesCodecError::MaxLineLengthExceeded)))
            }
            Err(LinesCodecError::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                Ok(Some(Err(LinesCodecError::Io(e))))
            }
            Err(e) => Err(e),
        }
    }
}

impl Decoder for MessageCodec {
    type Item = std::result::Result<String, LinesCodecError>;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        Self::recover(self.lines.decode(buf))
    }

    fn decode_eof(
        &mut self,
        buf: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        Self::recover(self.lines.decode_eof(buf))
    }
}

impl Encoder<String> for MessageCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        self.lines.encode(line, dst)
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, state: Arc<AppState>) {
    let max_bytes = state.config.server.max_message_bytes;
    let mut framed = Framed::new(stream, MessageCodec::new(max_bytes));

    loop {
        let next = tokio::select! {
            _ = state.shutdown.cancelled() => break,
            next = framed.next() => next,
        };

        let dispatch = match next {
            None => break,
            Some(Ok(Ok(line))) if line.trim().is_empty() => continue,
            Some(Ok(Ok(line))) => handle_message(&state, &line).await,
            Some(Ok(Err(LinesCodecError::MaxLineLengthExceeded))) => {
                tracing::warn!(peer = %peer, "Message exceeds {} bytes", max_bytes);
                Dispatch::error(format!("Message exceeds {} bytes", max_bytes))
            }
            Some(Ok(Err(e))) => {
                tracing::debug!(peer = %peer, error = %e, "Rejected undecodable line");
                Dispatch::error(format!("Invalid JSON: {}", e))
            }
            Some(Err(e)) => {
                tracing::warn!(peer = %peer, error = %e, "Connection read failed");
                break;
            }
        };

        if let Err(e) = framed.send(dispatch.reply.to_string()).await {
            tracing::warn!(peer = %peer, error = %e, "Failed to send reply");
            break;
        }

        if dispatch.close {
            break;
        }
    }

    tracing::info!(peer = %peer, "Client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::{OllamaAdapter, PetalsAdapter};
    use crate::router::InferenceRouter;
    use crate::session::SessionRegistry;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    async fn start(max_message_bytes: usize) -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<Result<()>>) {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config.server.max_message_bytes = max_message_bytes;
        config.local.enabled = false;

        let local = Arc::new(OllamaAdapter::from_config(&config.local));
        let router = InferenceRouter::new(
            Arc::new(SessionRegistry::new(config.models.default.clone())),
            local.clone(),
            Arc::new(PetalsAdapter::new(None, vec![])),
            local,
            vec![],
        );

        let server = ConnectionServer::bind(Arc::new(AppState::new(config, router)))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let token = server.shutdown_token();
        (addr, token, tokio::spawn(server.serve()))
    }

    #[tokio::test]
    async fn test_oversize_message_keeps_connection() {
        let (addr, token, handle) = start(64).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let oversize = format!("{{\"prompt\": \"{}\"}}\n", "x".repeat(200));
        write.write_all(oversize.as_bytes()).await.unwrap();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert_eq!(reply, r#"{"error":"Message exceeds 64 bytes"}"#);

        write
            .write_all(b"{\"action\": \"create_session\"}\n")
            .await
            .unwrap();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert_eq!(reply, r#"{"session_id":1}"#);

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bad_utf8_line_does_not_stall_following_line() {
        let (addr, token, handle) = start(1024).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        write
            .write_all(b"{\"prompt\": \"\xff\xfe\"}\n{\"action\": \"create_session\"}\n")
            .await
            .unwrap();

        let reply = lines.next_line().await.unwrap().unwrap();
        assert!(reply.starts_with(r#"{"error":"Invalid JSON: "#), "{}", reply);

        let reply = tokio::time::timeout(std::time::Duration::from_secs(3), lines.next_line())
            .await
            .expect("reply to the line after the bad one")
            .unwrap()
            .unwrap();
        assert_eq!(reply, r#"{"session_id":1}"#);

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_oversize_and_valid_line_in_one_write() {
        let (addr, token, handle) = start(64).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        let batch = format!(
            "{{\"prompt\": \"{}\"}}\n{{\"action\": \"create_session\"}}\n",
            "x".repeat(200)
        );
        write.write_all(batch.as_bytes()).await.unwrap();

        let first = lines.next_line().await.unwrap().unwrap();
        assert_eq!(first, r#"{"error":"Message exceeds 64 bytes"}"#);
        let second = tokio::time::timeout(std::time::Duration::from_secs(3), lines.next_line())
            .await
            .expect("reply to the line after the oversize one")
            .unwrap()
            .unwrap();
        assert_eq!(second, r#"{"session_id":1}"#);

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_blank_lines_are_ignored() {
        let (addr, token, handle) = start(1024).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        write
            .write_all(b"\n\n{\"action\": \"close_session\", \"session_id\": 5}\n")
            .await
            .unwrap();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert_eq!(reply, r#"{"success":true}"#);

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connections() {
        let (addr, token, handle) = start(1024).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        write.write_all(b"{\"action\": \"create_session\"}\n").await.unwrap();
        lines.next_line().await.unwrap().unwrap();

        token.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(lines.next_line().await.unwrap(), None);
    }
}
