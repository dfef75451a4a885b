//! Newline-delimited JSON transport over TCP
//!
//! Programs travel over one persistent connection as `{"id", "source"}` lines
//! and come back as `{"id", "result"}` or `{"id", "error"}` lines. Each
//! callback endpoint is its own ephemeral listener; its token is the port.
//!
//! A request whose caller went away before the reply arrived leaves that reply
//! on the wire. The next request skips replies with older ids. A request
//! abandoned halfway through writing leaves the stream unframed, and the
//! connection reports [`TransportError::Closed`] from then on.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use super::error::{TransportError, TransportResult};
use super::handle::CallbackToken;
use super::transport::{CallbackEndpoint, HostTransport};

/// Transport speaking NDJSON to a host-side execution server
pub struct TcpTransport {
    connection: Mutex<Connection>,
    callback_host: String,
    peer: SocketAddr,
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_request_id: u64,
    /// Partial reply line; survives a cancelled read
    line: String,
    /// Set while a request is being written
    writing: bool,
}

impl TcpTransport {
    /// Connect to the host's execution server.
    ///
    /// Callback listeners bind to `callback_host` on an ephemeral port.
    pub async fn connect<A>(addr: A, callback_host: impl Into<String>) -> TransportResult<Self>
    where
        A: ToSocketAddrs,
    {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        tracing::info!(%peer, "connected to host");

        Ok(Self {
            connection: Mutex::new(Connection {
                reader: BufReader::new(read_half),
                writer: write_half,
                next_request_id: 1,
                line: String::new(),
                writing: false,
            }),
            callback_host: callback_host.into(),
            peer,
        })
    }

    /// Address of the host's execution server
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Connection {
    async fn send_request(&mut self, source: &str) -> TransportResult<Value> {
        if self.writing {
            return Err(TransportError::Closed);
        }

        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let envelope = json!({
            "id": request_id,
            "source": source,
        });

        let mut payload = serde_json::to_vec(&envelope)?;
        payload.push(b'\n');
        self.writing = true;
        self.writer.write_all(&payload).await?;
        self.writer.flush().await?;
        self.writing = false;

        let response = loop {
            let response = self.read_response().await?;
            let response_id = response.get("id").and_then(Value::as_u64).ok_or_else(|| {
                TransportError::MalformedEnvelope("response missing id".into())
            })?;

            if response_id < request_id {
                tracing::warn!(
                    expected = request_id,
                    got = response_id,
                    "discarding reply to an abandoned request"
                );
                continue;
            }
            if response_id != request_id {
                return Err(TransportError::ResponseMismatch {
                    expected: request_id,
                    got: response_id,
                });
            }
            break response;
        };

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown host error")
                .to_owned();
            return Err(TransportError::Host(message));
        }

        response
            .get("result")
            .cloned()
            .ok_or_else(|| TransportError::MalformedEnvelope("response missing result".into()))
    }

    async fn read_response(&mut self) -> TransportResult<Value> {
        if self.reader.read_line(&mut self.line).await? == 0 {
            return Err(TransportError::Closed);
        }
        let line = std::mem::take(&mut self.line);
        Ok(serde_json::from_str(&line)?)
    }
}

#[async_trait]
impl HostTransport for TcpTransport {
    async fn execute(&self, program: &str) -> TransportResult<Value> {
        let mut connection = self.connection.lock().await;
        connection.send_request(program).await
    }

    async fn open_endpoint(&self) -> TransportResult<Box<dyn CallbackEndpoint>> {
        let listener = TcpListener::bind((self.callback_host.as_str(), 0)).await?;
        let port = listener.local_addr()?.port();
        let token = CallbackToken::new(port.to_string());
        let (sender, receiver) = mpsc::unbounded_channel();

        let accept_task = tokio::spawn(accept_loop(listener, sender, token.clone()));
        tracing::debug!(%token, "callback endpoint listening");

        Ok(Box::new(TcpEndpoint {
            token,
            receiver,
            accept_task,
        }))
    }
}

async fn accept_loop(
    listener: TcpListener,
    sender: mpsc::UnboundedSender<Value>,
    token: CallbackToken,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                tracing::warn!(%token, error = %err, "callback accept failed");
                continue;
            }
        };

        let sender = sender.clone();
        let token = token.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match serde_json::from_str::<Value>(&line) {
                        Ok(payload) => {
                            if sender.send(payload).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(
                                %token,
                                %peer,
                                error = %err,
                                "dropping unparsable callback payload"
                            );
                        }
                    },
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(%token, %peer, error = %err, "callback connection failed");
                        break;
                    }
                }
            }
        });
    }
}

struct TcpEndpoint {
    token: CallbackToken,
    receiver: mpsc::UnboundedReceiver<Value>,
    accept_task: JoinHandle<()>,
}

#[async_trait]
impl CallbackEndpoint for TcpEndpoint {
    fn token(&self) -> &CallbackToken {
        &self.token
    }

    async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    fn close(&mut self) {
        // Aborting the accept loop drops the listener and frees the port.
        self.accept_task.abort();
        self.receiver.close();
    }
}

impl Drop for TcpEndpoint {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
