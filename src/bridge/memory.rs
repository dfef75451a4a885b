//! In-process scripted host
//!
//! [`ScriptedHost`] stands in for the real host in tests and embeddings: it
//! records every program it is given, answers from a queue of envelopes or a
//! responder closure, and lets the caller fire callback endpoints by token.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use super::envelope::Envelope;
use super::error::{TransportError, TransportResult};
use super::handle::CallbackToken;
use super::transport::{CallbackEndpoint, HostTransport};

type Responder = Box<dyn Fn(&str) -> Envelope + Send + Sync>;

/// Something observable the scripted host went through
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A program was executed
    Executed(String),
    /// A callback endpoint was opened
    Opened(CallbackToken),
    /// A payload was delivered to an endpoint
    Fired(CallbackToken),
    /// A callback endpoint was closed
    Closed(CallbackToken),
}

#[derive(Default)]
struct HostState {
    queued: VecDeque<Envelope>,
    events: Vec<HostEvent>,
    endpoints: HashMap<CallbackToken, mpsc::UnboundedSender<Value>>,
}

/// In-memory transport answering from a script
#[derive(Clone, Default)]
pub struct ScriptedHost {
    state: Arc<Mutex<HostState>>,
    responder: Arc<Mutex<Option<Responder>>>,
    next_token: Arc<AtomicU64>,
}

impl ScriptedHost {
    /// Create a host with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a host that answers every program with `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Envelope + Send + Sync + 'static,
    {
        let host = Self::new();
        host.set_responder(responder);
        host
    }

    /// Replace the responder used once the queue is empty
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&str) -> Envelope + Send + Sync + 'static,
    {
        *self.responder.lock() = Some(Box::new(responder));
    }

    /// Queue an envelope for the next program
    pub fn push_response(&self, envelope: Envelope) {
        self.state.lock().queued.push_back(envelope);
    }

    /// Programs executed so far, in order
    pub fn submissions(&self) -> Vec<String> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                HostEvent::Executed(program) => Some(program.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every event so far, in order
    pub fn events(&self) -> Vec<HostEvent> {
        self.state.lock().events.clone()
    }

    /// Tokens of endpoints that are still open
    pub fn open_tokens(&self) -> Vec<CallbackToken> {
        let mut tokens: Vec<CallbackToken> =
            self.state.lock().endpoints.keys().cloned().collect();
        tokens.sort();
        tokens
    }

    /// Tokens of endpoints that were closed, in closing order
    pub fn closed_tokens(&self) -> Vec<CallbackToken> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                HostEvent::Closed(token) => Some(token.clone()),
                _ => None,
            })
            .collect()
    }

    /// Deliver a payload to the endpoint addressed by `token`.
    ///
    /// Returns `false` when no such endpoint is open.
    pub fn fire(&self, token: &CallbackToken, payload: Envelope) -> bool {
        let mut state = self.state.lock();
        let delivered = match state.endpoints.get(token) {
            Some(sender) => sender.send(payload.to_json()).is_ok(),
            None => false,
        };
        if delivered {
            state.events.push(HostEvent::Fired(token.clone()));
        }
        delivered
    }

    fn close_endpoint(&self, token: &CallbackToken) {
        let mut state = self.state.lock();
        if state.endpoints.remove(token).is_some() {
            state.events.push(HostEvent::Closed(token.clone()));
        }
    }
}

#[async_trait]
impl HostTransport for ScriptedHost {
    async fn execute(&self, program: &str) -> TransportResult<Value> {
        let queued = {
            let mut state = self.state.lock();
            state.events.push(HostEvent::Executed(program.to_string()));
            state.queued.pop_front()
        };

        let envelope = match queued {
            Some(envelope) => envelope,
            None => {
                let responder = self.responder.lock();
                match responder.as_ref() {
                    Some(respond) => respond(program),
                    None => {
                        return Err(TransportError::Host(
                            "scripted host has no response for this program".into(),
                        ));
                    }
                }
            }
        };

        Ok(envelope.to_json())
    }

    async fn open_endpoint(&self) -> TransportResult<Box<dyn CallbackEndpoint>> {
        let token = CallbackToken::new(format!(
            "mem-{}",
            self.next_token.fetch_add(1, Ordering::SeqCst) + 1
        ));
        let (sender, receiver) = mpsc::unbounded_channel();

        {
            let mut state = self.state.lock();
            state.endpoints.insert(token.clone(), sender);
            state.events.push(HostEvent::Opened(token.clone()));
        }

        Ok(Box::new(MemoryEndpoint {
            token,
            receiver,
            host: self.clone(),
            closed: false,
        }))
    }
}

struct MemoryEndpoint {
    token: CallbackToken,
    receiver: mpsc::UnboundedReceiver<Value>,
    host: ScriptedHost,
    closed: bool,
}

#[async_trait]
impl CallbackEndpoint for MemoryEndpoint {
    fn token(&self) -> &CallbackToken {
        &self.token
    }

    async fn recv(&mut self) -> Option<Value> {
        self.receiver.recv().await
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.receiver.close();
            self.host.close_endpoint(&self.token);
        }
    }
}

impl Drop for MemoryEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}
