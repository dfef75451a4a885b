//! Callback channel: host-side asynchronous calls into local functions
//!
//! Each slot of a callback-bearing operation gets its own endpoint, opened
//! before the triggering source is sent. A dispatcher task per operation
//! delivers payloads to the slot functions one at a time. Firing a one-shot
//! slot tears down every endpoint of the operation; repeatable slots keep
//! listening until then.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, select_all};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::codegen;
use super::envelope::{Envelope, Outcome, ResultShape};
use super::error::{BridgeResult, CallbackLeak};
use super::handle::CallbackToken;
use super::step::Step;
use super::transport::{CallbackEndpoint, HostTransport};
use super::Bridge;

/// Identifier of one callback-bearing operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub Uuid);

impl OperationId {
    /// Create a new random OperationId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How often a slot may fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Fires once and closes the whole operation ("done", "cancel")
    OneShot,
    /// Fires any number of times ("change", "highlighted")
    Repeatable,
}

/// Payload a slot expects from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadShape {
    /// No argument
    Empty,
    /// A primitive argument (host `None` included)
    Value,
    /// A host object, delivered as a handle
    Handle,
}

impl PayloadShape {
    fn accepts(self, outcome: &Outcome) -> bool {
        matches!(
            (self, outcome),
            (PayloadShape::Empty, Outcome::Absent)
                | (PayloadShape::Value, Outcome::Value(_) | Outcome::Absent)
                | (PayloadShape::Handle, Outcome::Handle(_))
        )
    }
}

/// What a slot function receives on each invocation
pub struct CallbackContext {
    /// Bridge the operation was invoked on
    pub bridge: Bridge,
    /// Payload translated per the slot's shape
    pub payload: Outcome,
    /// Fresh step, child of the step the operation was invoked with
    pub step: Step,
    /// Token of the endpoint that received the payload
    pub token: CallbackToken,
}

/// Local async function attached to a slot
pub type CallbackFn =
    Arc<dyn Fn(CallbackContext) -> BoxFuture<'static, BridgeResult<()>> + Send + Sync>;

/// One callback registration of an operation
#[derive(Clone)]
pub struct CallbackSlot {
    cardinality: Cardinality,
    payload: PayloadShape,
    callback: CallbackFn,
}

impl CallbackSlot {
    /// Slot that fires once and ends the operation
    pub fn one_shot<F, Fut>(payload: PayloadShape, callback: F) -> Self
    where
        F: Fn(CallbackContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BridgeResult<()>> + Send + 'static,
    {
        Self::new(Cardinality::OneShot, payload, callback)
    }

    /// Slot that fires until a one-shot sibling fires
    pub fn repeatable<F, Fut>(payload: PayloadShape, callback: F) -> Self
    where
        F: Fn(CallbackContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BridgeResult<()>> + Send + 'static,
    {
        Self::new(Cardinality::Repeatable, payload, callback)
    }

    fn new<F, Fut>(cardinality: Cardinality, payload: PayloadShape, callback: F) -> Self
    where
        F: Fn(CallbackContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BridgeResult<()>> + Send + 'static,
    {
        Self {
            cardinality,
            payload,
            callback: Arc::new(move |ctx| callback(ctx).boxed()),
        }
    }

    /// Slot cardinality
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Expected payload shape
    pub fn payload(&self) -> PayloadShape {
        self.payload
    }
}

impl fmt::Debug for CallbackSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSlot")
            .field("cardinality", &self.cardinality)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// Why an operation's dispatcher stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackEnding {
    /// A one-shot slot fired and all endpoints were torn down
    OneShotFired,
    /// Supervision reclaimed the endpoints
    Reclaimed,
    /// Every endpoint stopped receiving on its own
    EndpointsClosed,
    /// The dispatcher task died
    Aborted,
}

/// Summary of a finished callback operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackReport {
    /// Operation identifier
    pub operation: OperationId,
    /// Slot functions invoked, across all slots
    pub invocations: usize,
    /// How the operation ended
    pub ending: CallbackEnding,
}

impl CallbackReport {
    /// Whether the endpoints were closed by the bridge
    pub fn torn_down(&self) -> bool {
        matches!(
            self.ending,
            CallbackEnding::OneShotFired | CallbackEnding::Reclaimed
        )
    }
}

/// Handle on an invoked callback-bearing operation
pub struct CallbackOperation {
    id: OperationId,
    outcome: Outcome,
    tokens: Vec<CallbackToken>,
    done: JoinHandle<CallbackReport>,
}

impl CallbackOperation {
    /// Operation identifier
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Result of the round trip that started the operation
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    /// Endpoint tokens, in slot order
    pub fn tokens(&self) -> &[CallbackToken] {
        &self.tokens
    }

    /// Wait until the operation's endpoints are gone
    pub async fn finished(self) -> CallbackReport {
        let id = self.id;
        self.done.await.unwrap_or(CallbackReport {
            operation: id,
            invocations: 0,
            ending: CallbackEnding::Aborted,
        })
    }
}

/// Operation still listening for callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    /// Operation identifier
    pub id: OperationId,
    /// Open endpoint tokens
    pub tokens: Vec<CallbackToken>,
    /// When the operation was invoked
    pub opened_at: DateTime<Utc>,
}

struct LiveOperation {
    tokens: Vec<CallbackToken>,
    opened_at: DateTime<Utc>,
    shutdown: Option<oneshot::Sender<()>>,
}

type Registry = Arc<Mutex<HashMap<OperationId, LiveOperation>>>;

/// Opens endpoints, starts dispatchers, and tracks live operations
pub struct CallbackChannel {
    transport: Arc<dyn HostTransport>,
    live: Registry,
}

impl CallbackChannel {
    /// Create a channel opening endpoints through `transport`
    pub fn new(transport: Arc<dyn HostTransport>) -> Self {
        Self {
            transport,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run a callback-bearing template.
    ///
    /// Every [`codegen::CALLBACK_PLACEHOLDER`] in `template` is replaced, in
    /// slot order, by the token of a freshly opened endpoint.
    pub async fn invoke(
        &self,
        bridge: &Bridge,
        template: &str,
        shape: ResultShape,
        slots: Vec<CallbackSlot>,
        step: &Step,
    ) -> BridgeResult<CallbackOperation> {
        let placeholders = template.matches(codegen::CALLBACK_PLACEHOLDER).count();
        if placeholders != slots.len() {
            return Err(super::error::UsageError::PlaceholderMismatch {
                expected: slots.len(),
                found: placeholders,
            }
            .into());
        }

        let mut endpoints: Vec<Box<dyn CallbackEndpoint>> = Vec::with_capacity(slots.len());
        for _ in &slots {
            match self.transport.open_endpoint().await {
                Ok(endpoint) => endpoints.push(endpoint),
                Err(err) => {
                    close_all(&mut endpoints);
                    return Err(err.into());
                }
            }
        }

        let tokens: Vec<CallbackToken> = endpoints.iter().map(|e| e.token().clone()).collect();
        let source = codegen::substitute_tokens(template, &tokens)?;

        let outcome = match bridge.evaluate(&source, shape, step).await {
            Ok(outcome) => outcome,
            Err(err) => {
                close_all(&mut endpoints);
                return Err(err);
            }
        };

        let id = OperationId::new();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.live.lock().insert(
            id,
            LiveOperation {
                tokens: tokens.clone(),
                opened_at: Utc::now(),
                shutdown: Some(shutdown_tx),
            },
        );

        tracing::debug!(operation = %id, slots = slots.len(), "callback operation started");

        let dispatcher = Dispatcher {
            id,
            bridge: bridge.clone(),
            endpoints,
            slots,
            parent: step.clone(),
            live: self.live.clone(),
        };
        let done = tokio::spawn(dispatcher.run(shutdown_rx));

        Ok(CallbackOperation {
            id,
            outcome,
            tokens,
            done,
        })
    }

    /// Operations whose endpoints are still open
    pub fn pending(&self) -> Vec<PendingOperation> {
        let mut pending: Vec<PendingOperation> = self
            .live
            .lock()
            .iter()
            .map(|(id, op)| PendingOperation {
                id: *id,
                tokens: op.tokens.clone(),
                opened_at: op.opened_at,
            })
            .collect();
        pending.sort_by_key(|op| op.opened_at);
        pending
    }

    /// Tear down every operation pending for at least `age` and report it
    pub fn reclaim_older_than(&self, age: chrono::Duration) -> Vec<CallbackLeak> {
        let now = Utc::now();
        let mut live = self.live.lock();
        let expired: Vec<OperationId> = live
            .iter()
            .filter(|(_, op)| now - op.opened_at >= age)
            .map(|(id, _)| *id)
            .collect();

        let mut leaks = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(mut op) = live.remove(&id) {
                if let Some(shutdown) = op.shutdown.take() {
                    let _ = shutdown.send(());
                }
                let leak = CallbackLeak {
                    operation: id,
                    tokens: op.tokens,
                    age_secs: (now - op.opened_at).num_seconds(),
                };
                tracing::warn!(%leak, "reclaiming callback endpoints");
                leaks.push(leak);
            }
        }
        leaks
    }
}

fn close_all(endpoints: &mut [Box<dyn CallbackEndpoint>]) {
    for endpoint in endpoints.iter_mut() {
        endpoint.close();
    }
}

enum Event {
    Shutdown,
    Payload(usize, Option<Value>),
}

struct Dispatcher {
    id: OperationId,
    bridge: Bridge,
    endpoints: Vec<Box<dyn CallbackEndpoint>>,
    slots: Vec<CallbackSlot>,
    parent: Step,
    live: Registry,
}

impl Dispatcher {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> CallbackReport {
        let mut open = vec![true; self.endpoints.len()];
        let mut invocations = 0;

        let ending = loop {
            if !open.iter().any(|o| *o) {
                break CallbackEnding::EndpointsClosed;
            }

            let event = {
                let receiving: Vec<BoxFuture<'_, (usize, Option<Value>)>> = self
                    .endpoints
                    .iter_mut()
                    .enumerate()
                    .filter(|(idx, _)| open[*idx])
                    .map(|(idx, endpoint)| async move { (idx, endpoint.recv().await) }.boxed())
                    .collect();

                tokio::select! {
                    _ = &mut shutdown => Event::Shutdown,
                    (received, _, _) = select_all(receiving) => {
                        Event::Payload(received.0, received.1)
                    }
                }
            };

            let (idx, raw) = match event {
                Event::Shutdown => {
                    close_all(&mut self.endpoints);
                    break CallbackEnding::Reclaimed;
                }
                Event::Payload(idx, None) => {
                    open[idx] = false;
                    continue;
                }
                Event::Payload(idx, Some(raw)) => (idx, raw),
            };

            let token = self.endpoints[idx].token().clone();
            let slot = &self.slots[idx];

            let outcome = match Envelope::from_json(raw).map(Envelope::into_outcome) {
                Ok(Ok(outcome)) if slot.payload.accepts(&outcome) => outcome,
                Ok(Ok(outcome)) => {
                    tracing::warn!(
                        %token,
                        kind = outcome.kind(),
                        "callback payload does not fit slot"
                    );
                    continue;
                }
                Ok(Err(remote)) => {
                    tracing::warn!(%token, error = %remote, "host failed while calling back");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(%token, error = %err, "dropping malformed callback payload");
                    continue;
                }
            };

            if let Outcome::Handle(key) = &outcome {
                self.bridge.arena().record(key);
            }

            let ctx = CallbackContext {
                bridge: self.bridge.clone(),
                payload: outcome,
                step: self.parent.child(),
                token: token.clone(),
            };
            if let Err(err) = (slot.callback)(ctx).await {
                tracing::warn!(%token, error = %err, "callback failed");
            }
            invocations += 1;

            if slot.cardinality == Cardinality::OneShot {
                close_all(&mut self.endpoints);
                break CallbackEnding::OneShotFired;
            }
        };

        self.live.lock().remove(&self.id);
        tracing::debug!(operation = %self.id, invocations, ?ending, "callback operation finished");

        CallbackReport {
            operation: self.id,
            invocations,
            ending,
        }
    }
}
