//! Lazy call chains and proxy state
//!
//! A [`RemoteObject`] is either bound to a handle or carries the source that
//! would produce it. Calls on it are dispatched here: eagerly when the
//! receiver is resolved and a step is at hand, otherwise as a [`PendingCall`]
//! that can extend the chain or be resolved later in one fused round trip.

use std::fmt;

use super::envelope::{Outcome, ResultShape};
use super::error::{BridgeResult, UsageError};
use super::handle::HandleKey;
use super::step::Step;
use super::{Bridge, BridgeConfig, codegen};

/// Host source that evaluates to a not-yet-materialized object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    source: String,
    links: usize,
}

impl Chain {
    /// Chain rooted at a host expression (counts as one link)
    pub fn root(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            links: 1,
        }
    }

    /// Source text of the whole chain
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of operations the chain is made of
    pub fn links(&self) -> usize {
        self.links
    }
}

/// Where a proxy's value lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyState {
    /// Materialized on the host under this key
    Resolved(HandleKey),
    /// Producible by running this chain
    Pending(Chain),
}

/// Local stand-in for an object living in the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    state: ProxyState,
}

impl RemoteObject {
    /// Proxy bound to a handle
    pub fn resolved(key: HandleKey) -> Self {
        Self {
            state: ProxyState::Resolved(key),
        }
    }

    /// Proxy produced by a root host expression, e.g. a module function call
    pub fn root(source: impl Into<String>) -> Self {
        Self {
            state: ProxyState::Pending(Chain::root(source)),
        }
    }

    pub(crate) fn pending(chain: Chain) -> Self {
        Self {
            state: ProxyState::Pending(chain),
        }
    }

    /// Current state
    pub fn state(&self) -> &ProxyState {
        &self.state
    }

    /// Handle key, once resolved
    pub fn handle(&self) -> Option<&HandleKey> {
        match &self.state {
            ProxyState::Resolved(key) => Some(key),
            ProxyState::Pending(_) => None,
        }
    }

    /// Check whether the proxy is bound to a handle
    pub fn is_resolved(&self) -> bool {
        matches!(self.state, ProxyState::Resolved(_))
    }

    /// Links that would run to produce this object (zero once resolved)
    pub fn links(&self) -> usize {
        match &self.state {
            ProxyState::Resolved(_) => 0,
            ProxyState::Pending(chain) => chain.links,
        }
    }

    /// Source addressing this object: its handle once resolved, else its chain
    pub fn source(&self, config: &BridgeConfig) -> String {
        match &self.state {
            ProxyState::Resolved(key) => codegen::handle_ref(config, key),
            ProxyState::Pending(chain) => chain.source.clone(),
        }
    }

    /// Materialize the object up to this point.
    ///
    /// A resolved proxy is returned as is, without a round trip.
    pub async fn materialize(&self, bridge: &Bridge, step: &Step) -> BridgeResult<RemoteObject> {
        match &self.state {
            ProxyState::Resolved(_) => Ok(self.clone()),
            ProxyState::Pending(chain) => {
                let outcome = bridge
                    .evaluate(&chain.source, ResultShape::Handle, step)
                    .await?;
                match outcome {
                    Outcome::Handle(key) => Ok(RemoteObject::resolved(key)),
                    // ResultShape::Handle only lets handles through.
                    other => Err(super::error::TransportError::UnexpectedKind {
                        expected: "handle",
                        found: other.kind(),
                    }
                    .into()),
                }
            }
        }
    }
}

/// One requested operation: the source suffix and what it returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    suffix: String,
    shape: ResultShape,
}

impl Operation {
    /// Method call with already-quoted arguments, returning a value
    pub fn method<S: AsRef<str>>(name: &str, args: &[S]) -> Self {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        Self {
            suffix: format!(".{}({})", name, args.join(", ")),
            shape: ResultShape::Value,
        }
    }

    /// Attribute read, returning a value
    pub fn attribute(name: &str) -> Self {
        Self {
            suffix: format!(".{name}"),
            shape: ResultShape::Value,
        }
    }

    /// Declare what the operation returns
    pub fn returning(mut self, shape: ResultShape) -> Self {
        self.shape = shape;
        self
    }

    /// Source appended to the receiver
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Declared result shape
    pub fn shape(&self) -> ResultShape {
        self.shape
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.suffix)
    }
}

/// Operation that has not been sent to the host yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCall {
    prefix: String,
    suffix: String,
    shape: ResultShape,
    links: usize,
    receiver_resolved: bool,
}

impl PendingCall {
    /// Source materializing only the receiver
    pub fn prefix_source(&self) -> &str {
        &self.prefix
    }

    /// Source materializing the receiver and applying the operation in one shot
    pub fn fused_source(&self) -> String {
        format!("{}{}", self.prefix, self.suffix)
    }

    /// Declared result shape of the operation
    pub fn shape(&self) -> ResultShape {
        self.shape
    }

    /// Links of the fused chain
    pub fn links(&self) -> usize {
        self.links
    }

    /// Keep the call as an intermediate link: a pending proxy for its result
    pub fn into_proxy(self) -> RemoteObject {
        let links = self.links;
        RemoteObject::pending(Chain {
            source: self.fused_source(),
            links,
        })
    }

    /// Resolve the fused chain in a single round trip.
    ///
    /// Without a step this is only allowed when the receiver was already
    /// resolved; it then runs on a lineage of its own.
    pub async fn resolve(self, bridge: &Bridge, step: Option<&Step>) -> BridgeResult<Outcome> {
        let source = self.fused_source();
        match step {
            Some(step) => bridge.evaluate(&source, self.shape, step).await,
            None if self.receiver_resolved => {
                bridge.evaluate(&source, self.shape, &Step::new()).await
            }
            None => Err(UsageError::MissingStep {
                operation: self.suffix,
            }
            .into()),
        }
    }
}

/// Result of calling an operation on a proxy
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    /// The operation was evaluated now
    Resolved(Outcome),
    /// The operation was deferred
    Pending(PendingCall),
}

/// How [`dispatch`] decided to run an operation
#[derive(Debug)]
pub enum Dispatch<'s> {
    /// Evaluate this source now, on this step
    Eager {
        /// Handle reference plus operation suffix
        source: String,
        /// Step whose turn the round trip takes
        step: &'s Step,
    },
    /// Defer: build a pending call
    Deferred(PendingCall),
}

/// Decide eager or lazy for `operation` on `receiver`. Pure: nothing is sent.
///
/// Eager only when the receiver is resolved and a step is supplied.
pub fn dispatch<'s>(
    config: &BridgeConfig,
    receiver: &RemoteObject,
    operation: &Operation,
    step: Option<&'s Step>,
) -> Result<Dispatch<'s>, UsageError> {
    let prefix = receiver.source(config);

    if let (ProxyState::Resolved(_), Some(step)) = (&receiver.state, step) {
        return Ok(Dispatch::Eager {
            source: format!("{}{}", prefix, operation.suffix),
            step,
        });
    }

    let links = receiver.links() + 1;
    if let Some(max) = config.max_chain_length {
        if links > max {
            return Err(UsageError::ChainTooLong { links, max });
        }
    }

    Ok(Dispatch::Deferred(PendingCall {
        prefix,
        suffix: operation.suffix.clone(),
        shape: operation.shape,
        links,
        receiver_resolved: receiver.is_resolved(),
    }))
}
