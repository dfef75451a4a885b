//! Bridge core and public API
//!
//! This module provides the [`Bridge`] facade that ties the chain builder,
//! the remote evaluator, the callback channel, and the handle arena to one
//! host transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

// Submodules
pub mod callback;
pub mod chain;
pub mod codegen;
pub mod envelope;
pub mod error;
pub mod evaluator;
pub mod handle;
pub mod memory;
pub mod quote;
pub mod step;
pub mod tcp;
pub mod transport;

pub use callback::{
    CallbackChannel, CallbackContext, CallbackEnding, CallbackOperation, CallbackReport,
    CallbackSlot, Cardinality, OperationId, PayloadShape, PendingOperation,
};
pub use chain::{Call, Chain, Operation, PendingCall, ProxyState, RemoteObject};
pub use envelope::{Envelope, Outcome, ResultShape};
pub use error::{
    BridgeError, BridgeResult, CallbackLeak, RemoteError, TransportError, UsageError,
};
pub use handle::{CallbackToken, HandleArena, HandleKey};
pub use memory::{HostEvent, ScriptedHost};
pub use step::{LineageId, Step, StepConflictPolicy};
pub use tcp::TcpTransport;
pub use transport::{CallbackEndpoint, HostTransport};

use crate::catalog::Window;
use chain::Dispatch;
use evaluator::Evaluator;

/// Configuration for the hostlink bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Host global holding the handle table
    pub handle_table: String,

    /// Host global each program stores its envelope in
    pub result_slot: String,

    /// Host function wrapping a thunk into an envelope
    pub envelope_helper: String,

    /// Host function forwarding callback arguments to an endpoint
    pub callback_helper: String,

    /// Host module exposing the root functions (`active_window`, `windows`)
    pub host_module: String,

    /// Interface callback endpoints listen on
    pub callback_host: String,

    /// Longest chain the builder accepts (unlimited when absent)
    pub max_chain_length: Option<usize>,

    /// What happens when a lineage is entered while busy
    pub step_conflict: StepConflictPolicy,

    /// Trace generated source
    pub debug: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            handle_table: "__hostlink_handles".to_string(),
            result_slot: "__hostlink_result".to_string(),
            envelope_helper: "__hostlink_envelope".to_string(),
            callback_helper: "__hostlink_callback".to_string(),
            host_module: "sublime".to_string(),
            callback_host: "127.0.0.1".to_string(),
            max_chain_length: None,
            step_conflict: StepConflictPolicy::Queue,
            debug: false,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: BridgeConfig =
            serde_json::from_slice(&data).context("Failed to deserialize config")?;
        config
            .validate()
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Check that every name spliced into generated programs is a host
    /// identifier and that the chain limit admits at least a root.
    pub fn validate(&self) -> BridgeResult<()> {
        let globals = [
            ("handle_table", &self.handle_table),
            ("result_slot", &self.result_slot),
            ("envelope_helper", &self.envelope_helper),
            ("callback_helper", &self.callback_helper),
        ];
        for (field, name) in globals {
            if !is_identifier(name) {
                return Err(BridgeError::Config(format!(
                    "{field} must be an identifier, got {name:?}"
                )));
            }
        }

        if !self.host_module.split('.').all(is_identifier) {
            return Err(BridgeError::Config(format!(
                "host_module must be a dotted module path, got {:?}",
                self.host_module
            )));
        }
        if self.callback_host.trim().is_empty() {
            return Err(BridgeError::Config("callback_host is empty".into()));
        }
        if self.max_chain_length == Some(0) {
            return Err(BridgeError::Config(
                "max_chain_length must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Write configuration as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        let json = serde_json::to_vec_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first == '_' || first.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

struct BridgeInner {
    config: BridgeConfig,
    evaluator: Evaluator,
    arena: Arc<HandleArena>,
    callbacks: CallbackChannel,
}

/// The bridge facade
///
/// Cheap to clone: clones share the transport, the arena, and the callback
/// registry, so callback functions can keep driving the host.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    /// Create a bridge talking to the host through `transport`
    pub fn new(config: BridgeConfig, transport: Arc<dyn HostTransport>) -> Self {
        let arena = Arc::new(HandleArena::new());
        let evaluator = Evaluator::new(config.clone(), transport.clone(), arena.clone());
        let callbacks = CallbackChannel::new(transport);

        Self {
            inner: Arc::new(BridgeInner {
                config,
                evaluator,
                arena,
                callbacks,
            }),
        }
    }

    /// Evaluate source on the host in one round trip
    pub async fn evaluate(
        &self,
        expr: &str,
        shape: ResultShape,
        step: &Step,
    ) -> BridgeResult<Outcome> {
        self.inner.evaluator.evaluate(expr, shape, step).await
    }

    /// Evaluate source and post-process the primitive result
    pub async fn evaluate_map<T, F>(
        &self,
        expr: &str,
        shape: ResultShape,
        step: &Step,
        post: F,
    ) -> BridgeResult<T>
    where
        F: FnOnce(Value) -> BridgeResult<T>,
    {
        self.inner.evaluator.evaluate_map(expr, shape, step, post).await
    }

    /// Call `operation` on `receiver`: evaluated now when the receiver is
    /// resolved and a step is given, deferred otherwise
    pub async fn call(
        &self,
        receiver: &RemoteObject,
        operation: &Operation,
        step: Option<&Step>,
    ) -> BridgeResult<Call> {
        if let Some(key) = receiver.handle() {
            if self.inner.arena.is_released(key) {
                return Err(UsageError::ReleasedHandle(key.to_string()).into());
            }
        }

        match chain::dispatch(&self.inner.config, receiver, operation, step)? {
            Dispatch::Eager { source, step } => {
                let outcome = self.evaluate(&source, operation.shape(), step).await?;
                Ok(Call::Resolved(outcome))
            }
            Dispatch::Deferred(pending) => Ok(Call::Pending(pending)),
        }
    }

    /// Run a callback-bearing template; see [`CallbackChannel::invoke`]
    pub async fn invoke(
        &self,
        template: &str,
        shape: ResultShape,
        slots: Vec<CallbackSlot>,
        step: &Step,
    ) -> BridgeResult<CallbackOperation> {
        self.inner
            .callbacks
            .invoke(self, template, shape, slots, step)
            .await
    }

    /// Materialize a proxy; a resolved one costs no round trip
    pub async fn materialize(
        &self,
        object: &RemoteObject,
        step: &Step,
    ) -> BridgeResult<RemoteObject> {
        object.materialize(self, step).await
    }

    /// Drop every handle this session received from the host table.
    ///
    /// Returns the number of entries the host actually removed. On failure
    /// the keys stay live in the arena.
    pub async fn release_handles(&self, step: &Step) -> BridgeResult<usize> {
        let keys = self.inner.arena.drain();
        if keys.is_empty() {
            return Ok(0);
        }

        let expr = codegen::release_expr(&self.inner.config, &keys);
        let released = self
            .evaluate_map(&expr, ResultShape::Value, step, |value| {
                value.as_u64().map(|n| n as usize).ok_or_else(|| {
                    TransportError::MalformedEnvelope(format!(
                        "release count is not a number: {value}"
                    ))
                    .into()
                })
            })
            .await;

        match released {
            Ok(count) => {
                tracing::debug!(requested = keys.len(), released = count, "released handles");
                Ok(count)
            }
            Err(err) => {
                self.inner.arena.restore(&keys);
                Err(err)
            }
        }
    }

    /// Install the host-side helpers; returns the protocol version they report
    pub async fn install_prelude(&self, step: &Step) -> BridgeResult<Value> {
        let program = codegen::host_prelude(&self.inner.config);
        let outcome = self.inner.evaluator.execute_raw(&program, step).await?;
        Ok(outcome.into_value().unwrap_or(Value::Null))
    }

    /// The host's active window, as a pending root (no round trip)
    pub fn active_window(&self) -> Window {
        let source = format!("{}.active_window()", self.inner.config.host_module);
        Window::new(self.clone(), RemoteObject::root(source))
    }

    /// Every open window, in host order
    pub async fn windows(&self, step: &Step) -> BridgeResult<Vec<Window>> {
        let source = format!("{}.windows()", self.inner.config.host_module);
        let keys = self
            .evaluate_map(&source, ResultShape::HandleList, step, |value| {
                Ok(envelope::handle_keys(value)?)
            })
            .await?;

        Ok(keys
            .into_iter()
            .map(|key| Window::new(self.clone(), RemoteObject::resolved(key)))
            .collect())
    }

    /// Bridge configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Handles received by this session
    pub fn arena(&self) -> &Arc<HandleArena> {
        &self.inner.arena
    }

    /// Callback channel, for supervision of pending operations
    pub fn callbacks(&self) -> &CallbackChannel {
        &self.inner.callbacks
    }
}
