//! Remote evaluator: one program, one round trip, one envelope
//!
//! The evaluator wraps source in an envelope program, waits for the step's
//! turn, sends the program exactly once, and turns the envelope into an
//! [`Outcome`] or a typed failure.

use serde_json::Value;
use std::sync::Arc;

use super::BridgeConfig;
use super::codegen;
use super::envelope::{Envelope, Outcome, ResultShape};
use super::error::{BridgeError, BridgeResult, TransportError};
use super::handle::{HandleArena, HandleKey};
use super::step::Step;
use super::transport::HostTransport;

/// Sends generated source to the host and hydrates the result
pub struct Evaluator {
    config: BridgeConfig,
    transport: Arc<dyn HostTransport>,
    arena: Arc<HandleArena>,
}

impl Evaluator {
    /// Create an evaluator over a transport, recording handles into `arena`
    pub fn new(
        config: BridgeConfig,
        transport: Arc<dyn HostTransport>,
        arena: Arc<HandleArena>,
    ) -> Self {
        Self {
            config,
            transport,
            arena,
        }
    }

    /// Evaluate `expr` on the host and check the result against `shape`
    pub async fn evaluate(
        &self,
        expr: &str,
        shape: ResultShape,
        step: &Step,
    ) -> BridgeResult<Outcome> {
        let program = codegen::envelope_program(&self.config, expr, shape);
        let raw = self.round_trip(&program, step).await?;
        let outcome = shape.accept(Envelope::from_json(raw)?.into_outcome()?)?;

        match &outcome {
            Outcome::Handle(key) => self.arena.record(key),
            Outcome::Value(Value::Array(items)) if shape == ResultShape::HandleList => {
                for key in items.iter().filter_map(Value::as_str) {
                    self.arena.record(&HandleKey::new(key));
                }
            }
            _ => {}
        }
        Ok(outcome)
    }

    /// Evaluate a primitive-producing expression and post-process the value
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
        match self.evaluate(expr, shape, step).await? {
            Outcome::Value(value) => post(value),
            Outcome::Absent => post(Value::Null),
            Outcome::Handle(_) => Err(TransportError::UnexpectedKind {
                expected: shape.as_str(),
                found: "handle",
            }
            .into()),
        }
    }

    /// Run a raw program whose result slot already holds an envelope
    pub async fn execute_raw(&self, program: &str, step: &Step) -> BridgeResult<Outcome> {
        let raw = self.round_trip(program, step).await?;
        Ok(Envelope::from_json(raw)?.into_outcome()?)
    }

    async fn round_trip(&self, program: &str, step: &Step) -> BridgeResult<Value> {
        let turn = step.enter(self.config.step_conflict).await?;

        tracing::debug!(
            lineage = %step.lineage(),
            bytes = program.len(),
            "round trip"
        );
        if self.config.debug {
            tracing::trace!(lineage = %step.lineage(), %program, "generated source");
        }

        let result = self.transport.execute(program).await;
        turn.complete();
        result.map_err(BridgeError::from)
    }

    /// Handle arena shared with the bridge
    pub fn arena(&self) -> &Arc<HandleArena> {
        &self.arena
    }

    /// Transport used for round trips
    pub fn transport(&self) -> &Arc<dyn HostTransport> {
        &self.transport
    }
}
