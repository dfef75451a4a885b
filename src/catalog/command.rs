//! Window commands and their registry
//!
//! Commands are registered on an explicit [`CommandRegistry`] owned by the
//! embedding application. The host side routes a command invocation to
//! [`CommandRegistry::run`] together with the handle of its command object.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::handle_op;
use super::window::Window;
use crate::bridge::{Bridge, BridgeResult, HandleKey, Operation, RemoteObject, Step, UsageError};

/// A command run against a window
#[async_trait]
pub trait WindowCommand: Send + Sync {
    /// Run the command
    async fn run(&self, ctx: &CommandContext, args: &Value, step: &Step) -> BridgeResult<()>;

    /// Whether the command can run right now
    async fn is_enabled(
        &self,
        _ctx: &CommandContext,
        _args: &Value,
        _step: &Step,
    ) -> BridgeResult<bool> {
        Ok(true)
    }

    /// Whether the command shows up in menus
    async fn is_visible(
        &self,
        _ctx: &CommandContext,
        _args: &Value,
        _step: &Step,
    ) -> BridgeResult<bool> {
        Ok(true)
    }
}

/// What a command sees of the host
#[derive(Clone)]
pub struct CommandContext {
    bridge: Bridge,
    command: RemoteObject,
}

impl CommandContext {
    /// Context for the host command object stored under `command`
    pub fn new(bridge: Bridge, command: HandleKey) -> Self {
        Self {
            bridge,
            command: RemoteObject::resolved(command),
        }
    }

    /// Bridge the command runs on
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// The command object itself
    pub fn command(&self) -> &RemoteObject {
        &self.command
    }

    /// The window the command was invoked in, resolved
    pub async fn window(&self, step: &Step) -> BridgeResult<Window> {
        let object = handle_op(
            &self.bridge,
            &self.command,
            Operation::attribute("window"),
            Some(step),
        )
        .await?;
        Ok(Window::new(self.bridge.clone(), object))
    }
}

/// Named window commands
#[derive(Default)]
pub struct CommandRegistry {
    commands: RwLock<BTreeMap<String, Arc<dyn WindowCommand>>>,
}

impl CommandRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `command` under `name`, replacing any previous registration
    pub fn register<C>(&self, name: impl Into<String>, command: C)
    where
        C: WindowCommand + 'static,
    {
        let name = name.into();
        tracing::debug!(command = %name, "registered window command");
        self.commands.write().insert(name, Arc::new(command));
    }

    /// Remove a command; returns whether it was registered
    pub fn unregister(&self, name: &str) -> bool {
        self.commands.write().remove(name).is_some()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.commands.read().keys().cloned().collect()
    }

    /// Check whether a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.commands.read().contains_key(name)
    }

    /// Run the command registered as `name`
    pub async fn run(
        &self,
        name: &str,
        ctx: &CommandContext,
        args: &Value,
        step: &Step,
    ) -> BridgeResult<()> {
        let command = self.lookup(name)?;
        tracing::debug!(command = name, lineage = %step.lineage(), "running window command");
        command.run(ctx, args, step).await
    }

    /// Ask the command registered as `name` whether it is enabled
    pub async fn is_enabled(
        &self,
        name: &str,
        ctx: &CommandContext,
        args: &Value,
        step: &Step,
    ) -> BridgeResult<bool> {
        self.lookup(name)?.is_enabled(ctx, args, step).await
    }

    /// Ask the command registered as `name` whether it is visible
    pub async fn is_visible(
        &self,
        name: &str,
        ctx: &CommandContext,
        args: &Value,
        step: &Step,
    ) -> BridgeResult<bool> {
        self.lookup(name)?.is_visible(ctx, args, step).await
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn WindowCommand>, UsageError> {
        self.commands
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| UsageError::UnknownCommand(name.to_string()))
    }
}
