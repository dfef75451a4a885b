use async_trait::async_trait;
use hostlink::bridge::{
    BridgeError, BridgeResult, Envelope, HandleKey, ScriptedHost, Step, StepConflictPolicy,
};
use hostlink::catalog::{CommandContext, CommandRegistry, WindowCommand};
use hostlink::{Bridge, BridgeConfig};
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;

struct Announce;

#[async_trait]
impl WindowCommand for Announce {
    async fn run(&self, ctx: &CommandContext, args: &Value, step: &Step) -> BridgeResult<()> {
        let message = args["message"].as_str().unwrap_or("hello");
        let window = ctx.window(step).await?;
        window.status_message(message, Some(step)).await
    }

    async fn is_enabled(&self, ctx: &CommandContext, _: &Value, step: &Step) -> BridgeResult<bool> {
        let window = ctx.window(step).await?;
        Ok(window.num_groups(Some(step)).await? > 1)
    }
}

#[tokio::test]
async fn registered_commands_drive_their_window() {
    let host = ScriptedHost::new();
    host.push_response(Envelope::Handle {
        key: HandleKey::new("w1"),
    });
    host.push_response(Envelope::None);
    let bridge = Bridge::new(BridgeConfig::default(), Arc::new(host.clone()));

    let registry = CommandRegistry::new();
    registry.register("announce", Announce);
    assert!(registry.contains("announce"));

    let ctx = CommandContext::new(bridge, HandleKey::new("cmd7"));
    let step = Step::new();
    registry
        .run("announce", &ctx, &json!({"message": "it's done"}), &step)
        .await
        .expect("command ran");

    let programs = host.submissions();
    assert_eq!(programs.len(), 2);
    assert!(programs[0].contains("__hostlink_handles['cmd7'].window"));
    assert!(programs[1].contains("__hostlink_handles['w1'].status_message('it\\'s done')"));
    assert_eq!(step.round_trips(), 2);
}

#[tokio::test]
async fn enablement_can_ask_the_host() {
    let host = ScriptedHost::new();
    host.push_response(Envelope::Handle {
        key: HandleKey::new("w1"),
    });
    host.push_response(Envelope::Primitive { value: json!(1) });
    let bridge = Bridge::new(BridgeConfig::default(), Arc::new(host.clone()));

    let registry = CommandRegistry::new();
    registry.register("announce", Announce);
    let ctx = CommandContext::new(bridge, HandleKey::new("cmd7"));

    let enabled = registry
        .is_enabled("announce", &ctx, &Value::Null, &Step::new())
        .await
        .expect("asked");
    assert!(!enabled);
    assert!(
        registry
            .is_visible("announce", &ctx, &Value::Null, &Step::new())
            .await
            .expect("default")
    );

    assert!(registry.unregister("announce"));
    assert!(registry.names().is_empty());
}

#[test]
fn config_round_trips_through_a_file() {
    let temp = TempDir::new().expect("tempdir");
    let path = temp.path().join("nested/hostlink.json");

    let config = BridgeConfig {
        host_module: "editor".into(),
        max_chain_length: Some(8),
        step_conflict: StepConflictPolicy::Reject,
        debug: true,
        ..BridgeConfig::default()
    };
    config.save(&path).expect("save");

    let loaded = BridgeConfig::load(&path).expect("load");
    assert_eq!(loaded, config);
}

#[test]
fn missing_config_file_is_an_error() {
    let temp = TempDir::new().expect("tempdir");
    let err = BridgeConfig::load(&temp.path().join("absent.json")).expect_err("missing");
    assert!(err.to_string().contains("Failed to read config"));
}

#[test]
fn roots_follow_the_configured_module() {
    let config = BridgeConfig {
        host_module: "editor".into(),
        ..BridgeConfig::default()
    };
    let bridge = Bridge::new(config.clone(), Arc::new(ScriptedHost::new()));
    assert_eq!(
        bridge.active_window().object().source(&config),
        "editor.active_window()"
    );
}

#[test]
fn invalid_config_files_are_rejected_on_load() {
    let temp = TempDir::new().expect("tempdir");
    let path = temp.path().join("hostlink.json");
    std::fs::write(&path, r#"{"handle_table": "h'); import os; ('", "max_chain_length": 3}"#)
        .expect("write");

    let err = BridgeConfig::load(&path).expect_err("not an identifier");
    assert!(err.to_string().contains("Invalid config"));
    assert!(matches!(
        err.downcast_ref::<BridgeError>(),
        Some(BridgeError::Config(message)) if message.contains("handle_table")
    ));
}
