use hostlink::bridge::{
    BridgeError, CallbackEnding, CallbackSlot, Envelope, HandleKey, HostEvent, Outcome,
    PayloadShape, ResultShape, ScriptedHost, Step, UsageError, codegen,
};
use hostlink::catalog::{InputPanel, QuickPanel};
use hostlink::{Bridge, BridgeConfig};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;

fn bridge(host: &ScriptedHost) -> Bridge {
    Bridge::new(BridgeConfig::default(), Arc::new(host.clone()))
}

#[tokio::test]
async fn repeatable_then_one_shot_invokes_k_plus_one_times() {
    let host = ScriptedHost::new();
    host.push_response(Envelope::Handle {
        key: HandleKey::new("panel"),
    });
    let bridge = bridge(&host);
    let step = Step::new();

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<(&'static str, Value)>();
    let change_tx = seen_tx.clone();
    let panel = InputPanel::new("Name:", "", move |ctx| {
        let tx = seen_tx.clone();
        async move {
            let _ = tx.send(("done", ctx.payload.into_value().unwrap_or(Value::Null)));
            Ok(())
        }
    })
    .on_change(move |ctx| {
        let tx = change_tx.clone();
        async move {
            let _ = tx.send(("change", ctx.payload.into_value().unwrap_or(Value::Null)));
            Ok(())
        }
    });

    let op = bridge
        .active_window()
        .show_input_panel(panel, &step)
        .await
        .expect("panel shown");
    assert_eq!(op.outcome(), &Outcome::Handle(HandleKey::new("panel")));
    let tokens = op.tokens().to_vec();
    assert_eq!(tokens.len(), 2);
    let (done, change) = (&tokens[0], &tokens[1]);

    for text in ["a", "ab", "abc"] {
        assert!(host.fire(change, Envelope::Primitive { value: json!(text) }));
        assert_eq!(seen_rx.recv().await, Some(("change", json!(text))));
    }
    assert!(host.fire(done, Envelope::Primitive { value: json!("abc") }));
    assert_eq!(seen_rx.recv().await, Some(("done", json!("abc"))));

    let report = op.finished().await;
    assert_eq!(report.invocations, 4);
    assert_eq!(report.ending, CallbackEnding::OneShotFired);

    let mut closed = host.closed_tokens();
    closed.sort();
    let mut expected = tokens.clone();
    expected.sort();
    assert_eq!(closed, expected, "both endpoints torn down exactly once");
    assert!(host.open_tokens().is_empty());
    assert!(!host.fire(change, Envelope::None));
    assert!(bridge.callbacks().pending().is_empty());
}

#[tokio::test]
async fn endpoints_open_before_the_program_is_sent() {
    let host = ScriptedHost::new();
    host.push_response(Envelope::None);
    let bridge = bridge(&host);

    let op = bridge
        .active_window()
        .show_quick_panel(
            QuickPanel::new(["one", "two"], |_| async { Ok(()) })
                .on_highlight(|_| async { Ok(()) }),
            &Step::new(),
        )
        .await
        .expect("panel shown");

    let events = host.events();
    let executed = events
        .iter()
        .position(|e| matches!(e, HostEvent::Executed(_)))
        .expect("program sent");
    for token in op.tokens() {
        let opened = events
            .iter()
            .position(|e| e == &HostEvent::Opened(token.clone()))
            .expect("endpoint opened");
        assert!(opened < executed);
    }
}

#[tokio::test]
async fn tokens_are_unique_across_pending_operations() {
    let host = ScriptedHost::with_responder(|_| Envelope::None);
    let bridge = bridge(&host);
    let step = Step::new();

    let first = bridge
        .active_window()
        .show_quick_panel(QuickPanel::new(["a"], |_| async { Ok(()) }), &step)
        .await
        .expect("first");
    let second = bridge
        .active_window()
        .show_quick_panel(QuickPanel::new(["b"], |_| async { Ok(()) }), &step)
        .await
        .expect("second");

    assert_ne!(first.tokens(), second.tokens());
    assert_eq!(bridge.callbacks().pending().len(), 2);
}

#[tokio::test]
async fn callbacks_run_on_a_child_step_and_can_drive_the_host() {
    let host = ScriptedHost::new();
    host.push_response(Envelope::None);
    let bridge = bridge(&host);
    let step = Step::new();
    let parent = step.lineage();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let slot = CallbackSlot::one_shot(PayloadShape::Handle, move |ctx| {
        let tx = tx.clone();
        async move {
            let view = match &ctx.payload {
                Outcome::Handle(key) => codegen::handle_ref(ctx.bridge.config(), key),
                _ => unreachable!("slot only accepts handles"),
            };
            let size = ctx
                .bridge
                .evaluate(&format!("{view}.size()"), ResultShape::Value, &ctx.step)
                .await?;
            let _ = tx.send((ctx.step.parent(), size));
            Ok::<_, BridgeError>(())
        }
    });

    let template = format!(
        "sublime.set_timeout({}, 0)",
        codegen::callback_lambda(bridge.config(), &["view"])
    );
    let op = bridge
        .invoke(&template, ResultShape::Value, vec![slot], &step)
        .await
        .expect("invoked");

    host.push_response(Envelope::Primitive { value: json!(42) });
    assert!(host.fire(
        &op.tokens()[0],
        Envelope::Handle {
            key: HandleKey::new("v9")
        }
    ));

    let (callback_parent, size) = rx.recv().await.expect("callback ran");
    assert_eq!(callback_parent, Some(parent));
    assert_eq!(size, Outcome::Value(json!(42)));
    assert!(bridge.arena().contains(&HandleKey::new("v9")));
    assert!(host.submissions()[1].contains("__hostlink_handles['v9'].size()"));
    assert_eq!(op.finished().await.invocations, 1);
}

#[tokio::test]
async fn failed_start_closes_every_endpoint() {
    let host = ScriptedHost::new();
    host.push_response(Envelope::None);
    let bridge = bridge(&host);

    let panel = InputPanel::new("Name:", "", |_| async { Ok(()) }).on_cancel(|_| async { Ok(()) });
    let result = bridge
        .active_window()
        .show_input_panel(panel, &Step::new())
        .await;

    // The input panel must hand back its view.
    assert!(matches!(result, Err(BridgeError::Transport(_))));
    assert!(host.open_tokens().is_empty());
    assert_eq!(host.closed_tokens().len(), 2);
    assert!(bridge.callbacks().pending().is_empty());
}

#[tokio::test]
async fn mismatched_payloads_are_dropped() {
    let host = ScriptedHost::new();
    host.push_response(Envelope::Handle {
        key: HandleKey::new("panel"),
    });
    let bridge = bridge(&host);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let panel = InputPanel::new("Name:", "", |_| async { Ok(()) }).on_cancel(move |ctx| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(ctx.payload);
            Ok(())
        }
    });
    let op = bridge
        .active_window()
        .show_input_panel(panel, &Step::new())
        .await
        .expect("panel shown");
    let cancel = op.tokens()[1].clone();

    assert!(host.fire(&cancel, Envelope::Primitive { value: json!(1) }));
    assert!(host.fire(&cancel, Envelope::None));
    assert_eq!(rx.recv().await, Some(Outcome::Absent));
    assert_eq!(op.finished().await.invocations, 1);
}

#[tokio::test]
async fn placeholder_mismatch_opens_nothing() {
    let host = ScriptedHost::new();
    let bridge = bridge(&host);

    let err = bridge
        .invoke(
            "sublime.set_timeout(None, 0)",
            ResultShape::Value,
            vec![CallbackSlot::one_shot(PayloadShape::Empty, |_| async { Ok(()) })],
            &Step::new(),
        )
        .await
        .err()
        .expect("no placeholder for the slot");

    assert!(matches!(
        err,
        BridgeError::Usage(UsageError::PlaceholderMismatch {
            expected: 1,
            found: 0
        })
    ));
    assert!(host.events().is_empty());
}

#[tokio::test]
async fn supervision_reclaims_forgotten_operations() {
    let host = ScriptedHost::new();
    host.push_response(Envelope::None);
    let bridge = bridge(&host);

    let op = bridge
        .active_window()
        .show_quick_panel(QuickPanel::new(["a"], |_| async { Ok(()) }), &Step::new())
        .await
        .expect("panel shown");

    assert!(bridge.callbacks().reclaim_older_than(chrono::Duration::hours(1)).is_empty());
    let pending = bridge.callbacks().pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, op.id());

    let leaks = bridge.callbacks().reclaim_older_than(chrono::Duration::zero());
    assert_eq!(leaks.len(), 1);
    assert_eq!(leaks[0].operation, op.id());
    assert_eq!(leaks[0].tokens, op.tokens().to_vec());

    let report = op.finished().await;
    assert_eq!(report.ending, CallbackEnding::Reclaimed);
    assert!(report.torn_down());
    assert!(host.open_tokens().is_empty());
    assert!(bridge.callbacks().pending().is_empty());
}

#[tokio::test]
async fn user_text_holding_the_placeholder_is_plain_data() {
    let host = ScriptedHost::new();
    host.push_response(Envelope::None);
    host.push_response(Envelope::Handle {
        key: HandleKey::new("panel"),
    });
    let bridge = bridge(&host);
    let step = Step::new();

    let quick = bridge
        .active_window()
        .show_quick_panel(
            QuickPanel::new(["price: $CALLBACK_TOKEN"], |_| async { Ok(()) }),
            &step,
        )
        .await
        .expect("item text is not a slot");
    assert_eq!(quick.tokens().len(), 1);

    let input = bridge
        .active_window()
        .show_input_panel(
            InputPanel::new(codegen::CALLBACK_PLACEHOLDER, "$CALLBACK_TOKEN", |_| async {
                Ok(())
            }),
            &step,
        )
        .await
        .expect("caption text is not a slot");
    assert_eq!(input.tokens().len(), 1);

    let programs = host.submissions();
    assert!(programs[0].contains("['price: \\x24CALLBACK_TOKEN']"));
    let escaped = "'\\x24CALLBACK_TOKEN'";
    assert!(programs[1].contains(&format!("show_input_panel({escaped}, {escaped}, lambda text")));
    for program in &programs {
        assert!(!program.contains(codegen::CALLBACK_PLACEHOLDER));
    }
}
