use async_trait::async_trait;
use futures::future::join_all;
use hostlink::bridge::error::TransportResult;
use hostlink::bridge::{
    BridgeError, CallbackEndpoint, Envelope, HostTransport, ResultShape, Step,
    StepConflictPolicy, TransportError, UsageError,
};
use hostlink::{Bridge, BridgeConfig};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Host that takes a while to answer and logs when each program starts and ends
#[derive(Default)]
struct SlowHost {
    log: Mutex<Vec<String>>,
}

#[async_trait]
impl HostTransport for SlowHost {
    async fn execute(&self, program: &str) -> TransportResult<Value> {
        let label = program
            .split("lambda: (")
            .nth(1)
            .and_then(|rest| rest.split(')').next())
            .unwrap_or(program)
            .to_string();
        self.log.lock().push(format!("start {label}"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.log.lock().push(format!("end {label}"));
        Ok(Envelope::Primitive { value: json!(label) }.to_json())
    }

    async fn open_endpoint(&self) -> TransportResult<Box<dyn CallbackEndpoint>> {
        Err(TransportError::Host("no callbacks here".into()))
    }
}

fn bridge(policy: StepConflictPolicy) -> (Bridge, Arc<SlowHost>) {
    let host = Arc::new(SlowHost::default());
    let config = BridgeConfig {
        step_conflict: policy,
        ..BridgeConfig::default()
    };
    (Bridge::new(config, host.clone()), host)
}

#[tokio::test]
async fn one_lineage_runs_round_trips_in_request_order() {
    let (bridge, host) = bridge(StepConflictPolicy::Queue);
    let step = Step::new();

    let calls = ["a", "b", "c"].map(|name| {
        let bridge = bridge.clone();
        let step = step.clone();
        async move { bridge.evaluate(name, ResultShape::Value, &step).await }
    });
    let results = join_all(calls).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(
        *host.log.lock(),
        vec!["start a", "end a", "start b", "end b", "start c", "end c"]
    );
    assert_eq!(step.round_trips(), 3);
}

#[tokio::test]
async fn separate_lineages_overlap() {
    let (bridge, host) = bridge(StepConflictPolicy::Queue);
    let (left, right) = (Step::new(), Step::new());

    let (a, b) = tokio::join!(
        bridge.evaluate("a", ResultShape::Value, &left),
        bridge.evaluate("b", ResultShape::Value, &right),
    );
    a.expect("left");
    b.expect("right");

    let log = host.log.lock();
    assert_eq!(&log[..2], ["start a", "start b"]);
}

#[tokio::test]
async fn reject_policy_refuses_concurrent_entry() {
    let (bridge, host) = bridge(StepConflictPolicy::Reject);
    let step = Step::new();

    let (first, second) = tokio::join!(
        bridge.evaluate("a", ResultShape::Value, &step),
        bridge.evaluate("b", ResultShape::Value, &step),
    );

    assert!(first.is_ok());
    assert!(matches!(
        second,
        Err(BridgeError::Usage(UsageError::StepConflict { .. }))
    ));
    assert_eq!(*host.log.lock(), vec!["start a", "end a"]);

    bridge
        .evaluate("c", ResultShape::Value, &step)
        .await
        .expect("sequential use is fine");
    assert_eq!(step.round_trips(), 2);
}

#[tokio::test]
async fn child_steps_do_not_wait_for_their_parent() {
    let (bridge, host) = bridge(StepConflictPolicy::Queue);
    let parent = Step::new();
    let child = parent.child();
    assert!(!parent.same_lineage(&child));

    let (a, b) = tokio::join!(
        bridge.evaluate("a", ResultShape::Value, &parent),
        bridge.evaluate("b", ResultShape::Value, &child),
    );
    a.expect("parent");
    b.expect("child");
    assert_eq!(&host.log.lock()[..2], ["start a", "start b"]);
}
