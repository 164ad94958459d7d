// crates/pipenodes/tests/components_test.rs

use pipecore::{
    Component, ComponentError, GraphDefinition, GraphNodeSpec, PipelineError, RunContext, StreamSink,
    Value, NEXT_OVERRIDE_KEY, SINK_KEY,
};
use pipenodes::{DelayComponentFactory, HttpRequestComponentFactory};
use piperuntime::{ComponentFactory, ComponentPrototype, ComponentRegistry, PipelineRuntime, RuntimeConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

async fn create_runtime() -> PipelineRuntime {
    let mut registry = ComponentRegistry::new();
    pipenodes::register_all(&mut registry).await;
    PipelineRuntime::new(Arc::new(registry), RuntimeConfig::default())
}

fn node(id: &str, component: &str, parameter: serde_json::Value) -> GraphNodeSpec {
    GraphNodeSpec::new(id)
        .with_component(component)
        .with_parameter(parameter)
}

#[tokio::test]
async fn test_register_all_lists_standard_components() {
    let mut registry = ComponentRegistry::new();
    pipenodes::register_all(&mut registry).await;

    let kinds = registry.list_kinds();
    for kind in [
        "context.set",
        "control.end",
        "control.fail",
        "control.route",
        "debug.log",
        "http.request",
        "stream.emit",
        "time.delay",
        "transform.json_parse",
        "transform.json_stringify",
    ] {
        assert!(kinds.iter().any(|k| k == kind), "missing component kind {kind}");
        assert!(registry.resolve(kind).is_some(), "missing default prototype {kind}");
    }
    assert_eq!(registry.get_metadata("control.route").unwrap().category, "control");
}

#[tokio::test]
async fn test_set_then_transform_round_trip() {
    let runtime = create_runtime().await;

    let mut def = GraphDefinition::new("transform")
        .with_node(node("seed", "context.set", json!({ "values": { "payload": { "a": 1, "tags": ["x"] } } })))
        .with_node(node("to-json", "transform.json_stringify", json!({ "input": "payload", "output": "text" })))
        .with_node(node("from-json", "transform.json_parse", json!({ "input": "text", "output": "copy" })));
    def.connect("seed", "to-json");
    def.connect("to-json", "from-json");

    let outcome = runtime.run_definition(&def, RunContext::new()).await.unwrap();
    let ctx = &outcome.context;

    assert!(ctx.get("text").unwrap().as_str().unwrap().contains("\"tags\""));
    assert_eq!(ctx.get("copy"), ctx.get("payload"));
}

#[tokio::test]
async fn test_json_parse_rejects_non_string_input() {
    let runtime = create_runtime().await;

    let mut def = GraphDefinition::new("bad-input")
        .with_node(node("seed", "context.set", json!({ "values": { "json": 42 } })))
        .with_node(GraphNodeSpec::new("parse").with_component("transform.json_parse"));
    def.connect("seed", "parse");

    let err = runtime.run_definition(&def, RunContext::new()).await.unwrap_err();
    match err {
        PipelineError::ComponentExecution { node_id, source } => {
            assert_eq!(node_id, "parse");
            assert!(matches!(source, ComponentError::InvalidInputType { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_end_component_stops_run() {
    let runtime = create_runtime().await;

    let mut def = GraphDefinition::new("ending")
        .with_node(GraphNodeSpec::new("stop").with_component("control.end"))
        .with_node(node("never", "context.set", json!({ "values": { "reached": true } })));
    def.connect("stop", "never");

    let outcome = runtime.run_definition(&def, RunContext::new()).await.unwrap();

    assert!(outcome.ended_early);
    assert!(!outcome.context.contains("reached"));
}

#[tokio::test]
async fn test_route_component_jumps_by_value() {
    let runtime = create_runtime().await;

    let mut def = GraphDefinition::new("routing")
        .with_node(node(
            "router",
            "control.route",
            json!({ "key": "intent", "routes": { "refund": "refunds", "2": "second" }, "default": "fallback" }),
        ))
        .with_node(node("normal", "context.set", json!({ "values": { "hit": "normal" } })))
        .with_node(node("refunds", "context.set", json!({ "values": { "hit": "refunds" } })))
        .with_node(node("second", "context.set", json!({ "values": { "hit": "second" } })))
        .with_node(node("fallback", "context.set", json!({ "values": { "hit": "fallback" } })))
        .with_root("router");
    def.connect("router", "normal");

    let cases = [
        (json!("refund"), "refunds"),
        (json!(2), "second"),
        (json!("other"), "fallback"),
    ];
    for (intent, expected) in cases {
        let ctx = RunContext::new();
        ctx.set("intent", Value::from(intent));
        let outcome = runtime.run_definition(&def, ctx).await.unwrap();

        assert_eq!(outcome.context.get("hit"), Some(Value::from(expected)));
        assert!(!outcome.context.contains(NEXT_OVERRIDE_KEY));
    }
}

#[tokio::test]
async fn test_route_without_match_follows_static_edges() {
    let runtime = create_runtime().await;

    let mut def = GraphDefinition::new("no-route")
        .with_node(node("router", "control.route", json!({ "key": "intent", "routes": { "a": "jump" } })))
        .with_node(node("normal", "context.set", json!({ "values": { "hit": "normal" } })))
        .with_node(node("jump", "context.set", json!({ "values": { "hit": "jump" } })))
        .with_root("router");
    def.connect("router", "normal");

    let outcome = runtime.run_definition(&def, RunContext::new()).await.unwrap();
    assert_eq!(outcome.context.get("hit"), Some(Value::from("normal")));
}

#[tokio::test]
async fn test_fail_component_records_error() {
    let runtime = create_runtime().await;

    let def = GraphDefinition::new("failing")
        .with_node(node("fail", "control.fail", json!({ "message": "quota exceeded" })));

    let ctx = RunContext::new();
    let err = runtime.run_definition(&def, ctx.clone()).await.unwrap_err();

    assert_eq!(err.node_id(), Some("fail"));
    assert!(ctx.error().unwrap().as_str().unwrap().contains("quota exceeded"));
}

#[tokio::test]
async fn test_stream_emit_sends_to_sink() {
    let runtime = create_runtime().await;

    let mut def = GraphDefinition::new("streaming")
        .with_node(node("seed", "context.set", json!({ "values": { "chunk": "partial answer" } })))
        .with_node(node("emit", "stream.emit", json!({ "key": "chunk" })));
    def.connect("seed", "emit");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let ctx = RunContext::new();
    ctx.insert_extension::<StreamSink>(SINK_KEY, Arc::new(tx));

    runtime.run_definition(&def, ctx).await.unwrap();

    assert_eq!(rx.recv().await, Some(Value::from("partial answer")));
}

#[tokio::test]
async fn test_stream_emit_without_sink_is_noop() {
    let runtime = create_runtime().await;

    let def = GraphDefinition::new("no-sink")
        .with_node(node("emit", "stream.emit", json!({ "key": "missing" })));

    runtime.run_definition(&def, RunContext::new()).await.unwrap();

    let required = GraphDefinition::new("required")
        .with_node(node("emit", "stream.emit", json!({ "key": "missing", "required": true })));
    let err = runtime.run_definition(&required, RunContext::new()).await.unwrap_err();
    assert_eq!(err.node_id(), Some("emit"));
}

#[tokio::test]
async fn test_delay_observes_cancellation() {
    let component = DelayComponentFactory.create(&json!({ "delay_ms": 10_000 })).unwrap();

    let ctx = RunContext::new();
    let token = ctx.cancellation().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let started = Instant::now();
    let result = component.execute(&ctx).await;

    assert!(matches!(result, Err(ComponentError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_http_node_requires_valid_url() {
    let factory: Arc<dyn ComponentFactory> = Arc::new(HttpRequestComponentFactory);
    let prototype = ComponentPrototype::new("http.request", factory, json!({}))
        .await
        .unwrap();

    let err = prototype
        .instantiate("call", &json!({ "url": "not a url" }))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ComponentError::InitializationFailed(_)));

    assert!(prototype
        .instantiate("call", &json!({ "url_key": "endpoint" }))
        .await
        .is_ok());

    let from_ctx = prototype
        .instantiate("call", &json!({ "url_key": "endpoint" }))
        .await
        .unwrap();
    let err = from_ctx.execute(&RunContext::new()).await.unwrap_err();
    assert!(matches!(err, ComponentError::MissingInput(key) if key == "endpoint"));

    // The shared default instance reads its URL from the `url` key
    let err = prototype.shared().execute(&RunContext::new()).await.unwrap_err();
    assert!(matches!(err, ComponentError::MissingInput(key) if key == "url"));
}

#[tokio::test]
async fn test_http_node_with_bad_url_is_unusable_in_graph() {
    let runtime = create_runtime().await;

    let def = GraphDefinition::new("http")
        .with_node(node("call", "http.request", json!({ "url": "::nope::" })));

    let graph = runtime.compile(&def).await.unwrap();
    assert!(!graph.node("call").unwrap().is_usable());

    let err = runtime.run_definition(&def, RunContext::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::MissingComponent { .. }));
}
