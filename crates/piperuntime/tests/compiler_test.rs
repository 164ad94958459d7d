// Graph compilation: validation, component resolution and nested pipelines.

mod common;

use common::{registry, runtime, step, step_with, Recorder};
use pipecore::{GraphDefinition, GraphError, GraphNodeSpec, PipelineError, RunContext};
use piperuntime::{
    ComponentSlot, GraphCompiler, InMemoryPipelineStore, NodeStatus, PipelineRuntime, RuntimeConfig,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

async fn compiler(recorder: &Arc<Recorder>) -> GraphCompiler {
    GraphCompiler::new(Arc::new(registry(recorder).await))
}

async fn compile_err(def: &GraphDefinition) -> GraphError {
    let recorder = Arc::new(Recorder::default());
    match compiler(&recorder).await.compile(def).await {
        Err(PipelineError::Graph(e)) => e,
        Err(other) => panic!("expected graph error, got {other}"),
        Ok(_) => panic!("expected compile failure"),
    }
}

#[tokio::test]
async fn test_unknown_component_is_rejected() {
    let def = GraphDefinition::new("p").with_node(GraphNodeSpec::new("A").with_component("nope"));

    assert!(matches!(compile_err(&def).await, GraphError::UnknownComponentType(id) if id == "nope"));
}

#[tokio::test]
async fn test_component_id_defaults_to_node_id() {
    let recorder = Arc::new(Recorder::default());
    let def = GraphDefinition::new("p").with_node(GraphNodeSpec::new("step"));

    let graph = compiler(&recorder).await.compile(&def).await.unwrap();
    assert_eq!(graph.node("step").unwrap().component_id, "step");
}

#[tokio::test]
async fn test_invalid_condition_rejected_before_instantiation() {
    let recorder = Arc::new(Recorder::default());
    let compiler = compiler(&recorder).await;
    let created = recorder.created.load(Ordering::SeqCst);

    let mut def = GraphDefinition::new("p")
        .with_node(step("A"))
        .with_node(step("B"));
    def.connect_when("A", "B", "score >");

    match compiler.compile(&def).await {
        Err(PipelineError::Graph(GraphError::InvalidCondition { from, to, .. })) => {
            assert_eq!((from.as_str(), to.as_str()), ("A", "B"));
        }
        other => panic!("unexpected result: {:?}", other.err()),
    }
    assert_eq!(recorder.created.load(Ordering::SeqCst), created, "no component may be built");
}

#[tokio::test]
async fn test_cycle_is_rejected() {
    let mut def = GraphDefinition::new("p")
        .with_node(step("A"))
        .with_node(step("B"))
        .with_node(step("C"))
        .with_root("A");
    def.connect("A", "B");
    def.connect("B", "C");
    def.connect("C", "B");

    assert!(matches!(compile_err(&def).await, GraphError::CyclicDependency));
}

#[tokio::test]
async fn test_dangling_edge_is_rejected() {
    let mut a = step("A");
    a.downstream.push("ghost".to_string());
    let def = GraphDefinition::new("p").with_node(a);

    assert!(matches!(compile_err(&def).await, GraphError::NodeNotFound(id) if id == "ghost"));
}

#[tokio::test]
async fn test_empty_and_duplicate_graphs_are_invalid() {
    let empty = GraphDefinition::new("p");
    assert!(matches!(compile_err(&empty).await, GraphError::Invalid(_)));

    let duplicate = GraphDefinition::new("p").with_node(step("A")).with_node(step("A"));
    assert!(matches!(compile_err(&duplicate).await, GraphError::Invalid(_)));
}

#[tokio::test]
async fn test_root_inference() {
    let recorder = Arc::new(Recorder::default());
    let compiler = compiler(&recorder).await;

    let mut def = GraphDefinition::new("p")
        .with_node(step("B"))
        .with_node(step("A"));
    def.connect("A", "B");
    assert_eq!(compiler.compile(&def).await.unwrap().root(), "A");

    // Two entry nodes need an explicit root
    let mut ambiguous = def.clone();
    ambiguous.add_node(step("C"));
    assert!(matches!(compile_err(&ambiguous).await, GraphError::Invalid(_)));

    let explicit = ambiguous.with_root("C");
    assert_eq!(compiler.compile(&explicit).await.unwrap().root(), "C");

    let unknown = def.with_root("Z");
    assert!(matches!(compile_err(&unknown).await, GraphError::NodeNotFound(_)));
}

#[tokio::test]
async fn test_upstream_only_declaration_creates_edge() {
    let recorder = Arc::new(Recorder::default());
    let runtime = runtime(&recorder).await;

    let mut b = step("B");
    b.upstream.push("A".to_string());
    let def = GraphDefinition::new("p").with_node(step("A")).with_node(b);

    let graph = runtime.compile(&def).await.unwrap();
    assert_eq!(graph.node("B").unwrap().upstream_count(), 1);
    assert_eq!(graph.node("A").unwrap().downstream[0].to, "B");

    runtime.run_definition(&def, RunContext::new()).await.unwrap();
    assert_eq!(recorder.log(), vec!["A", "B"]);
}

#[tokio::test]
async fn test_store_shaped_document_keeps_edges() {
    let recorder = Arc::new(Recorder::default());
    let runtime = runtime(&recorder).await;

    let def: GraphDefinition = serde_json::from_value(json!({
        "id": "p",
        "nodes": [
            { "id": "A", "baseComponentId": "step", "parameter": { "label": "A" }, "downstreamIds": ["B"] },
            { "id": "B", "baseComponentId": "step", "parameter": { "label": "B" }, "upstreamIds": ["A"] }
        ]
    }))
    .unwrap();

    let graph = runtime.compile(&def).await.unwrap();
    assert_eq!(graph.root(), "A");
    assert_eq!(graph.node("B").unwrap().component_id, "step");

    runtime.run_definition(&def, RunContext::new()).await.unwrap();
    assert_eq!(recorder.log(), vec!["A", "B"]);
}

#[tokio::test]
async fn test_empty_parameter_shares_prototype_instance() {
    let recorder = Arc::new(Recorder::default());
    let compiler = compiler(&recorder).await;

    let mut def = GraphDefinition::new("p")
        .with_node(GraphNodeSpec::new("A").with_component("step"))
        .with_node(GraphNodeSpec::new("B").with_component("step").with_parameter(json!({})))
        .with_node(step("C"));
    def.connect("A", "B");
    def.connect("B", "C");

    let graph = compiler.compile(&def).await.unwrap();
    let instance = |id: &str| match &graph.node(id).unwrap().component {
        ComponentSlot::Ready(component) => Arc::clone(component),
        ComponentSlot::Unusable(reason) => panic!("{id} unusable: {reason}"),
    };

    assert!(Arc::ptr_eq(&instance("A"), &instance("B")));
    assert!(!Arc::ptr_eq(&instance("A"), &instance("C")));
}

#[tokio::test]
async fn test_parameter_accepts_json_text() {
    let recorder = Arc::new(Recorder::default());
    let runtime = runtime(&recorder).await;

    let def = GraphDefinition::new("p").with_node(
        GraphNodeSpec::new("A")
            .with_component("step")
            .with_parameter(json!(r#"{"label": "from-text"}"#)),
    );
    runtime.run_definition(&def, RunContext::new()).await.unwrap();
    assert_eq!(recorder.log(), vec!["from-text"]);

    let broken = GraphDefinition::new("q").with_node(
        GraphNodeSpec::new("A")
            .with_component("step")
            .with_parameter(json!("{not json")),
    );
    let graph = runtime.compile(&broken).await.unwrap();
    assert!(!graph.node("A").unwrap().is_usable());
}

fn child_pipeline() -> GraphDefinition {
    let mut child = GraphDefinition::new("child")
        .with_node(step_with("inner", json!({ "set": { "verdict": "approve", "end": true } })))
        .with_node(step("after-end"));
    child.connect("inner", "after-end");
    child
}

#[tokio::test]
async fn test_nested_pipeline_shares_context() {
    let recorder = Arc::new(Recorder::default());
    let store = Arc::new(InMemoryPipelineStore::new());
    store.insert(child_pipeline()).await;
    let runtime = PipelineRuntime::with_store(
        Arc::new(registry(&recorder).await),
        store.clone(),
        RuntimeConfig::default(),
    );

    let mut parent = GraphDefinition::new("parent")
        .with_node(step("start"))
        .with_node(GraphNodeSpec::new("review").with_component("child"))
        .with_node(step("approved"))
        .with_node(step("rejected"));
    parent.connect("start", "review");
    parent.connect_when("review", "approved", "verdict == 'approve'");
    parent.connect_when("review", "rejected", "verdict != 'approve'");

    let outcome = runtime.run_definition(&parent, RunContext::new()).await.unwrap();

    // The child's `end` stops only the child run
    assert_eq!(recorder.log(), vec!["start", "inner", "approved"]);
    assert!(!outcome.ended_early);
    assert_eq!(outcome.status("rejected"), Some(NodeStatus::Skipped));
    assert!(!outcome.context.contains("end"));
}

#[tokio::test]
async fn test_nested_failure_fails_parent_node() {
    let recorder = Arc::new(Recorder::default());
    let store = Arc::new(InMemoryPipelineStore::new());
    store
        .insert(GraphDefinition::new("child").with_node(step_with("inner", json!({ "fail": "nested boom" }))))
        .await;
    let runtime = PipelineRuntime::with_store(Arc::new(registry(&recorder).await), store, RuntimeConfig::default());

    let parent = GraphDefinition::new("parent").with_node(GraphNodeSpec::new("sub").with_component("child"));
    let ctx = RunContext::new();
    let err = runtime.run_definition(&parent, ctx.clone()).await.unwrap_err();

    assert_eq!(err.node_id(), Some("sub"));
    assert!(err.to_string().contains("nested boom"));
    assert!(ctx.error().unwrap().as_str().unwrap().contains("nested boom"));
}

#[tokio::test]
async fn test_recursive_pipeline_is_rejected() {
    let recorder = Arc::new(Recorder::default());
    let store = Arc::new(InMemoryPipelineStore::new());
    store
        .insert(GraphDefinition::new("a").with_node(GraphNodeSpec::new("call-b").with_component("b")))
        .await;
    store
        .insert(GraphDefinition::new("b").with_node(GraphNodeSpec::new("call-a").with_component("a")))
        .await;
    let runtime = PipelineRuntime::with_store(Arc::new(registry(&recorder).await), store, RuntimeConfig::default());

    let err = runtime.run("a", RunContext::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Graph(GraphError::RecursivePipeline(_))));
}

#[tokio::test]
async fn test_disabled_pipeline_is_not_found() {
    let recorder = Arc::new(Recorder::default());
    let store = Arc::new(InMemoryPipelineStore::new());
    let mut disabled = child_pipeline();
    disabled.enabled = false;
    store.insert(disabled).await;
    let runtime = PipelineRuntime::with_store(Arc::new(registry(&recorder).await), store, RuntimeConfig::default());

    let err = runtime.run("child", RunContext::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Graph(GraphError::NotFound(_))));
}
