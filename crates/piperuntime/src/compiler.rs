use crate::executor::PipelineExecutor;
use crate::graph::{ComponentSlot, ExecutionGraph, ExecutionNode, OutEdge};
use crate::registry::{ComponentRegistry, PrototypeMap};
use crate::store::PipelineStore;
use crate::subpipeline::SubPipeline;
use futures::future::BoxFuture;
use futures::FutureExt;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use pipecore::{
    is_empty_parameter, Condition, EventBus, GraphDefinition, GraphError, GraphNodeSpec, NodeId,
    PipelineError,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Turns graph definitions into run-private execution graphs
pub struct GraphCompiler {
    registry: Arc<ComponentRegistry>,
    store: Option<Arc<dyn PipelineStore>>,
    executor: PipelineExecutor,
    event_bus: EventBus,
    max_depth: usize,
}

impl GraphCompiler {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self {
            registry,
            store: None,
            executor: PipelineExecutor::default(),
            event_bus: EventBus::default(),
            max_depth: 8,
        }
    }

    /// Resolve unknown component ids as nested pipelines from `store`
    pub fn with_store(mut self, store: Arc<dyn PipelineStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Executor and event bus used by nested sub-pipelines
    pub fn with_executor(mut self, executor: PipelineExecutor, event_bus: EventBus) -> Self {
        self.executor = executor;
        self.event_bus = event_bus;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Compile against the registry snapshot current at call time
    pub async fn compile(&self, definition: &GraphDefinition) -> Result<ExecutionGraph, PipelineError> {
        let prototypes = self.registry.snapshot();
        self.compile_with(definition, prototypes, vec![definition.id.clone()])
            .await
    }

    fn compile_with<'a>(
        &'a self,
        definition: &'a GraphDefinition,
        prototypes: Arc<PrototypeMap>,
        stack: Vec<String>,
    ) -> BoxFuture<'a, Result<ExecutionGraph, PipelineError>> {
        async move {
            let layout = Layout::build(definition)?;

            // Every condition must parse before any component is instantiated.
            let mut edges = HashMap::with_capacity(definition.nodes.len());
            for spec in &definition.nodes {
                edges.insert(spec.id.clone(), layout.outgoing(&spec.id, spec)?);
            }

            let mut nodes = HashMap::with_capacity(definition.nodes.len());
            for spec in &definition.nodes {
                let component = self.resolve(spec, &prototypes, &stack).await?;
                let downstream = edges.remove(&spec.id).unwrap_or_default();
                nodes.insert(
                    spec.id.clone(),
                    ExecutionNode {
                        id: spec.id.clone(),
                        component_id: spec.component_id().to_string(),
                        component,
                        upstream: layout.incoming(&spec.id),
                        downstream,
                    },
                );
            }

            tracing::debug!(
                pipeline = %definition.id,
                nodes = nodes.len(),
                root = %layout.root,
                "Compiled pipeline"
            );

            Ok(ExecutionGraph {
                pipeline_id: definition.id.clone(),
                root: layout.root,
                nodes,
            })
        }
        .boxed()
    }

    async fn resolve(
        &self,
        spec: &GraphNodeSpec,
        prototypes: &Arc<PrototypeMap>,
        stack: &[String],
    ) -> Result<ComponentSlot, PipelineError> {
        let component_id = spec.component_id();

        if let Some(prototype) = prototypes.get(component_id) {
            if is_empty_parameter(&spec.parameter) {
                return Ok(ComponentSlot::Ready(prototype.shared()));
            }

            let overrides = match parse_parameter(&spec.parameter) {
                Ok(overrides) => overrides,
                Err(reason) => {
                    tracing::warn!(node_id = %spec.id, "Unusable parameter: {}", reason);
                    return Ok(ComponentSlot::Unusable(reason));
                }
            };
            return Ok(match prototype.instantiate(&spec.id, &overrides).await {
                Ok(component) => ComponentSlot::Ready(Arc::from(component)),
                Err(e) => {
                    tracing::warn!(node_id = %spec.id, component = %component_id, "Component initialization failed: {}", e);
                    ComponentSlot::Unusable(e.to_string())
                }
            });
        }

        let Some(store) = &self.store else {
            return Err(GraphError::UnknownComponentType(component_id.to_string()).into());
        };
        if stack.iter().any(|id| id == component_id) {
            return Err(GraphError::RecursivePipeline(format!(
                "{} -> {}",
                stack.join(" -> "),
                component_id
            ))
            .into());
        }
        if stack.len() >= self.max_depth {
            return Err(GraphError::Invalid(format!(
                "sub-pipeline nesting deeper than {} at '{}'",
                self.max_depth, component_id
            ))
            .into());
        }

        let Some(nested) = store.find_enabled(component_id).await? else {
            return Err(GraphError::UnknownComponentType(component_id.to_string()).into());
        };
        if !is_empty_parameter(&spec.parameter) {
            tracing::warn!(node_id = %spec.id, pipeline = %component_id, "Parameter ignored for sub-pipeline node");
        }

        let mut nested_stack = stack.to_vec();
        nested_stack.push(component_id.to_string());
        let graph = self
            .compile_with(&nested, Arc::clone(prototypes), nested_stack)
            .await?;

        Ok(ComponentSlot::Ready(Arc::new(SubPipeline::new(
            Arc::new(graph),
            self.executor.clone(),
            self.event_bus.clone(),
        ))))
    }
}

/// Parameter overrides arrive either as JSON or as JSON text.
fn parse_parameter(parameter: &serde_json::Value) -> Result<serde_json::Value, String> {
    match parameter {
        serde_json::Value::String(text) => serde_json::from_str(text)
            .map_err(|e| format!("parameter is not valid JSON: {}", e)),
        other => Ok(other.clone()),
    }
}

/// Validated edge set of a definition.
///
/// An edge `a -> b` exists when `b` is in `a.downstream`, `a` is in
/// `b.upstream`, or `a` carries a condition for `b`.
struct Layout {
    root: NodeId,
    outgoing: HashMap<NodeId, Vec<NodeId>>,
    incoming: HashMap<NodeId, Vec<NodeId>>,
}

impl Layout {
    fn build(definition: &GraphDefinition) -> Result<Self, GraphError> {
        if definition.nodes.is_empty() {
            return Err(GraphError::Invalid(format!(
                "pipeline '{}' has no nodes",
                definition.id
            )));
        }

        let mut ids = HashSet::new();
        for node in &definition.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(GraphError::Invalid(format!("duplicate node id '{}'", node.id)));
            }
        }

        let mut outgoing: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut incoming: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut add_edge = |from: &str, to: &str| -> Result<(), GraphError> {
            for id in [from, to] {
                if !ids.contains(id) {
                    return Err(GraphError::NodeNotFound(id.to_string()));
                }
            }
            let targets = outgoing.entry(from.to_string()).or_default();
            if !targets.iter().any(|t| t == to) {
                targets.push(to.to_string());
                incoming.entry(to.to_string()).or_default().push(from.to_string());
            }
            Ok(())
        };

        for node in &definition.nodes {
            for to in &node.downstream {
                add_edge(&node.id, to)?;
            }
            for from in &node.upstream {
                add_edge(from, &node.id)?;
            }
            let mut conditioned: Vec<&NodeId> = node.downstream_conditions.keys().collect();
            conditioned.sort();
            for to in conditioned {
                add_edge(&node.id, to)?;
            }
        }

        let mut graph = DiGraph::<&str, ()>::new();
        let index: HashMap<&str, _> = definition
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), graph.add_node(n.id.as_str())))
            .collect();
        for (from, targets) in &outgoing {
            for to in targets {
                graph.add_edge(index[from.as_str()], index[to.as_str()], ());
            }
        }
        if toposort(&graph, None).is_err() {
            return Err(GraphError::CyclicDependency);
        }

        let root = match &definition.root {
            Some(root) if ids.contains(root.as_str()) => root.clone(),
            Some(root) => return Err(GraphError::NodeNotFound(root.clone())),
            None => {
                let entries: Vec<&str> = definition
                    .nodes
                    .iter()
                    .filter(|n| !incoming.contains_key(&n.id))
                    .map(|n| n.id.as_str())
                    .collect();
                match entries.as_slice() {
                    [single] => single.to_string(),
                    [] => return Err(GraphError::Invalid("no entry node".to_string())),
                    many => {
                        return Err(GraphError::Invalid(format!(
                            "ambiguous entry node, set `root` (candidates: {})",
                            many.join(", ")
                        )))
                    }
                }
            }
        };

        Ok(Self {
            root,
            outgoing,
            incoming,
        })
    }

    fn incoming(&self, id: &str) -> Vec<NodeId> {
        self.incoming.get(id).cloned().unwrap_or_default()
    }

    /// Outgoing edges of `id`, each with its condition parsed once.
    fn outgoing(&self, id: &str, spec: &GraphNodeSpec) -> Result<Vec<OutEdge>, GraphError> {
        let targets = match self.outgoing.get(id) {
            Some(targets) => targets,
            None => return Ok(Vec::new()),
        };

        targets
            .iter()
            .map(|to| {
                let condition = match spec.downstream_conditions.get(to) {
                    Some(source) if !source.trim().is_empty() => {
                        Some(Condition::parse(source).map_err(|e| GraphError::InvalidCondition {
                            from: id.to_string(),
                            to: to.clone(),
                            message: e.to_string(),
                        })?)
                    }
                    _ => None,
                };
                Ok(OutEdge {
                    to: to.clone(),
                    condition,
                })
            })
            .collect()
    }
}
