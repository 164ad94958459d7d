use crate::compiler::GraphCompiler;
use crate::executor::{PipelineExecutor, RunOutcome};
use crate::graph::ExecutionGraph;
use crate::loader::PrototypeSource;
use crate::registry::ComponentRegistry;
use crate::store::{InMemoryPipelineStore, PipelineStore};
use pipecore::{EventBus, GraphDefinition, GraphError, PipelineError, PipelineEvent, RunContext};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Main entry point: compiles and runs pipelines against a shared registry
pub struct PipelineRuntime {
    registry: Arc<ComponentRegistry>,
    store: Arc<dyn PipelineStore>,
    compiler: GraphCompiler,
    executor: PipelineExecutor,
    event_bus: EventBus,
    definitions: RwLock<HashMap<String, Arc<GraphDefinition>>>,
}

impl PipelineRuntime {
    /// Runtime with an empty in-memory pipeline store
    pub fn new(registry: Arc<ComponentRegistry>, config: RuntimeConfig) -> Self {
        Self::with_store(registry, Arc::new(InMemoryPipelineStore::new()), config)
    }

    /// Runtime resolving pipelines (and nested sub-pipelines) from `store`
    pub fn with_store(
        registry: Arc<ComponentRegistry>,
        store: Arc<dyn PipelineStore>,
        config: RuntimeConfig,
    ) -> Self {
        let event_bus = EventBus::new(config.event_buffer_size);
        let nested = PipelineExecutor::new(config.max_parallel_nodes, config.max_steps);
        let executor = nested.clone().with_deadline(config.run_timeout());
        let compiler = GraphCompiler::new(Arc::clone(&registry))
            .with_store(Arc::clone(&store))
            .with_executor(nested, event_bus.clone())
            .with_max_depth(config.max_nesting_depth);

        Self {
            registry,
            store,
            compiler,
            executor,
            event_bus,
            definitions: RwLock::new(HashMap::new()),
        }
    }

    /// Get access to the component registry
    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// Load a pipeline definition, caching it until invalidated
    pub async fn definition(&self, pipeline_id: &str) -> Result<Arc<GraphDefinition>, PipelineError> {
        if let Some(definition) = self.definitions.read().await.get(pipeline_id) {
            return Ok(Arc::clone(definition));
        }

        let definition = self
            .store
            .find_enabled(pipeline_id)
            .await?
            .ok_or_else(|| GraphError::NotFound(pipeline_id.to_string()))?;
        let definition = Arc::new(definition);

        self.definitions
            .write()
            .await
            .insert(pipeline_id.to_string(), Arc::clone(&definition));
        Ok(definition)
    }

    /// Drop a cached definition so the next run reloads it from the store
    pub async fn invalidate(&self, pipeline_id: &str) {
        self.definitions.write().await.remove(pipeline_id);
    }

    pub async fn invalidate_all(&self) {
        self.definitions.write().await.clear();
    }

    /// Replace all component prototypes. Runs already compiled keep the
    /// instances they resolved; later compiles see the new map.
    pub async fn reload_components(&self, source: &dyn PrototypeSource) -> Result<usize, PipelineError> {
        self.registry.reload(source).await
    }

    /// Compile a definition without running it
    pub async fn compile(&self, definition: &GraphDefinition) -> Result<ExecutionGraph, PipelineError> {
        self.compiler.compile(definition).await
    }

    /// Run a stored pipeline by id
    pub async fn run(&self, pipeline_id: &str, ctx: RunContext) -> Result<RunOutcome, PipelineError> {
        let definition = self.definition(pipeline_id).await?;
        self.run_definition(&definition, ctx).await
    }

    /// Run a definition directly (without the store)
    pub async fn run_definition(
        &self,
        definition: &GraphDefinition,
        ctx: RunContext,
    ) -> Result<RunOutcome, PipelineError> {
        let graph = self.compiler.compile(definition).await?;
        self.executor
            .execute(Arc::new(graph), ctx, &self.event_bus)
            .await
    }

    /// Subscribe to run events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// In-flight component executions allowed per run
    pub max_parallel_nodes: usize,
    pub event_buffer_size: usize,
    /// Node executions allowed per run, counting repeats
    pub max_steps: usize,
    pub run_timeout_ms: Option<u64>,
    pub max_nesting_depth: usize,
}

impl RuntimeConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            event_buffer_size: 1000,
            max_steps: 500,
            run_timeout_ms: None,
            max_nesting_depth: 8,
        }
    }
}
