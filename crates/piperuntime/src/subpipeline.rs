use crate::executor::PipelineExecutor;
use crate::graph::ExecutionGraph;
use async_trait::async_trait;
use pipecore::{Component, ComponentError, EventBus, PipelineError, RunContext, END_KEY};
use std::sync::Arc;

/// A nested pipeline wrapped as a single component.
///
/// The nested graph runs to completion with its own executor against the
/// parent's context, so business keys flow both ways. Its `end` key stops
/// only the nested run and is cleared before control returns to the parent.
pub struct SubPipeline {
    graph: Arc<ExecutionGraph>,
    executor: PipelineExecutor,
    event_bus: EventBus,
}

impl SubPipeline {
    pub fn new(graph: Arc<ExecutionGraph>, executor: PipelineExecutor, event_bus: EventBus) -> Self {
        Self {
            graph,
            executor,
            event_bus,
        }
    }

    pub fn pipeline_id(&self) -> &str {
        &self.graph.pipeline_id
    }
}

#[async_trait]
impl Component for SubPipeline {
    fn kind(&self) -> &str {
        "pipeline"
    }

    async fn execute(&self, ctx: &RunContext) -> Result<(), ComponentError> {
        tracing::debug!(pipeline = %self.graph.pipeline_id, "Entering sub-pipeline");

        let result = self
            .executor
            .execute(Arc::clone(&self.graph), ctx.clone(), &self.event_bus)
            .await;
        ctx.remove(END_KEY);

        match result {
            Ok(outcome) => {
                tracing::debug!(
                    pipeline = %self.graph.pipeline_id,
                    nodes = outcome.executed.len(),
                    "Sub-pipeline completed"
                );
                Ok(())
            }
            Err(PipelineError::Cancelled) => Err(ComponentError::Cancelled),
            Err(e) => Err(ComponentError::ExecutionFailed(format!(
                "sub-pipeline '{}': {}",
                self.graph.pipeline_id, e
            ))),
        }
    }
}
