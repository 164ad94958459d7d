//! Pipeline execution runtime
//!
//! This crate compiles graph definitions into run-private execution graphs,
//! manages the component registry and schedules concurrent node execution.

mod compiler;
mod executor;
mod graph;
mod loader;
mod registry;
mod runtime;
mod store;
mod subpipeline;

pub use compiler::GraphCompiler;
pub use executor::{PipelineExecutor, RunOutcome, RunSummary};
pub use graph::{ComponentSlot, ExecutionGraph, ExecutionNode, NodeStatus, OutEdge};
pub use loader::{JsonPrototypeSource, PrototypeSource, PrototypeSpec, StaticPrototypeSource};
pub use registry::{
    ComponentFactory, ComponentMetadata, ComponentPrototype, ComponentRegistry, PrototypeMap,
};
pub use runtime::{PipelineRuntime, RuntimeConfig};
pub use store::{DirPipelineStore, InMemoryPipelineStore, PipelineStore};
pub use subpipeline::SubPipeline;
