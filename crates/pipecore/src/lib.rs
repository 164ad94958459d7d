//! Core abstractions for the pipeline engine
//!
//! This crate provides the types and traits shared by the runtime and the
//! component library: the run context, the component contract, graph
//! definitions, edge conditions and the error taxonomy. It does no scheduling.

mod component;
pub mod condition;
mod context;
mod error;
pub mod events;
mod graph;
mod value;

pub use component::{is_empty_parameter, merge_parameters, Component, ComponentConfig};
pub use condition::{Condition, ConditionError};
pub use context::{RunContext, StreamSink, END_KEY, ERROR_KEY, NEXT_OVERRIDE_KEY, SINK_KEY};
pub use error::{ComponentError, GraphError, PipelineError};
pub use events::{EventBus, PipelineEvent, RunId};
pub use graph::{GraphDefinition, GraphNodeSpec, NodeId, PipelineId};
pub use value::Value;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
