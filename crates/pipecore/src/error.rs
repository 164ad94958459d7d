use thiserror::Error;

/// Terminal result of a pipeline compile or run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Node '{node_id}' has no usable component: {reason}")]
    MissingComponent { node_id: String, reason: String },

    #[error("Condition on edge {from} -> {to} failed to evaluate: {message}")]
    ConditionEval {
        from: String,
        to: String,
        message: String,
    },

    #[error("Node '{node_id}' failed: {source}")]
    ComponentExecution {
        node_id: String,
        #[source]
        source: ComponentError,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Run exceeded the limit of {0} node executions")]
    StepLimitExceeded(usize),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by a component's `initialize` or `execute`.
#[derive(Error, Debug, Clone)]
pub enum ComponentError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Component initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}

/// Compile-time errors: a graph that fails any of these never starts running.
#[derive(Error, Debug, Clone)]
pub enum GraphError {
    #[error("Pipeline not found: {0}")]
    NotFound(String),

    #[error("Invalid pipeline: {0}")]
    Invalid(String),

    #[error("Cyclic dependency detected")]
    CyclicDependency,

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Unknown component type: {0}")]
    UnknownComponentType(String),

    #[error("Invalid condition on edge {from} -> {to}: {message}")]
    InvalidCondition {
        from: String,
        to: String,
        message: String,
    },

    #[error("Recursive pipeline reference: {0}")]
    RecursivePipeline(String),

    #[error("Invalid parameter for '{component}': {message}")]
    InvalidParameter { component: String, message: String },
}

impl PipelineError {
    /// Node the failure is attributed to, when there is one.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            PipelineError::MissingComponent { node_id, .. }
            | PipelineError::ComponentExecution { node_id, .. } => Some(node_id),
            PipelineError::ConditionEval { to, .. } => Some(to),
            _ => None,
        }
    }
}
