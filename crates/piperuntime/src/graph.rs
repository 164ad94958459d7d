use pipecore::{Component, Condition, NodeId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Lifecycle of a node within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum NodeStatus {
    Pending = 0,
    /// Some, but not all, inbound edges have arrived
    Blocked = 1,
    Running = 2,
    Done = 3,
    Failed = 4,
    Skipped = 5,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Done | NodeStatus::Failed | NodeStatus::Skipped)
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => NodeStatus::Blocked,
            2 => NodeStatus::Running,
            3 => NodeStatus::Done,
            4 => NodeStatus::Failed,
            5 => NodeStatus::Skipped,
            _ => NodeStatus::Pending,
        }
    }
}

/// Resolved component of a compiled node
#[derive(Clone)]
pub enum ComponentSlot {
    Ready(Arc<dyn Component>),
    /// The node's parameters failed to parse or initialize; reaching it fails the run
    Unusable(String),
}

/// Outgoing edge with its pre-parsed gate
#[derive(Debug, Clone)]
pub struct OutEdge {
    pub to: NodeId,
    pub condition: Option<Condition>,
}

/// Per-run materialization of one graph node
pub struct ExecutionNode {
    pub id: NodeId,
    /// Registry key or sub-pipeline id the component came from
    pub component_id: String,
    pub component: ComponentSlot,
    /// Distinct inbound node ids; their count seeds the join counter
    pub upstream: Vec<NodeId>,
    pub downstream: Vec<OutEdge>,
}

impl ExecutionNode {
    pub fn upstream_count(&self) -> usize {
        self.upstream.len()
    }

    pub fn is_usable(&self) -> bool {
        matches!(self.component, ComponentSlot::Ready(_))
    }
}

impl std::fmt::Debug for ExecutionNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionNode")
            .field("id", &self.id)
            .field("component_id", &self.component_id)
            .field("usable", &self.is_usable())
            .field("upstream", &self.upstream)
            .field("downstream", &self.downstream)
            .finish()
    }
}

/// Compiled, run-private graph: nodes by id plus the entry node
#[derive(Debug)]
pub struct ExecutionGraph {
    pub pipeline_id: String,
    pub root: NodeId,
    pub nodes: HashMap<NodeId, ExecutionNode>,
}

impl ExecutionGraph {
    pub fn node(&self, id: &str) -> Option<&ExecutionNode> {
        self.nodes.get(id)
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
