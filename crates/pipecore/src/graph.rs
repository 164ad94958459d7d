use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type PipelineId = String;
pub type NodeId = String;

/// Persisted, declarative pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub id: PipelineId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Entry node; when absent the single node without inbound edges is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<NodeId>,
    #[serde(default)]
    pub nodes: Vec<GraphNodeSpec>,
}

fn default_enabled() -> bool {
    true
}

impl GraphDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            enabled: true,
            root: None,
            nodes: Vec::new(),
        }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn with_node(mut self, node: GraphNodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn add_node(&mut self, node: GraphNodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Declare `from -> to` on both endpoints.
    pub fn connect(&mut self, from: &str, to: &str) {
        if let Some(node) = self.nodes.iter_mut().find(|n| n.id == from) {
            if !node.downstream.iter().any(|d| d == to) {
                node.downstream.push(to.to_string());
            }
        }
        if let Some(node) = self.nodes.iter_mut().find(|n| n.id == to) {
            if !node.upstream.iter().any(|u| u == from) {
                node.upstream.push(from.to_string());
            }
        }
    }

    /// Declare `from -> to` gated by a condition predicate.
    pub fn connect_when(&mut self, from: &str, to: &str, condition: impl Into<String>) {
        self.connect(from, to);
        if let Some(node) = self.nodes.iter_mut().find(|n| n.id == from) {
            node.downstream_conditions
                .insert(to.to_string(), condition.into());
        }
    }

    pub fn find_node(&self, id: &str) -> Option<&GraphNodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// One node position in a graph definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNodeSpec {
    pub id: NodeId,
    /// Registry key; defaults to `id` when absent
    #[serde(default, alias = "baseComponentId", skip_serializing_if = "Option::is_none")]
    pub base_component_id: Option<String>,
    /// Override merged onto the prototype's parameters. Empty means the node
    /// shares the prototype instance.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub parameter: serde_json::Value,
    #[serde(default, alias = "upstreamIds", alias = "upstream_ids")]
    pub upstream: Vec<NodeId>,
    #[serde(default, alias = "downstreamIds", alias = "downstream_ids")]
    pub downstream: Vec<NodeId>,
    /// Predicate source per downstream node id
    #[serde(default, alias = "downstreamConditions", skip_serializing_if = "HashMap::is_empty")]
    pub downstream_conditions: HashMap<NodeId, String>,
}

impl GraphNodeSpec {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_component_id: None,
            parameter: serde_json::Value::Null,
            upstream: Vec::new(),
            downstream: Vec::new(),
            downstream_conditions: HashMap::new(),
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.base_component_id = Some(component.into());
        self
    }

    pub fn with_parameter(mut self, parameter: serde_json::Value) -> Self {
        self.parameter = parameter;
        self
    }

    pub fn component_id(&self) -> &str {
        self.base_component_id.as_deref().unwrap_or(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_lists_default_to_empty() {
        let def: GraphDefinition = serde_json::from_str(
            r#"{"id": "qa", "nodes": [{"id": "begin"}, {"id": "answer", "base_component_id": "generate"}]}"#,
        )
        .unwrap();
        assert!(def.enabled);
        let begin = def.find_node("begin").unwrap();
        assert!(begin.upstream.is_empty());
        assert!(begin.downstream.is_empty());
        assert!(begin.parameter.is_null());
        assert_eq!(begin.component_id(), "begin");
        assert_eq!(def.find_node("answer").unwrap().component_id(), "generate");
    }

    #[test]
    fn test_connect_when_records_both_ends() {
        let mut def = GraphDefinition::new("p")
            .with_node(GraphNodeSpec::new("a"))
            .with_node(GraphNodeSpec::new("b"));
        def.connect_when("a", "b", r#"intent == "search""#);
        def.connect("a", "b");
        let a = def.find_node("a").unwrap();
        assert_eq!(a.downstream, vec!["b".to_string()]);
        assert_eq!(a.downstream_conditions.get("b").map(String::as_str), Some(r#"intent == "search""#));
        assert_eq!(def.find_node("b").unwrap().upstream, vec!["a".to_string()]);
    }

    #[test]
    fn test_store_document_field_names() {
        let def: GraphDefinition = serde_json::from_str(
            r#"{"id": "p", "nodes": [
                {"id": "A", "baseComponentId": "step", "downstreamIds": ["B"],
                 "downstreamConditions": {"B": "score > 1"}},
                {"id": "B", "baseComponentId": "step", "upstreamIds": ["A"]}
            ]}"#,
        )
        .unwrap();
        let a = def.find_node("A").unwrap();
        assert_eq!(a.component_id(), "step");
        assert_eq!(a.downstream, vec!["B".to_string()]);
        assert_eq!(a.downstream_conditions.get("B").map(String::as_str), Some("score > 1"));
        let b = def.find_node("B").unwrap();
        assert_eq!(b.component_id(), "step");
        assert_eq!(b.upstream, vec!["A".to_string()]);
    }
}
