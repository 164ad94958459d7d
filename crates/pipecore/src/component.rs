use crate::{ComponentError, RunContext};
use async_trait::async_trait;

/// Core trait that every pipeline component implements
///
/// A component instance is either shared between runs (when the graph node
/// carries no parameter override) or owned by a single compiled node. Shared
/// instances see concurrent `execute` calls and must not keep per-run state.
#[async_trait]
pub trait Component: Send + Sync {
    /// Implementation kind (e.g. "debug.log", "http.request")
    fn kind(&self) -> &str;

    /// Execute against the run context; results are written back into it
    async fn execute(&self, ctx: &RunContext) -> Result<(), ComponentError>;

    /// Optional: prepare the instance once its parameters are final
    async fn initialize(&mut self, _config: &ComponentConfig) -> Result<(), ComponentError> {
        Ok(())
    }
}

/// Configuration handed to [`Component::initialize`].
#[derive(Debug, Clone)]
pub struct ComponentConfig {
    /// Registry name the instance was derived from
    pub component: String,

    /// Graph node the instance is bound to, `None` for shared prototypes
    pub node_id: Option<String>,

    /// Effective parameters after merging node overrides
    pub parameters: serde_json::Value,
}

impl ComponentConfig {
    pub fn new(component: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            component: component.into(),
            node_id: None,
            parameters,
        }
    }

    pub fn for_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Get a required string parameter
    pub fn require_str(&self, name: &str) -> Result<&str, ComponentError> {
        self.parameters
            .get(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ComponentError::Configuration(format!("Missing parameter: {}", name)))
    }

    pub fn str_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.parameters
            .get(name)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
    }
}

/// Recursively merge `overlay` onto `base`: objects merge key by key, every
/// other value in `overlay` replaces the one in `base`.
pub fn merge_parameters(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_parameters(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// True when a parameter override carries nothing to apply.
pub fn is_empty_parameter(parameter: &serde_json::Value) -> bool {
    match parameter {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_parameters_deep() {
        let mut base = json!({"top_k": 5, "backend": {"url": "http://a", "timeout": 3}});
        merge_parameters(&mut base, &json!({"backend": {"url": "http://b"}, "rerank": true}));
        assert_eq!(
            base,
            json!({"top_k": 5, "backend": {"url": "http://b", "timeout": 3}, "rerank": true})
        );
    }

    #[test]
    fn test_empty_parameter() {
        assert!(is_empty_parameter(&json!(null)));
        assert!(is_empty_parameter(&json!({})));
        assert!(is_empty_parameter(&json!("  ")));
        assert!(!is_empty_parameter(&json!({"k": 1})));
    }
}
