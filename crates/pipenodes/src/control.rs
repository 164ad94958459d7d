use async_trait::async_trait;
use pipecore::{Component, ComponentError, RunContext, Value, END_KEY, NEXT_OVERRIDE_KEY};
use piperuntime::{ComponentFactory, ComponentMetadata};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::parse_params;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SetValuesParams {
    values: BTreeMap<String, serde_json::Value>,
}

/// Write fixed values into the context
pub struct SetValuesComponent {
    values: Vec<(String, Value)>,
}

#[async_trait]
impl Component for SetValuesComponent {
    fn kind(&self) -> &str {
        "context.set"
    }

    async fn execute(&self, ctx: &RunContext) -> Result<(), ComponentError> {
        for (key, value) in &self.values {
            ctx.set(key.clone(), value.clone());
        }
        Ok(())
    }
}

pub struct SetValuesComponentFactory;

impl ComponentFactory for SetValuesComponentFactory {
    fn create(&self, parameters: &serde_json::Value) -> Result<Box<dyn Component>, ComponentError> {
        let params: SetValuesParams = parse_params(parameters)?;
        Ok(Box::new(SetValuesComponent {
            values: params
                .values
                .into_iter()
                .map(|(key, value)| (key, Value::from(value)))
                .collect(),
        }))
    }

    fn kind(&self) -> &str {
        "context.set"
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Set fixed values in the run context".to_string(),
            category: "control".to_string(),
        }
    }
}

/// Stop the run successfully once this node completes
pub struct EndComponent;

#[async_trait]
impl Component for EndComponent {
    fn kind(&self) -> &str {
        "control.end"
    }

    async fn execute(&self, ctx: &RunContext) -> Result<(), ComponentError> {
        ctx.set(END_KEY, true);
        Ok(())
    }
}

pub struct EndComponentFactory;

impl ComponentFactory for EndComponentFactory {
    fn create(&self, _parameters: &serde_json::Value) -> Result<Box<dyn Component>, ComponentError> {
        Ok(Box::new(EndComponent))
    }

    fn kind(&self) -> &str {
        "control.end"
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "End the run early".to_string(),
            category: "control".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RouteParams {
    key: Option<String>,
    /// Context value (as text) -> node to jump to
    routes: BTreeMap<String, String>,
    default: Option<String>,
}

/// Jump to a node chosen by a context value
pub struct RouteComponent {
    key: String,
    routes: BTreeMap<String, String>,
    default: Option<String>,
}

impl RouteComponent {
    fn route_key(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) if n.fract() == 0.0 => Some(format!("{}", *n as i64)),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[async_trait]
impl Component for RouteComponent {
    fn kind(&self) -> &str {
        "control.route"
    }

    async fn execute(&self, ctx: &RunContext) -> Result<(), ComponentError> {
        let target = ctx
            .get(&self.key)
            .as_ref()
            .and_then(Self::route_key)
            .and_then(|k| self.routes.get(&k).cloned())
            .or_else(|| self.default.clone());

        match target {
            Some(node) => {
                tracing::debug!(key = %self.key, target = %node, "Routing");
                ctx.set(NEXT_OVERRIDE_KEY, node);
            }
            None => tracing::debug!(key = %self.key, "No route matched"),
        }
        Ok(())
    }
}

pub struct RouteComponentFactory;

impl ComponentFactory for RouteComponentFactory {
    fn create(&self, parameters: &serde_json::Value) -> Result<Box<dyn Component>, ComponentError> {
        let params: RouteParams = parse_params(parameters)?;
        Ok(Box::new(RouteComponent {
            key: params.key.unwrap_or_else(|| "route".to_string()),
            routes: params.routes,
            default: params.default,
        }))
    }

    fn kind(&self) -> &str {
        "control.route"
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Jump to a node selected by a context value".to_string(),
            category: "control".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct FailParams {
    message: String,
}

impl Default for FailParams {
    fn default() -> Self {
        Self {
            message: "Pipeline failed".to_string(),
        }
    }
}

/// Fail the node with a configured message
pub struct FailComponent {
    message: String,
}

#[async_trait]
impl Component for FailComponent {
    fn kind(&self) -> &str {
        "control.fail"
    }

    async fn execute(&self, _ctx: &RunContext) -> Result<(), ComponentError> {
        Err(ComponentError::ExecutionFailed(self.message.clone()))
    }
}

pub struct FailComponentFactory;

impl ComponentFactory for FailComponentFactory {
    fn create(&self, parameters: &serde_json::Value) -> Result<Box<dyn Component>, ComponentError> {
        let params: FailParams = parse_params(parameters)?;
        Ok(Box::new(FailComponent { message: params.message }))
    }

    fn kind(&self) -> &str {
        "control.fail"
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Fail the run with an error message".to_string(),
            category: "control".to_string(),
        }
    }
}
