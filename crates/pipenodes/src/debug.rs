use async_trait::async_trait;
use pipecore::{Component, ComponentError, RunContext};
use piperuntime::{ComponentFactory, ComponentMetadata};
use serde::Deserialize;

use crate::parse_params;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DebugParams {
    message: Option<String>,
    /// Keys to log; all keys when empty
    keys: Vec<String>,
}

/// Simple debug component that logs context values
pub struct DebugComponent {
    params: DebugParams,
}

#[async_trait]
impl Component for DebugComponent {
    fn kind(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: &RunContext) -> Result<(), ComponentError> {
        let message = self.params.message.as_deref().unwrap_or("(no message)");
        tracing::info!("DEBUG: {}", message);

        let values = ctx.snapshot();
        let mut keys: Vec<&String> = if self.params.keys.is_empty() {
            values.keys().collect()
        } else {
            self.params.keys.iter().collect()
        };
        keys.sort();
        for key in keys {
            match values.get(key) {
                Some(value) => tracing::info!("  {}: {}", key, value.to_json()),
                None => tracing::info!("  {}: <unset>", key),
            }
        }
        Ok(())
    }
}

pub struct DebugComponentFactory;

impl ComponentFactory for DebugComponentFactory {
    fn create(&self, parameters: &serde_json::Value) -> Result<Box<dyn Component>, ComponentError> {
        Ok(Box::new(DebugComponent {
            params: parse_params(parameters)?,
        }))
    }

    fn kind(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Logs context values for debugging".to_string(),
            category: "debug".to_string(),
        }
    }
}
