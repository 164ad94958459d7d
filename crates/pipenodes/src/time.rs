use async_trait::async_trait;
use pipecore::{Component, ComponentError, RunContext};
use piperuntime::{ComponentFactory, ComponentMetadata};
use serde::Deserialize;
use tokio::time::{sleep, Duration};

use crate::parse_params;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DelayParams {
    delay_ms: u64,
}

impl Default for DelayParams {
    fn default() -> Self {
        Self { delay_ms: 1000 }
    }
}

/// Delay execution for a configured duration, aborting on cancellation
pub struct DelayComponent {
    delay: Duration,
}

#[async_trait]
impl Component for DelayComponent {
    fn kind(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: &RunContext) -> Result<(), ComponentError> {
        tracing::debug!("Delaying for {}ms", self.delay.as_millis());

        tokio::select! {
            _ = sleep(self.delay) => Ok(()),
            _ = ctx.cancellation().cancelled() => Err(ComponentError::Cancelled),
        }
    }
}

pub struct DelayComponentFactory;

impl ComponentFactory for DelayComponentFactory {
    fn create(&self, parameters: &serde_json::Value) -> Result<Box<dyn Component>, ComponentError> {
        let params: DelayParams = parse_params(parameters)?;
        Ok(Box::new(DelayComponent {
            delay: Duration::from_millis(params.delay_ms),
        }))
    }

    fn kind(&self) -> &str {
        "time.delay"
    }

    fn default_parameters(&self) -> serde_json::Value {
        serde_json::json!({ "delay_ms": 1000 })
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}
