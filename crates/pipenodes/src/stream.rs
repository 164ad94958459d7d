use async_trait::async_trait;
use pipecore::{Component, ComponentError, RunContext};
use piperuntime::{ComponentFactory, ComponentMetadata};
use serde::Deserialize;

use crate::parse_params;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct EmitParams {
    key: String,
    /// Fail when the key is unset instead of skipping the send
    required: bool,
}

impl Default for EmitParams {
    fn default() -> Self {
        Self {
            key: "output".to_string(),
            required: false,
        }
    }
}

/// Push a context value to the caller's stream sink, if one is attached
pub struct StreamEmitComponent {
    params: EmitParams,
}

#[async_trait]
impl Component for StreamEmitComponent {
    fn kind(&self) -> &str {
        "stream.emit"
    }

    async fn execute(&self, ctx: &RunContext) -> Result<(), ComponentError> {
        let value = match ctx.get(&self.params.key) {
            Some(value) => value,
            None if self.params.required => return Err(ComponentError::MissingInput(self.params.key.clone())),
            None => return Ok(()),
        };

        let Some(sink) = ctx.stream_sink() else {
            tracing::debug!(key = %self.params.key, "No stream sink attached");
            return Ok(());
        };
        // A dropped receiver only means nobody is listening anymore.
        if sink.send(value).is_err() {
            tracing::debug!("Stream receiver closed");
        }
        Ok(())
    }
}

pub struct StreamEmitComponentFactory;

impl ComponentFactory for StreamEmitComponentFactory {
    fn create(&self, parameters: &serde_json::Value) -> Result<Box<dyn Component>, ComponentError> {
        Ok(Box::new(StreamEmitComponent {
            params: parse_params(parameters)?,
        }))
    }

    fn kind(&self) -> &str {
        "stream.emit"
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Send a context value to the run's stream sink".to_string(),
            category: "stream".to_string(),
        }
    }
}
