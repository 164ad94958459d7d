use async_trait::async_trait;
use pipecore::{Component, ComponentError, RunContext, Value};
use piperuntime::{ComponentFactory, ComponentMetadata};
use serde::Deserialize;

use crate::parse_params;

#[derive(Debug, Deserialize)]
struct KeyMapping {
    input: String,
    output: String,
}

fn mapping(parameters: &serde_json::Value, input: &str, output: &str) -> Result<KeyMapping, ComponentError> {
    let mut defaults = serde_json::json!({ "input": input, "output": output });
    pipecore::merge_parameters(&mut defaults, parameters);
    parse_params(&defaults)
}

/// Parse the JSON string under `input` into a structured value under `output`
pub struct JsonParseComponent {
    keys: KeyMapping,
}

#[async_trait]
impl Component for JsonParseComponent {
    fn kind(&self) -> &str {
        "transform.json_parse"
    }

    async fn execute(&self, ctx: &RunContext) -> Result<(), ComponentError> {
        let input = ctx
            .get(&self.keys.input)
            .ok_or_else(|| ComponentError::MissingInput(self.keys.input.clone()))?;
        let text = input.as_str().ok_or_else(|| ComponentError::InvalidInputType {
            field: self.keys.input.clone(),
            expected: "string".to_string(),
            actual: input.kind().to_string(),
        })?;

        let parsed: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| ComponentError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        ctx.set(self.keys.output.clone(), Value::from(parsed));
        Ok(())
    }
}

pub struct JsonParseComponentFactory;

impl ComponentFactory for JsonParseComponentFactory {
    fn create(&self, parameters: &serde_json::Value) -> Result<Box<dyn Component>, ComponentError> {
        Ok(Box::new(JsonParseComponent {
            keys: mapping(parameters, "json", "parsed")?,
        }))
    }

    fn kind(&self) -> &str {
        "transform.json_parse"
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Parse a JSON string from the context".to_string(),
            category: "transform".to_string(),
        }
    }
}

/// Serialize the value under `input` into a JSON string under `output`
pub struct JsonStringifyComponent {
    keys: KeyMapping,
}

#[async_trait]
impl Component for JsonStringifyComponent {
    fn kind(&self) -> &str {
        "transform.json_stringify"
    }

    async fn execute(&self, ctx: &RunContext) -> Result<(), ComponentError> {
        let value = ctx
            .get(&self.keys.input)
            .ok_or_else(|| ComponentError::MissingInput(self.keys.input.clone()))?;

        let json_str = serde_json::to_string_pretty(&value.to_json())
            .map_err(|e| ComponentError::ExecutionFailed(format!("JSON stringify error: {}", e)))?;

        ctx.set(self.keys.output.clone(), json_str);
        Ok(())
    }
}

pub struct JsonStringifyComponentFactory;

impl ComponentFactory for JsonStringifyComponentFactory {
    fn create(&self, parameters: &serde_json::Value) -> Result<Box<dyn Component>, ComponentError> {
        Ok(Box::new(JsonStringifyComponent {
            keys: mapping(parameters, "value", "json")?,
        }))
    }

    fn kind(&self) -> &str {
        "transform.json_stringify"
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Convert a context value to a JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}
