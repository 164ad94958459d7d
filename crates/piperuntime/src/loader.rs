use async_trait::async_trait;
use pipecore::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Persisted mapping of a component name to its implementation kind and parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrototypeSpec {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl PrototypeSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            parameters,
        }
    }
}

/// Where registry reloads read their prototype mappings from
#[async_trait]
pub trait PrototypeSource: Send + Sync {
    async fn load(&self) -> Result<Vec<PrototypeSpec>, PipelineError>;
}

/// Fixed list of prototypes, mostly useful in tests and embedding code
#[derive(Debug, Clone, Default)]
pub struct StaticPrototypeSource {
    specs: Vec<PrototypeSpec>,
}

impl StaticPrototypeSource {
    pub fn new(specs: Vec<PrototypeSpec>) -> Self {
        Self { specs }
    }
}

#[async_trait]
impl PrototypeSource for StaticPrototypeSource {
    async fn load(&self) -> Result<Vec<PrototypeSpec>, PipelineError> {
        Ok(self.specs.clone())
    }
}

/// Prototypes read from a JSON file holding an array of [`PrototypeSpec`]
#[derive(Debug, Clone)]
pub struct JsonPrototypeSource {
    path: PathBuf,
}

impl JsonPrototypeSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PrototypeSource for JsonPrototypeSource {
    async fn load(&self) -> Result<Vec<PrototypeSpec>, PipelineError> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let specs: Vec<PrototypeSpec> = serde_json::from_str(&text)?;
        tracing::debug!(path = %self.path.display(), count = specs.len(), "Loaded prototype specs");
        Ok(specs)
    }
}
