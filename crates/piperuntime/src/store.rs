use async_trait::async_trait;
use pipecore::{GraphDefinition, PipelineError};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Source of persisted pipeline definitions
#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Look up an enabled pipeline by id; disabled or unknown ids yield `None`
    async fn find_enabled(&self, id: &str) -> Result<Option<GraphDefinition>, PipelineError>;
}

/// Pipelines held in memory
#[derive(Default)]
pub struct InMemoryPipelineStore {
    pipelines: RwLock<HashMap<String, GraphDefinition>>,
}

impl InMemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, definition: GraphDefinition) {
        let mut pipelines = self.pipelines.write().await;
        pipelines.insert(definition.id.clone(), definition);
    }

    pub async fn remove(&self, id: &str) -> Option<GraphDefinition> {
        self.pipelines.write().await.remove(id)
    }
}

#[async_trait]
impl PipelineStore for InMemoryPipelineStore {
    async fn find_enabled(&self, id: &str) -> Result<Option<GraphDefinition>, PipelineError> {
        let pipelines = self.pipelines.read().await;
        Ok(pipelines.get(id).filter(|p| p.enabled).cloned())
    }
}

/// Pipelines stored as `*.json` files in a directory
#[derive(Debug, Clone)]
pub struct DirPipelineStore {
    dir: PathBuf,
}

impl DirPipelineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl PipelineStore for DirPipelineStore {
    async fn find_enabled(&self, id: &str) -> Result<Option<GraphDefinition>, PipelineError> {
        // `<id>.json` is the common layout; otherwise scan for a matching id.
        let direct = self.dir.join(format!("{}.json", id));
        if let Ok(text) = tokio::fs::read_to_string(&direct).await {
            let definition: GraphDefinition = serde_json::from_str(&text)?;
            if definition.id == id {
                return Ok(Some(definition).filter(|d| d.enabled));
            }
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension() != Some("json".as_ref()) || path == direct {
                continue;
            }
            let text = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<GraphDefinition>(&text) {
                Ok(definition) if definition.id == id => {
                    return Ok(Some(definition).filter(|d| d.enabled));
                }
                Ok(_) => {}
                Err(e) => tracing::debug!(path = %path.display(), "Skipping non-pipeline file: {}", e),
            }
        }
        Ok(None)
    }
}
