#![allow(dead_code)]

use async_trait::async_trait;
use pipecore::{Component, ComponentConfig, ComponentError, GraphNodeSpec, RunContext, Value};
use piperuntime::{ComponentFactory, ComponentRegistry, PipelineRuntime, RuntimeConfig};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared observation point for every `step` instance built by one factory
#[derive(Default)]
pub struct Recorder {
    log: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    pub created: AtomicUsize,
}

impl Recorder {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.log().iter().filter(|l| *l == label).count()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
struct StepParams {
    label: Option<String>,
    delay_ms: u64,
    set: serde_json::Map<String, serde_json::Value>,
    fail: Option<String>,
    panic: bool,
    fail_init: bool,
    /// Trip the run's cancellation token, then return Ok
    cancel: bool,
    /// Fail `execute` unless `initialize` ran on this instance
    require_init: bool,
}

/// Test component: optionally sleeps, records its label, writes values,
/// then fails or panics on request.
struct Step {
    params: StepParams,
    recorder: Arc<Recorder>,
    initialized: bool,
}

#[async_trait]
impl Component for Step {
    fn kind(&self) -> &str {
        "step"
    }

    async fn initialize(&mut self, _config: &ComponentConfig) -> Result<(), ComponentError> {
        if self.params.fail_init {
            return Err(ComponentError::InitializationFailed("refused".to_string()));
        }
        self.initialized = true;
        Ok(())
    }

    async fn execute(&self, ctx: &RunContext) -> Result<(), ComponentError> {
        if self.params.require_init && !self.initialized {
            return Err(ComponentError::ExecutionFailed("never initialized".to_string()));
        }
        self.recorder.enter();
        if self.params.delay_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.params.delay_ms)) => {}
                _ = ctx.cancellation().cancelled() => {
                    self.recorder.leave();
                    return Err(ComponentError::Cancelled);
                }
            }
        }

        let label = self.params.label.clone().unwrap_or_else(|| "step".to_string());
        self.recorder.log.lock().unwrap().push(label);
        for (key, value) in &self.params.set {
            ctx.set(key.clone(), Value::from(value.clone()));
        }
        self.recorder.leave();

        if self.params.cancel {
            ctx.cancellation().cancel();
        }
        if self.params.panic {
            panic!("step exploded");
        }
        match &self.params.fail {
            Some(message) => Err(ComponentError::ExecutionFailed(message.clone())),
            None => Ok(()),
        }
    }
}

pub struct StepFactory {
    pub recorder: Arc<Recorder>,
}

impl ComponentFactory for StepFactory {
    fn create(&self, parameters: &serde_json::Value) -> Result<Box<dyn Component>, ComponentError> {
        let params: StepParams = serde_json::from_value(parameters.clone())
            .map_err(|e| ComponentError::Configuration(e.to_string()))?;
        self.recorder.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Step {
            params,
            recorder: Arc::clone(&self.recorder),
            initialized: false,
        }))
    }

    fn kind(&self) -> &str {
        "step"
    }
}

pub async fn registry(recorder: &Arc<Recorder>) -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();
    registry
        .register_factory(Arc::new(StepFactory {
            recorder: Arc::clone(recorder),
        }))
        .await;
    registry
}

pub async fn runtime(recorder: &Arc<Recorder>) -> PipelineRuntime {
    runtime_with(recorder, RuntimeConfig::default()).await
}

pub async fn runtime_with(recorder: &Arc<Recorder>, config: RuntimeConfig) -> PipelineRuntime {
    PipelineRuntime::new(Arc::new(registry(recorder).await), config)
}

/// A `step` node labelled with its own id
pub fn step(id: &str) -> GraphNodeSpec {
    step_with(id, json!({}))
}

/// A `step` node labelled with its own id plus extra parameters
pub fn step_with(id: &str, extra: serde_json::Value) -> GraphNodeSpec {
    let mut parameter = json!({ "label": id });
    pipecore::merge_parameters(&mut parameter, &extra);
    GraphNodeSpec::new(id)
        .with_component("step")
        .with_parameter(parameter)
}
