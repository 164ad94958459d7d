use async_trait::async_trait;
use pipecore::{Component, ComponentConfig, ComponentError, RunContext, Value};
use piperuntime::{ComponentFactory, ComponentMetadata};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::parse_params;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct HttpParams {
    url: Option<String>,
    /// Context key holding the URL when `url` is not fixed; `url` by default
    url_key: Option<String>,
    method: String,
    headers: HashMap<String, String>,
    /// Context key whose value is sent as the JSON body
    body_key: Option<String>,
    /// Context key receiving the response body
    output_key: String,
    timeout_ms: u64,
}

impl Default for HttpParams {
    fn default() -> Self {
        Self {
            url: None,
            url_key: Some("url".to_string()),
            method: "GET".to_string(),
            headers: HashMap::new(),
            body_key: None,
            output_key: "response".to_string(),
            timeout_ms: 30_000,
        }
    }
}

/// HTTP call to an external backend; the response lands in the context
pub struct HttpRequestComponent {
    client: reqwest::Client,
    params: HttpParams,
}

impl HttpRequestComponent {
    fn new(params: HttpParams) -> Result<Self, ComponentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(params.timeout_ms))
            .build()
            .map_err(|e| ComponentError::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self { client, params })
    }

    fn resolve_url(&self, ctx: &RunContext) -> Result<String, ComponentError> {
        if let Some(url) = &self.params.url {
            return Ok(url.clone());
        }
        let key = self
            .params
            .url_key
            .as_deref()
            .ok_or_else(|| ComponentError::Configuration("Missing parameter: url".to_string()))?;
        let value = ctx
            .get(key)
            .ok_or_else(|| ComponentError::MissingInput(key.to_string()))?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ComponentError::InvalidInputType {
                field: key.to_string(),
                expected: "string".to_string(),
                actual: value.kind().to_string(),
            })
    }
}

#[async_trait]
impl Component for HttpRequestComponent {
    fn kind(&self) -> &str {
        "http.request"
    }

    async fn initialize(&mut self, config: &ComponentConfig) -> Result<(), ComponentError> {
        match (&self.params.url, &self.params.url_key) {
            (Some(url), _) => reqwest::Url::parse(url)
                .map(|_| ())
                .map_err(|e| ComponentError::InitializationFailed(format!("{}: invalid url '{}': {}", config.component, url, e))),
            (None, Some(_)) => Ok(()),
            (None, None) => Err(ComponentError::InitializationFailed(format!(
                "{}: either 'url' or 'url_key' is required",
                config.component
            ))),
        }
    }

    async fn execute(&self, ctx: &RunContext) -> Result<(), ComponentError> {
        let url = self.resolve_url(ctx)?;
        let method = self.params.method.to_uppercase();

        tracing::debug!("{} {}", method, url);

        let mut request = match method.as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            _ => return Err(ComponentError::Configuration(format!("Unsupported method: {}", method))),
        };
        for (key, value) in &self.params.headers {
            request = request.header(key, value);
        }
        if let Some(body_key) = &self.params.body_key {
            let body = ctx
                .get(body_key)
                .ok_or_else(|| ComponentError::MissingInput(body_key.clone()))?;
            request = request.json(&body.to_json());
        }

        let response = tokio::select! {
            response = request.send() => response
                .map_err(|e| ComponentError::ExecutionFailed(format!("HTTP request failed: {}", e)))?,
            _ = ctx.cancellation().cancelled() => return Err(ComponentError::Cancelled),
        };

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| ComponentError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(ComponentError::ExecutionFailed(format!(
                "{} {} returned {}",
                method, url, status
            )));
        }

        let body = match serde_json::from_str::<serde_json::Value>(&body_text) {
            Ok(json) => Value::from(json),
            Err(_) => Value::String(body_text),
        };
        ctx.set(self.params.output_key.clone(), body);
        ctx.set(format!("{}_status", self.params.output_key), status.as_u16() as f64);
        Ok(())
    }
}

pub struct HttpRequestComponentFactory;

impl ComponentFactory for HttpRequestComponentFactory {
    fn create(&self, parameters: &serde_json::Value) -> Result<Box<dyn Component>, ComponentError> {
        Ok(Box::new(HttpRequestComponent::new(parse_params(parameters)?)?))
    }

    fn kind(&self) -> &str {
        "http.request"
    }

    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata {
            description: "Call an HTTP backend and store the response".to_string(),
            category: "http".to_string(),
        }
    }
}
