//! Standard component library
//!
//! Collection of built-in components for common pipeline steps

mod control;
mod debug;
mod http;
mod stream;
mod time;
mod transform;

pub use control::{
    EndComponent, EndComponentFactory, FailComponent, FailComponentFactory, RouteComponent,
    RouteComponentFactory, SetValuesComponent, SetValuesComponentFactory,
};
pub use debug::{DebugComponent, DebugComponentFactory};
pub use http::{HttpRequestComponent, HttpRequestComponentFactory};
pub use stream::{StreamEmitComponent, StreamEmitComponentFactory};
pub use time::{DelayComponent, DelayComponentFactory};
pub use transform::{
    JsonParseComponent, JsonParseComponentFactory, JsonStringifyComponent,
    JsonStringifyComponentFactory,
};

use pipecore::ComponentError;
use piperuntime::ComponentRegistry;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Register all standard components with a registry
pub async fn register_all(registry: &mut ComponentRegistry) {
    registry.register_factory(Arc::new(debug::DebugComponentFactory)).await;
    registry.register_factory(Arc::new(http::HttpRequestComponentFactory)).await;
    registry.register_factory(Arc::new(transform::JsonParseComponentFactory)).await;
    registry.register_factory(Arc::new(transform::JsonStringifyComponentFactory)).await;
    registry.register_factory(Arc::new(time::DelayComponentFactory)).await;
    registry.register_factory(Arc::new(control::SetValuesComponentFactory)).await;
    registry.register_factory(Arc::new(control::EndComponentFactory)).await;
    registry.register_factory(Arc::new(control::RouteComponentFactory)).await;
    registry.register_factory(Arc::new(control::FailComponentFactory)).await;
    registry.register_factory(Arc::new(stream::StreamEmitComponentFactory)).await;
}

/// Deserialize merged factory parameters; `null` reads as an empty object.
pub(crate) fn parse_params<T: DeserializeOwned>(parameters: &serde_json::Value) -> Result<T, ComponentError> {
    let result = if parameters.is_null() {
        serde_json::from_value(serde_json::json!({}))
    } else {
        T::deserialize(parameters)
    };
    result.map_err(|e| ComponentError::Configuration(format!("Invalid parameters: {}", e)))
}
