use crate::loader::{PrototypeSource, PrototypeSpec};
use pipecore::{
    is_empty_parameter, merge_parameters, Component, ComponentConfig, ComponentError, GraphError, PipelineError,
};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Factory trait for creating component instances
pub trait ComponentFactory: Send + Sync {
    /// Create a ready-to-use instance from fully merged parameters
    fn create(&self, parameters: &serde_json::Value) -> Result<Box<dyn Component>, ComponentError>;

    /// Implementation kind this factory builds (e.g. "debug.log")
    fn kind(&self) -> &str;

    /// Parameters of the default prototype registered under [`kind`](Self::kind)
    fn default_parameters(&self) -> serde_json::Value {
        serde_json::Value::Object(Default::default())
    }

    /// Optional: describe the component for listings
    fn metadata(&self) -> ComponentMetadata {
        ComponentMetadata::default()
    }
}

/// Metadata about a component kind
#[derive(Debug, Clone)]
pub struct ComponentMetadata {
    pub description: String,
    pub category: String,
}

impl Default for ComponentMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}

/// A registered template: the factory, its configured parameters and the
/// instance shared by every node that does not override parameters.
pub struct ComponentPrototype {
    name: String,
    factory: Arc<dyn ComponentFactory>,
    parameters: serde_json::Value,
    shared: Arc<dyn Component>,
}

impl ComponentPrototype {
    /// Create and initialize the shared instance. Nothing is published
    /// until initialization succeeds.
    pub async fn new(
        name: impl Into<String>,
        factory: Arc<dyn ComponentFactory>,
        parameters: serde_json::Value,
    ) -> Result<Self, ComponentError> {
        let name = name.into();
        let mut component = factory.create(&parameters)?;
        component
            .initialize(&ComponentConfig::new(name.clone(), parameters.clone()))
            .await?;
        Ok(Self {
            name,
            factory,
            parameters,
            shared: Arc::from(component),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &str {
        self.factory.kind()
    }

    pub fn parameters(&self) -> &serde_json::Value {
        &self.parameters
    }

    /// The instance shared across nodes and runs
    pub fn shared(&self) -> Arc<dyn Component> {
        Arc::clone(&self.shared)
    }

    /// Build an independent instance for one node: clone the prototype's
    /// parameters, merge the override onto them, create, then initialize.
    pub async fn instantiate(
        &self,
        node_id: &str,
        overrides: &serde_json::Value,
    ) -> Result<Box<dyn Component>, ComponentError> {
        let mut parameters = self.parameters.clone();
        merge_parameters(&mut parameters, overrides);

        let mut component = self.factory.create(&parameters)?;
        let config = ComponentConfig::new(self.name.clone(), parameters).for_node(node_id);
        component.initialize(&config).await?;
        Ok(component)
    }
}

pub type PrototypeMap = HashMap<String, Arc<ComponentPrototype>>;

/// Registry of component prototypes keyed by component name.
///
/// Factories are fixed once the registry is shared. The prototype map is
/// published as an immutable snapshot: registration and reload build a new
/// map and swap it in whole, so a compile that took a snapshot never sees a
/// half-applied reload.
pub struct ComponentRegistry {
    factories: HashMap<String, Arc<dyn ComponentFactory>>,
    prototypes: RwLock<Arc<PrototypeMap>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            prototypes: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Register a component factory and its default prototype
    pub async fn register_factory(&mut self, factory: Arc<dyn ComponentFactory>) {
        let kind = factory.kind().to_string();
        tracing::info!("Registering component kind: {}", kind);

        match ComponentPrototype::new(kind.clone(), factory.clone(), factory.default_parameters()).await {
            Ok(prototype) => self.register(kind.clone(), prototype),
            Err(e) => tracing::warn!(kind = %kind, "No default prototype: {}", e),
        }
        self.factories.insert(kind, factory);
    }

    /// Publish a prototype under `name`, replacing any previous one
    pub fn register(&self, name: impl Into<String>, prototype: ComponentPrototype) {
        let name = name.into();
        let mut guard = self.prototypes.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = PrototypeMap::clone(&guard);
        next.insert(name, Arc::new(prototype));
        *guard = Arc::new(next);
    }

    /// Create and publish a prototype of a registered kind
    pub async fn register_spec(&self, spec: &PrototypeSpec) -> Result<(), PipelineError> {
        let prototype = self.build(spec).await?;
        self.register(spec.name.clone(), prototype);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<ComponentPrototype>> {
        self.snapshot().get(name).cloned()
    }

    /// Current prototype map; unaffected by later reloads
    pub fn snapshot(&self) -> Arc<PrototypeMap> {
        Arc::clone(&self.prototypes.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replace every prototype with the defaults of each factory plus the
    /// entries of `source`. Either the whole new map is published or, on any
    /// error, the current one stays in place.
    pub async fn reload(&self, source: &dyn PrototypeSource) -> Result<usize, PipelineError> {
        let specs = source.load().await?;
        let mut next = PrototypeMap::new();

        for (kind, factory) in &self.factories {
            match ComponentPrototype::new(kind.clone(), factory.clone(), factory.default_parameters()).await {
                Ok(prototype) => {
                    next.insert(kind.clone(), Arc::new(prototype));
                }
                Err(e) => tracing::warn!(kind = %kind, "No default prototype: {}", e),
            }
        }
        for spec in &specs {
            next.insert(spec.name.clone(), Arc::new(self.build(spec).await?));
        }

        let count = next.len();
        *self.prototypes.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        tracing::info!(prototypes = count, "Component registry reloaded");
        Ok(count)
    }

    /// Drop every prototype; factories stay registered
    pub fn teardown(&self) {
        *self.prototypes.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(HashMap::new());
    }

    /// Get all registered component kinds
    pub fn list_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Get all published prototype names
    pub fn list_prototypes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshot().keys().cloned().collect();
        names.sort();
        names
    }

    /// Get metadata for a component kind
    pub fn get_metadata(&self, kind: &str) -> Option<ComponentMetadata> {
        self.factories.get(kind).map(|f| f.metadata())
    }

    async fn build(&self, spec: &PrototypeSpec) -> Result<ComponentPrototype, PipelineError> {
        let factory = self
            .factories
            .get(&spec.kind)
            .ok_or_else(|| GraphError::UnknownComponentType(spec.kind.clone()))?;

        let mut parameters = factory.default_parameters();
        if !is_empty_parameter(&spec.parameters) {
            merge_parameters(&mut parameters, &spec.parameters);
        }

        ComponentPrototype::new(spec.name.clone(), factory.clone(), parameters)
            .await
            .map_err(|e| {
                GraphError::InvalidParameter {
                    component: spec.name.clone(),
                    message: e.to_string(),
                }
                .into()
            })
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
