use crate::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

/// Holds the first error recorded by the run (or by a component).
pub const ERROR_KEY: &str = "error";
/// Any truthy value terminates the run successfully after the current node.
pub const END_KEY: &str = "end";
/// Node id to jump to instead of the statically declared downstream set.
pub const NEXT_OVERRIDE_KEY: &str = "nextOverride";
/// Extension key under which a [`StreamSink`] is published.
pub const SINK_KEY: &str = "sink";

/// Channel for components that stream partial output to the caller.
pub type StreamSink = tokio::sync::mpsc::UnboundedSender<Value>;

/// Shared key/value store threaded through every node of one run.
///
/// Cloning is cheap and yields a handle to the same store. Any component may
/// read or overwrite any key; sibling branches writing the same key race and
/// the last writer wins.
#[derive(Clone, Default)]
pub struct RunContext {
    inner: Arc<ContextInner>,
}

#[derive(Default)]
struct ContextInner {
    values: RwLock<HashMap<String, Value>>,
    extensions: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    cancellation: CancellationToken,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context seeded with initial business values.
    pub fn with_values(values: HashMap<String, Value>) -> Self {
        Self::from_parts(values, CancellationToken::new())
    }

    /// Context bound to a caller-supplied cancellation token.
    pub fn from_parts(values: HashMap<String, Value>, cancellation: CancellationToken) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                values: RwLock::new(values),
                extensions: RwLock::new(HashMap::new()),
                cancellation,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    /// Look up a dotted path; the first segment is the context key.
    pub fn lookup(&self, path: &[&str]) -> Option<Value> {
        let (first, rest) = path.split_first()?;
        let values = self.read();
        values.get(*first)?.pointer(rest).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.write().insert(key.into(), value.into())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write().remove(key)
    }

    /// Insert only when the key is absent. Returns whether the value was stored.
    pub fn set_if_absent(&self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        let mut values = self.write();
        let key = key.into();
        if values.contains_key(&key) {
            return false;
        }
        values.insert(key, value.into());
        true
    }

    /// Copy of every business and control value.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.read().clone()
    }

    pub fn error(&self) -> Option<Value> {
        self.get(ERROR_KEY)
    }

    pub fn end_requested(&self) -> bool {
        self.get(END_KEY).is_some_and(|v| v.is_truthy())
    }

    /// Take the pending jump target, clearing the key.
    pub fn take_next_override(&self) -> Option<String> {
        let mut values = self.write();
        match values.remove(NEXT_OVERRIDE_KEY)? {
            Value::String(id) if !id.is_empty() => Some(id),
            _ => None,
        }
    }

    pub fn insert_extension<T: Any + Send + Sync>(&self, key: impl Into<String>, value: Arc<T>) {
        self.inner
            .extensions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }

    pub fn extension<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let extensions = self
            .inner
            .extensions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        extensions.get(key).cloned()?.downcast::<T>().ok()
    }

    pub fn stream_sink(&self) -> Option<Arc<StreamSink>> {
        self.extension::<StreamSink>(SINK_KEY)
    }

    /// Run-scoped cancellation; long-running components should observe it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Value>> {
        self.inner.values.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.inner.values.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("values", &*self.read())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
